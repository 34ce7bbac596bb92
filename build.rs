// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build script for the trusted OS, recording build metadata for the status report.

use std::{env, process::Command};

fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    Some(revision.trim().to_string())
}

fn main() {
    println!(
        "cargo:rustc-env=TOS_TARGET_ARCH={}",
        env::var("CARGO_CFG_TARGET_ARCH").unwrap()
    );

    println!("cargo:rerun-if-env-changed=TOS_REVISION");
    if env::var("TOS_REVISION").is_err()
        && let Some(revision) = git_revision()
    {
        println!("cargo:rustc-env=TOS_REVISION={revision}");
    }

    for variable in [
        "TOS_VERSION",
        "TOS_BUILD",
        "TOS_LOG_ORIGIN",
        "TOS_LOG_PUBLIC_KEY",
        "TOS_MANIFEST_PUBLIC_KEYS",
        "LOG_LEVEL",
    ] {
        println!("cargo:rerun-if-env-changed={variable}");
    }
}
