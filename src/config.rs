// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build-time and runtime configuration of the monitor.

use crate::{
    bundle::{BundleVerifier, note::NoteError},
    ota::OTA_LIMIT,
    task::NS_PER_SEC,
};
use alloc::{string::String, vec::Vec};

/// Delay between acknowledging the final update chunk and applying the update.
pub const UPDATE_GRACE_DELAY_NS: u64 = NS_PER_SEC;

/// Returns the value of a build-time environment variable, or `default` if unset.
const fn env_or(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(value) => value,
        None => default,
    }
}

/// Monitor version, `TOS_VERSION` or the crate version.
pub const VERSION: &str = env_or(option_env!("TOS_VERSION"), env!("CARGO_PKG_VERSION"));

/// Source revision stamped by the build script.
pub const REVISION: &str = env_or(option_env!("TOS_REVISION"), "unknown");

/// Build user, host and date stamped by the build script.
pub const BUILD: &str = env_or(option_env!("TOS_BUILD"), "unknown");

/// Origin line of the transparency log checkpoints.
pub const LOG_ORIGIN: &str = env_or(option_env!("TOS_LOG_ORIGIN"), "");

/// Note verifier of the transparency log.
pub const LOG_PUBLIC_KEY: &str = env_or(option_env!("TOS_LOG_PUBLIC_KEY"), "");

/// Comma separated note verifiers of the firmware release manifests.
pub const MANIFEST_PUBLIC_KEYS: &str = env_or(option_env!("TOS_MANIFEST_PUBLIC_KEYS"), "");

/// Runtime description reported in the status.
pub const RUNTIME: &str = concat!("rust/", env!("TOS_TARGET_ARCH"));

/// Trust anchors for firmware verification.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrustAnchors {
    /// Checkpoint origin line.
    pub log_origin: String,
    /// Log note verifier string.
    pub log_public_key: String,
    /// Manifest note verifier strings.
    pub manifest_public_keys: Vec<String>,
}

impl TrustAnchors {
    /// Returns the anchors built into the monitor.
    pub fn built_in() -> Self {
        Self {
            log_origin: LOG_ORIGIN.into(),
            log_public_key: LOG_PUBLIC_KEY.into(),
            manifest_public_keys: MANIFEST_PUBLIC_KEYS
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// Returns whether any anchor is missing.
    pub fn is_empty(&self) -> bool {
        self.log_origin.is_empty()
            || self.log_public_key.is_empty()
            || self.manifest_public_keys.is_empty()
    }

    /// Builds the verifier for these anchors.
    pub fn verifier(&self) -> Result<BundleVerifier, NoteError> {
        let keys: Vec<&str> = self
            .manifest_public_keys
            .iter()
            .map(String::as_str)
            .collect();
        BundleVerifier::from_keys(&self.log_origin, &self.log_public_key, &keys)
    }
}

/// Runtime configuration handed to [`Monitor::new`](crate::monitor::Monitor::new).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MonitorConfig {
    /// Firmware verification anchors.
    pub trust: TrustAnchors,
    /// Version of the running monitor.
    pub version: String,
    /// Largest accepted firmware image.
    pub ota_limit: usize,
    /// Delay between acknowledging the final update chunk and applying the update.
    pub update_grace_delay_ns: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            trust: TrustAnchors::built_in(),
            version: VERSION.into(),
            ota_limit: OTA_LIMIT,
            update_grace_delay_ns: UPDATE_GRACE_DELAY_NS,
        }
    }
}
