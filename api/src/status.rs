// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Device status report.

use alloc::string::String;
use core::fmt::{self, Write};
use serde::{Deserialize, Serialize};

/// Placeholder for fields whose value could not be obtained.
pub const NO_STATUS: &str = "no status";

const LABEL_WIDTH: usize = 23;
const LINE_WIDTH: usize = 75;

/// Status of the witness applet, as last reported by it.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct WitnessStatus {
    /// Note verifier string for witness signatures.
    pub identity: String,
    /// Currently assigned IP address.
    pub ip: String,
    /// Stable key used to attest witness identities.
    pub id_attest_public_key: String,
    /// Note formatted attestation for the current witness identity.
    pub attested_id: String,
    /// Note formatted attestation for the current bastion identity.
    pub attested_bastion_id: String,
}

/// Secure monitor status.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Status {
    /// SoC unique identifier, upper case hex.
    pub serial: String,
    /// Whether secure boot is active.
    pub hab: bool,
    /// Fused SRK hash, hex.
    pub srk_hash: String,
    /// Source revision the monitor was built from.
    pub revision: String,
    /// Build host and date.
    pub build: String,
    /// Monitor version.
    pub version: String,
    /// Runtime description.
    pub runtime: String,
    /// Whether the Ethernet link is up.
    pub link: bool,
    /// Counter diversifying the witness identity.
    pub identity_counter: u64,
    /// Applet sub-status, if reported.
    pub witness: Option<WitnessStatus>,
}

fn header(out: &mut String, title: &str) -> fmt::Result {
    let dashes = LINE_WIDTH - title.len() - 6;
    writeln!(out, "{:-<dashes$} {title} ----", "")
}

fn field(out: &mut String, label: &str, value: impl fmt::Display) -> fmt::Result {
    let dots = LABEL_WIDTH.saturating_sub(label.len());
    write!(out, "{label} {:.<dots$}: {value}", "")
}

impl Status {
    /// Returns the status in the textual format parsed by operator tooling.
    pub fn print(&self) -> String {
        let mut out = String::new();
        // Writing to a `String` cannot fail.
        let _ = self.write_report(&mut out);
        out
    }

    fn write_report(&self, out: &mut String) -> fmt::Result {
        header(out, "Trusted OS")?;
        field(out, "Serial number", &self.serial)?;
        out.push('\n');
        field(out, "Secure Boot", self.hab)?;
        out.push('\n');
        field(out, "SRK hash", &self.srk_hash)?;
        out.push('\n');
        field(out, "Revision", &self.revision)?;
        out.push('\n');
        field(out, "Build", &self.build)?;
        out.push('\n');
        field(out, "Version", &self.version)?;
        out.push('\n');
        field(out, "Runtime", &self.runtime)?;
        out.push('\n');
        field(out, "Link", self.link)?;
        out.push('\n');
        field(out, "Identity counter", self.identity_counter)?;
        out.push('\n');

        header(out, "Trusted Applet")?;
        match &self.witness {
            Some(witness) => {
                field(out, "Identity", &witness.identity)?;
                out.push('\n');
                field(out, "IP", &witness.ip)?;
                out.push('\n');
                field(out, "Attestation key", &witness.id_attest_public_key)?;
                out.push('\n');
                field(out, "Attested identity", &witness.attested_id)?;
                out.push('\n');
                field(out, "Attested bastion ID", &witness.attested_bastion_id)
            }
            None => field(out, "Identity", NO_STATUS),
        }
    }
}
