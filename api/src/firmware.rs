// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware transparency artefacts and the on-disk firmware configuration record.

use crate::{Version, base64_bytes};
use alloc::{format, string::String, vec::Vec};
use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum encoded length of a [`ConfigRecord`], in bytes.
pub const CONFIG_MAX_LENGTH: usize = 40960;

const CONFIG_MAGIC: [u8; 4] = *b"TOSC";
const CONFIG_HEADER_LENGTH: usize = 8;

/// The firmware component a release applies to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Component {
    /// The secure monitor itself.
    #[serde(rename = "TRUSTED_OS")]
    TrustedOs,
    /// The applet supervised by the secure monitor.
    #[serde(rename = "TRUSTED_APPLET")]
    TrustedApplet,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TrustedOs => f.write_str("TRUSTED_OS"),
            Self::TrustedApplet => f.write_str("TRUSTED_APPLET"),
        }
    }
}

/// Everything needed to prove that a firmware image was published in the transparency log.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProofBundle {
    /// The signed log checkpoint the inclusion proof is relative to.
    #[serde(with = "base64_bytes")]
    pub checkpoint: Vec<u8>,
    /// The signed release manifest, which is the logged leaf.
    #[serde(with = "base64_bytes")]
    pub manifest: Vec<u8>,
    /// Index of the manifest leaf in the log.
    pub log_index: u64,
    /// Inclusion proof hashes, ordered from the leaf towards the root.
    #[serde(with = "base64_bytes::list")]
    pub inclusion_proof: Vec<Vec<u8>>,
    /// Hashes of all leaves, only present until the bundle has been verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_hashes: Option<Vec<Vec<u8>>>,
}

/// The release manifest logged for every firmware build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FirmwareRelease {
    /// Which component this release is for.
    pub component: Component,
    /// Release version, checked against the rollback counters.
    pub git_tag_name: Version,
    /// Commit the release was built from.
    #[serde(default)]
    pub git_commit_fingerprint: String,
    /// SHA-256 of the firmware image.
    #[serde(with = "base64_bytes")]
    pub firmware_digest_sha256: Vec<u8>,
    /// Toolchain version the release was built with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain_version: Option<Version>,
    /// Build environment, for reproducibility.
    #[serde(default)]
    pub build_envs: Vec<String>,
}

/// The firmware configuration record stored ahead of every firmware slot.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConfigRecord {
    /// First block of the firmware image.
    pub offset: u64,
    /// Firmware image size in bytes.
    pub size: u64,
    /// Detached signatures over the image, if any.
    #[serde(default, with = "base64_bytes::list")]
    pub signatures: Vec<Vec<u8>>,
    /// Transparency proof for the image.
    pub bundle: ProofBundle,
    /// Monotonic counter used to pick the newest slot.
    pub generation: u64,
}

/// An error encoding or decoding a [`ConfigRecord`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The record does not start with the expected magic.
    #[error("invalid config magic")]
    InvalidMagic,
    /// The record does not fit in [`CONFIG_MAX_LENGTH`] bytes.
    #[error("config length {0} exceeds maximum")]
    TooLarge(usize),
    /// The record is not valid JSON for a [`ConfigRecord`].
    #[error("malformed config: {0}")]
    Malformed(String),
}

impl ConfigRecord {
    /// Serialises the record for storage, prefixed with a magic and its length.
    pub fn encode(&self) -> Result<Vec<u8>, ConfigError> {
        let body = serde_json::to_vec(self).map_err(|e| ConfigError::Malformed(format!("{e}")))?;
        let length = CONFIG_HEADER_LENGTH + body.len();
        if length > CONFIG_MAX_LENGTH {
            return Err(ConfigError::TooLarge(length));
        }

        let mut buf = Vec::with_capacity(length);
        buf.extend_from_slice(&CONFIG_MAGIC);
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parses a record previously produced by [`ConfigRecord::encode`]. Trailing bytes, such as
    /// block padding, are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, ConfigError> {
        if buf.len() < CONFIG_HEADER_LENGTH || buf[0..4] != CONFIG_MAGIC {
            return Err(ConfigError::InvalidMagic);
        }
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if CONFIG_HEADER_LENGTH + length > CONFIG_MAX_LENGTH {
            return Err(ConfigError::TooLarge(CONFIG_HEADER_LENGTH + length));
        }
        let body = buf
            .get(CONFIG_HEADER_LENGTH..CONFIG_HEADER_LENGTH + length)
            .ok_or_else(|| ConfigError::Malformed("truncated record".into()))?;
        serde_json::from_slice(body).map_err(|e| ConfigError::Malformed(format!("{e}")))
    }
}
