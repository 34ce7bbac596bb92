// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Transparency log checkpoints.

use super::merkle::{HASH_LENGTH, Hash};
use alloc::string::{String, ToString};
use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;

/// An error parsing a checkpoint body.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CheckpointError {
    /// A mandatory line is missing.
    #[error("checkpoint too short")]
    Truncated,
    /// The origin line is empty.
    #[error("empty checkpoint origin")]
    EmptyOrigin,
    /// The tree size is not a decimal number.
    #[error("invalid checkpoint size")]
    InvalidSize,
    /// The root hash is not the base64 encoding of a SHA-256 hash.
    #[error("invalid checkpoint root hash")]
    InvalidRoot,
}

/// A log checkpoint: the tree size and root hash committed to by the log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    /// Log identity.
    pub origin: String,
    /// Number of leaves in the tree.
    pub size: u64,
    /// Merkle tree root hash.
    pub root: Hash,
}

impl Checkpoint {
    /// Parses the body of a checkpoint note. Extension lines after the root hash are ignored.
    pub fn parse(text: &str) -> Result<Self, CheckpointError> {
        let mut lines = text.split('\n');
        let (Some(origin), Some(size), Some(root), Some(_)) =
            (lines.next(), lines.next(), lines.next(), lines.next())
        else {
            return Err(CheckpointError::Truncated);
        };

        if origin.is_empty() {
            return Err(CheckpointError::EmptyOrigin);
        }
        if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CheckpointError::InvalidSize);
        }
        let size = size.parse().map_err(|_| CheckpointError::InvalidSize)?;
        let root = STANDARD
            .decode(root)
            .map_err(|_| CheckpointError::InvalidRoot)?;
        let root: [u8; HASH_LENGTH] = root.try_into().map_err(|_| CheckpointError::InvalidRoot)?;

        Ok(Self {
            origin: origin.to_string(),
            size,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyA=";

    #[test]
    fn parse() {
        let checkpoint = Checkpoint::parse(&format!("example.com/log\n42\n{ROOT}\n")).unwrap();
        assert_eq!(checkpoint.origin, "example.com/log");
        assert_eq!(checkpoint.size, 42);
        assert_eq!(checkpoint.root[0], 1);
        assert_eq!(checkpoint.root[31], 32);
    }

    #[test]
    fn extension_lines() {
        let checkpoint =
            Checkpoint::parse(&format!("example.com/log\n42\n{ROOT}\nextra\n")).unwrap();
        assert_eq!(checkpoint.size, 42);
    }

    #[test]
    fn invalid() {
        assert_eq!(
            Checkpoint::parse(&format!("example.com/log\n42\n{ROOT}")),
            Err(CheckpointError::Truncated)
        );
        assert_eq!(
            Checkpoint::parse(&format!("\n42\n{ROOT}\n")),
            Err(CheckpointError::EmptyOrigin)
        );
        assert_eq!(
            Checkpoint::parse(&format!("log\n-1\n{ROOT}\n")),
            Err(CheckpointError::InvalidSize)
        );
        assert_eq!(
            Checkpoint::parse("log\n1\nAQID\n"),
            Err(CheckpointError::InvalidRoot)
        );
    }
}
