// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Semantic versions, as used for firmware releases and rollback protection.

use alloc::string::{String, ToString};
use core::{cmp::Ordering, fmt, str::FromStr};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

/// A semantic version `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`.
///
/// Build metadata is carried but ignored for ordering and equality.
#[derive(Clone, Debug, Default)]
pub struct Version {
    /// Major version.
    pub major: u64,
    /// Minor version.
    pub minor: u64,
    /// Patch version.
    pub patch: u64,
    /// Dot separated pre-release identifiers, empty for a release.
    pub pre_release: String,
    /// Build metadata, empty if absent.
    pub metadata: String,
}

/// An error parsing a [`Version`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VersionError {
    /// The version does not have exactly three numeric components.
    #[error("{0} is not in dotted-tri format")]
    NotDottedTri(String),
    /// A numeric component is not a valid number.
    #[error("invalid version component {0:?}")]
    InvalidNumber(String),
    /// A pre-release or metadata identifier is empty or uses forbidden characters.
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
}

impl Version {
    /// Creates a release version without pre-release or metadata.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: String::new(),
            metadata: String::new(),
        }
    }

    /// Returns whether this version is strictly older than `other`.
    pub fn less_than(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

fn parse_number(s: &str) -> Result<u64, VersionError> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return Err(VersionError::InvalidNumber(s.to_string()));
    }
    s.parse()
        .map_err(|_| VersionError::InvalidNumber(s.to_string()))
}

fn validate_identifiers(s: &str) -> Result<(), VersionError> {
    for identifier in s.split('.') {
        if identifier.is_empty()
            || !identifier
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(VersionError::InvalidIdentifier(identifier.to_string()));
        }
    }
    Ok(())
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('v').unwrap_or(s);
        let (rest, metadata) = match s.split_once('+') {
            Some((rest, metadata)) => {
                validate_identifiers(metadata)?;
                (rest, metadata)
            }
            None => (s, ""),
        };
        let (core, pre_release) = match rest.split_once('-') {
            Some((core, pre_release)) => {
                validate_identifiers(pre_release)?;
                (core, pre_release)
            }
            None => (rest, ""),
        };

        let mut parts = core.split('.');
        let (Some(major), Some(minor), Some(patch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VersionError::NotDottedTri(s.to_string()));
        };

        Ok(Self {
            major: parse_number(major)?,
            minor: parse_number(minor)?,
            patch: parse_number(patch)?,
            pre_release: pre_release.to_string(),
            metadata: metadata.to_string(),
        })
    }
}

fn compare_identifier(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        // Numeric identifiers always have lower precedence than alphanumeric ones.
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn compare_pre_release(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let mut a = a.split('.');
            let mut b = b.split('.');
            loop {
                match (a.next(), b.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(x), Some(y)) => match compare_identifier(x, y) {
                        Ordering::Equal => {}
                        other => return other,
                    },
                }
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| compare_pre_release(&self.pre_release, &other.pre_release))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre_release.is_empty() {
            write!(f, "-{}", self.pre_release)?;
        }
        if !self.metadata.is_empty() {
            write!(f, "+{}", self.metadata)?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
