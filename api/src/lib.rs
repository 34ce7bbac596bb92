// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Types shared between the Trusted OS secure monitor, the Trusted Applet it supervises and the
//! operator tooling which talks to it over the control interface.
//!
//! Everything that crosses a privilege or device boundary lives here, so that both ends agree on
//! the encoding.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod control;
pub mod firmware;
pub mod rpc;
pub mod status;
pub mod syscall;
pub mod version;

pub use version::Version;

/// Serde helpers for byte fields, which are encoded as standard base64 strings.
pub(crate) mod base64_bytes {
    use alloc::{string::String, vec::Vec};
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }

    /// The same encoding applied to every element of a list.
    pub mod list {
        use alloc::{string::String, vec::Vec};
        use base64::{Engine, engine::general_purpose::STANDARD};
        use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

        pub fn serialize<S: Serializer>(list: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(list.len()))?;
            for bytes in list {
                seq.serialize_element(&STANDARD.encode(bytes))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Vec<u8>>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .into_iter()
                .map(|encoded| STANDARD.decode(encoded).map_err(D::Error::custom))
                .collect()
        }
    }
}
