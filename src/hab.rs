// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! High Assurance Boot activation.

use crate::platform::{Soc, SocError};
use log::warn;
use thiserror::Error;

/// Length of the Super Root Key table hash.
pub const SRK_HASH_LENGTH: usize = 32;

/// OTP bank holding the SRK hash.
const SRK_BANK: u32 = 3;
/// Number of fuse words holding the SRK hash.
const SRK_WORDS: u32 = (SRK_HASH_LENGTH / 4) as u32;

/// OTP location of the security configuration.
const SEC_CONFIG_BANK: u32 = 0;
const SEC_CONFIG_WORD: u32 = 6;
/// Closed security configuration: only authenticated images boot.
const SEC_CONFIG_CLOSED: u32 = 1 << 1;

/// An error activating secure boot.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HabError {
    /// The SRK hash has the wrong length.
    #[error("SRK hash must be {SRK_HASH_LENGTH} bytes")]
    InvalidSrkHash,
    /// Secure boot is already active.
    #[error("secure boot already active")]
    AlreadyActive,
    /// A different SRK hash is already fused.
    #[error("a different SRK hash is already fused")]
    SrkMismatch,
    /// Fuse access failed.
    #[error("{0}")]
    Soc(#[from] SocError),
}

/// Returns the fused SRK hash, all zeroes if none is fused.
pub fn srk_hash<S: Soc + ?Sized>(soc: &S) -> Result<[u8; SRK_HASH_LENGTH], SocError> {
    let mut hash = [0; SRK_HASH_LENGTH];
    for (word, chunk) in (0..SRK_WORDS).zip(hash.chunks_exact_mut(4)) {
        chunk.copy_from_slice(&soc.read_fuse(SRK_BANK, word)?.to_le_bytes());
    }
    Ok(hash)
}

/// Returns whether the security configuration is closed.
pub fn is_active<S: Soc + ?Sized>(soc: &S) -> Result<bool, SocError> {
    Ok(soc.read_fuse(SEC_CONFIG_BANK, SEC_CONFIG_WORD)? & SEC_CONFIG_CLOSED != 0)
}

/// Irreversibly activates secure boot, fusing `srk_hash` and then closing the security
/// configuration.
///
/// From then on the SoC only boots images signed with a key of the given SRK table.
pub fn activate<S: Soc + ?Sized>(soc: &mut S, srk_hash: &[u8]) -> Result<(), HabError> {
    let srk_hash: [u8; SRK_HASH_LENGTH] =
        srk_hash.try_into().map_err(|_| HabError::InvalidSrkHash)?;

    if is_active(soc)? {
        return Err(HabError::AlreadyActive);
    }

    let fused = self::srk_hash(soc)?;
    if fused != [0; SRK_HASH_LENGTH] && fused != srk_hash {
        return Err(HabError::SrkMismatch);
    }

    warn!("SM activating HAB, this operation is irreversible");

    if fused != srk_hash {
        for (word, chunk) in (0..SRK_WORDS).zip(srk_hash.chunks_exact(4)) {
            let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            soc.blow_fuse(SRK_BANK, word, value)?;
        }
    }

    soc.blow_fuse(SEC_CONFIG_BANK, SEC_CONFIG_WORD, SEC_CONFIG_CLOSED)?;
    warn!("SM HAB activated");

    Ok(())
}
