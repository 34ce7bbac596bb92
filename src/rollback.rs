// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware rollback protection, backed by the eMMC RPMB partition.

use crate::{
    platform::{Soc, SocError},
    rpmb::{KEY_LENGTH, Rpmb, RpmbCard, RpmbError, frame::DATA_LENGTH},
    storage::Card,
};
use alloc::string::ToString;
use core::str;
use log::{info, warn};
use pbkdf2::pbkdf2_hmac;
use rand_core::RngCore;
use sha2::Sha256;
use thiserror::Error;
use trusted_os_api::{Version, version::VersionError};

/// Sector written at initialisation to invalidate uncommitted writes.
pub const DUMMY_SECTOR: u16 = 0;
/// Sector holding the minimum secure monitor version.
pub const OS_VERSION: u16 = 1;
/// Sector holding the minimum applet version.
pub const APPLET_VERSION: u16 = 2;
/// Sector reserved to the applet.
pub const APPLET_USER: u16 = 3;

/// OTP bank of the key programmed flag.
const FUSE_BANK: u32 = 4;
/// OTP word of the key programmed flag.
const FUSE_WORD: u32 = 6;
const FUSE_PROGRAMMED: u32 = 1 << 0;

const DIVERSIFIER_MAC: &[u8] = b"ArmoryWitnessMAC";
const KDF_ITERATIONS: u32 = 4096;

/// A rollback protection error.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RollbackError {
    /// The running firmware is older than the stored expectation.
    #[error("version mismatch")]
    VersionMismatch {
        /// Version of the running firmware.
        running: Version,
        /// Minimum version stored in RPMB.
        expected: Version,
    },
    /// The stored or running version does not parse.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] VersionError),
    /// The stored version record is corrupt.
    #[error("invalid version record")]
    InvalidRecord,
    /// The SoC could not derive the key or access the fuses.
    #[error("{0}")]
    Soc(#[from] SocError),
    /// The RPMB transfer failed.
    #[error("{0}")]
    Rpmb(#[from] RpmbError),
}

/// Rollback protection counters.
pub struct Rollback {
    rpmb: Rpmb,
}

impl Rollback {
    /// Derives the RPMB key for this device and binds the RPMB partition to it, programming the
    /// key on first use.
    pub fn init<S, C, R>(soc: &mut S, card: &mut C, rng: &mut R) -> Result<Self, RollbackError>
    where
        S: Soc + ?Sized,
        C: Card + RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        let key = rpmb_key(soc)?;
        let programmed = soc.read_fuse(FUSE_BANK, FUSE_WORD)? & FUSE_PROGRAMMED != 0;

        let rpmb = Rpmb::init(card, rng, key, DUMMY_SECTOR, programmed)?;

        match rpmb.counter(card, rng, false) {
            Ok(_) => {}
            Err(e) if e.is_key_not_programmed() => {}
            Err(e) => return Err(e.into()),
        }

        if programmed {
            info!("SM RPMB program key flag already fused");
            return Ok(Self { rpmb });
        }

        // Fused first: the key must never be sent to a card twice.
        soc.blow_fuse(FUSE_BANK, FUSE_WORD, FUSE_PROGRAMMED)?;
        warn!("SM RPMB authentication key not yet programmed, programming");
        rpmb.program_key(card, rng)?;

        Ok(Self { rpmb })
    }

    /// Returns the RPMB partition.
    pub fn rpmb(&self) -> &Rpmb {
        &self.rpmb
    }

    /// Returns the minimum version stored in `sector`, `0.0.0` if none was ever stored.
    pub fn expected_version<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        sector: u16,
    ) -> Result<Version, RollbackError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        let mut buf = [0; DATA_LENGTH];
        self.rpmb.read(card, rng, sector, &mut buf)?;

        let length = usize::from(buf[0]);
        if length == 0 {
            return Ok(Version::default());
        }
        let record = buf.get(1..1 + length).ok_or(RollbackError::InvalidRecord)?;
        let version = str::from_utf8(record).map_err(|_| RollbackError::InvalidRecord)?;
        Ok(version.parse()?)
    }

    /// Checks `running` against the minimum version stored in `sector`, raising the minimum when
    /// `running` is newer.
    pub fn check_version<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        sector: u16,
        running: &Version,
    ) -> Result<(), RollbackError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        let expected = self.expected_version(card, rng, sector)?;

        if running.less_than(&expected) {
            return Err(RollbackError::VersionMismatch {
                running: running.clone(),
                expected,
            });
        }
        if expected.less_than(running) {
            self.update_version(card, rng, sector, running)?;
            info!("SM rollback sector {sector} raised from {expected} to {running}");
        }

        Ok(())
    }

    /// Parses `running` and checks it as [`Rollback::check_version`] does.
    pub fn check_version_str<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        sector: u16,
        running: &str,
    ) -> Result<(), RollbackError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        self.check_version(card, rng, sector, &running.parse()?)
    }

    fn update_version<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        sector: u16,
        version: &Version,
    ) -> Result<(), RollbackError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        let encoded = version.to_string();
        let length = u8::try_from(encoded.len())
            .ok()
            .filter(|&length| usize::from(length) < DATA_LENGTH)
            .ok_or(RollbackError::InvalidRecord)?;

        let mut record = [0; DATA_LENGTH];
        record[0] = length;
        record[1..1 + encoded.len()].copy_from_slice(encoded.as_bytes());
        self.rpmb.write(card, rng, sector, &record)?;
        Ok(())
    }
}

/// Derives the RPMB MAC key, unique to this device.
fn rpmb_key<S: Soc + ?Sized>(soc: &S) -> Result<[u8; KEY_LENGTH], RollbackError> {
    let device_key = soc.derive_key(DIVERSIFIER_MAC, &[0; 16])?;
    Ok(stretch_key(&device_key, &soc.unique_id()))
}

/// PBKDF2-HMAC-SHA256 of the device key, salted with the unique id.
fn stretch_key(device_key: &[u8], uid: &[u8]) -> [u8; KEY_LENGTH] {
    let mut key = [0; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(device_key, uid, KDF_ITERATIONS, &mut key);
    key
}
