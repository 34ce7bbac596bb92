// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Replay Protected Memory Block protocol engine.
//!
//! Every write checks that the card's write counter advanced by exactly one, and initialisation
//! performs a dummy write to invalidate uncommitted writes left behind by an attacker
//! (CVE-2020-13799).

pub mod frame;

use crate::storage::{Card, StorageError};
use bitflags::bitflags;
use frame::{DATA_LENGTH, DataFrame, FrameType, OperationResult};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use rand_core::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Length of the MAC key.
pub const KEY_LENGTH: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Access to the RPMB partition of an eMMC.
pub trait RpmbCard {
    /// Sends a request frame, with reliable write for authenticated writes.
    fn rpmb_write(&mut self, frame: &DataFrame, reliable: bool) -> Result<(), StorageError>;

    /// Reads the response frame for the last request.
    fn rpmb_read(&mut self) -> Result<DataFrame, StorageError>;
}

bitflags! {
    /// Per-operation protocol steps.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct OpConfig: u8 {
        /// Compute the request MAC before sending.
        const REQUEST_MAC = 1 << 0;
        /// Validate the response MAC after receiving.
        const RESPONSE_MAC = 1 << 1;
        /// Set the nonce field to a random value.
        const RANDOM_NONCE = 1 << 2;
        /// Fetch the response with a result read request.
        const RESULT_READ = 1 << 3;
    }
}

/// An RPMB protocol error.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RpmbError {
    /// The card is not an eMMC.
    #[error("no MMC card detected")]
    NotMmc,
    /// The MAC key is unusable.
    #[error("invalid MAC key size")]
    InvalidKey,
    /// The transfer exceeds one sector.
    #[error("transfer size must not exceed 256 bytes")]
    TransferTooLarge,
    /// The response MAC is invalid.
    #[error("invalid response MAC")]
    InvalidMac,
    /// The response does not answer the request.
    #[error("request/response type mismatch")]
    TypeMismatch,
    /// The response nonce differs from the request nonce.
    #[error("nonce mismatch")]
    NonceMismatch,
    /// The card reported a failure.
    #[error("operation failed ({0:x})")]
    Operation(u16),
    /// The write counter did not advance by exactly one.
    #[error("write counter mismatch")]
    CounterMismatch {
        /// Counter sent with the write.
        request: u32,
        /// Counter returned by the card.
        response: u32,
    },
    /// The underlying card transfer failed.
    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl RpmbError {
    /// Returns whether the card reported that no key has been programmed yet.
    pub fn is_key_not_programmed(&self) -> bool {
        *self == Self::Operation(OperationResult::AuthenticationKeyNotYetProgrammed.into())
    }
}

/// An RPMB partition bound to its MAC key.
pub struct Rpmb {
    key: [u8; KEY_LENGTH],
}

impl Rpmb {
    /// Binds the RPMB partition of `card` to `key`.
    ///
    /// When the key has been `programmed` before, a dummy write to `dummy_sector` is performed to
    /// invalidate any uncommitted write.
    pub fn init<C, R>(
        card: &mut C,
        rng: &mut R,
        key: [u8; KEY_LENGTH],
        dummy_sector: u16,
        programmed: bool,
    ) -> Result<Self, RpmbError>
    where
        C: Card + RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        if !card.info().mmc {
            return Err(RpmbError::NotMmc);
        }

        let rpmb = Self { key };

        if programmed {
            rpmb.write(card, rng, dummy_sector, &[])?;
        }

        Ok(rpmb)
    }

    fn mac(&self) -> Result<HmacSha256, RpmbError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| RpmbError::InvalidKey)
    }

    fn op<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        mut req: DataFrame,
        config: OpConfig,
    ) -> Result<DataFrame, RpmbError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        if config.contains(OpConfig::RANDOM_NONCE) {
            rng.fill_bytes(&mut req.nonce);
        }

        if config.contains(OpConfig::REQUEST_MAC) {
            let mut mac = self.mac()?;
            mac.update(req.mac_input());
            req.key_mac.copy_from_slice(&mac.finalize().into_bytes());
        }

        let reliable = FrameType::try_from(req.req).is_ok_and(FrameType::is_write);
        card.rpmb_write(&req, reliable)?;

        if config.contains(OpConfig::RESULT_READ) {
            card.rpmb_write(&DataFrame::request(FrameType::ResultRead), false)?;
        }

        let res = card.rpmb_read()?;

        if config.contains(OpConfig::RESPONSE_MAC) {
            let mut mac = self.mac()?;
            mac.update(res.mac_input());
            mac.verify_slice(&res.key_mac)
                .map_err(|_| RpmbError::InvalidMac)?;
        }

        if res.resp != req.req {
            return Err(RpmbError::TypeMismatch);
        }

        if res.nonce != req.nonce {
            return Err(RpmbError::NonceMismatch);
        }

        match res.result.get() {
            0 => Ok(res),
            result => Err(RpmbError::Operation(result)),
        }
    }

    /// Programs the authentication key.
    ///
    /// This is a one-time irreversible operation for the card.
    pub fn program_key<C, R>(&self, card: &mut C, rng: &mut R) -> Result<(), RpmbError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        warn!("SM programming RPMB authentication key");
        let mut req = DataFrame::request(FrameType::AuthenticationKeyProgramming);
        req.key_mac = self.key;
        self.op(card, rng, req, OpConfig::RESULT_READ)?;
        Ok(())
    }

    /// Returns the write counter, authenticating the response when `auth` is set.
    pub fn counter<C, R>(&self, card: &mut C, rng: &mut R, auth: bool) -> Result<u32, RpmbError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        let config = if auth {
            OpConfig::RANDOM_NONCE | OpConfig::RESPONSE_MAC
        } else {
            OpConfig::empty()
        };
        let res = self.op(
            card,
            rng,
            DataFrame::request(FrameType::WriteCounterRead),
            config,
        )?;
        Ok(res.counter())
    }

    /// Writes up to 256 bytes to `sector`, returning the new write counter.
    pub fn write<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        sector: u16,
        data: &[u8],
    ) -> Result<u32, RpmbError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        if data.len() > DATA_LENGTH {
            return Err(RpmbError::TransferTooLarge);
        }

        let counter = self.counter(card, rng, true)?;

        let mut req = DataFrame::request(FrameType::AuthenticatedDataWrite);
        req.write_counter.set(counter);
        req.address.set(sector);
        req.block_count.set(1);
        req.data[..data.len()].copy_from_slice(data);

        let res = self.op(
            card,
            rng,
            req,
            OpConfig::REQUEST_MAC | OpConfig::RESPONSE_MAC | OpConfig::RESULT_READ,
        )?;

        if Some(res.counter()) != counter.checked_add(1) {
            return Err(RpmbError::CounterMismatch {
                request: counter,
                response: res.counter(),
            });
        }
        debug!("RPMB sector {sector} written, counter {}", res.counter());

        Ok(res.counter())
    }

    /// Reads `buf.len()` bytes, at most 256, from `sector`.
    pub fn read<C, R>(
        &self,
        card: &mut C,
        rng: &mut R,
        sector: u16,
        buf: &mut [u8],
    ) -> Result<(), RpmbError>
    where
        C: RpmbCard + ?Sized,
        R: RngCore + ?Sized,
    {
        if buf.len() > DATA_LENGTH {
            return Err(RpmbError::TransferTooLarge);
        }

        let mut req = DataFrame::request(FrameType::AuthenticatedDataRead);
        req.address.set(sector);
        req.block_count.set(1);

        let res = self.op(
            card,
            rng,
            req,
            OpConfig::REQUEST_MAC | OpConfig::RESPONSE_MAC | OpConfig::RANDOM_NONCE,
        )?;
        buf.copy_from_slice(&res.data[..buf.len()]);

        Ok(())
    }
}
