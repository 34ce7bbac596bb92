// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Block storage.

use alloc::vec::Vec;
use log::trace;
use thiserror::Error;
pub use trusted_os_api::rpc::CardInfo;

/// Number of blocks written per transfer, to bound DMA buffer requirements.
pub const FLASH_BATCH_BLOCKS: usize = 64;

/// An error reported by a storage card.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StorageError {
    /// No card was detected.
    #[error("no card detected")]
    NotDetected,
    /// The access falls outside the card.
    #[error("invalid offset or size")]
    OutOfRange,
    /// The access is not block aligned.
    #[error("unaligned access")]
    Unaligned,
    /// The card does not support the operation.
    #[error("operation not supported")]
    Unsupported,
    /// The card reported an error.
    #[error("card error: {0}")]
    Device(&'static str),
}

/// A block storage card.
pub trait Card {
    /// Detects and initialises the card.
    fn detect(&mut self) -> Result<(), StorageError>;

    /// Returns the card geometry.
    fn info(&self) -> CardInfo;

    /// Reads `size` bytes from byte `offset`, which must be block aligned.
    fn read(&mut self, offset: u64, size: usize) -> Result<Vec<u8>, StorageError>;

    /// Writes whole blocks starting at `lba`. `data` must be a multiple of the block size.
    fn write_blocks(&mut self, lba: u64, data: &[u8]) -> Result<(), StorageError>;
}

/// Writes `buf` to `card` from block `lba`, padding it with zeroes up to a whole number of blocks
/// and writing at most [`FLASH_BATCH_BLOCKS`] blocks at a time.
///
/// `progress` is called after every batch.
pub fn flash<C: Card + ?Sized>(
    card: &mut C,
    buf: &[u8],
    lba: u64,
    mut progress: impl FnMut(),
) -> Result<(), StorageError> {
    let block_size = card.info().block_size as usize;
    if block_size == 0 {
        return Err(StorageError::NotDetected);
    }
    let batch_size = block_size * FLASH_BATCH_BLOCKS;

    for (i, chunk) in buf.chunks(batch_size).enumerate() {
        let lba = lba + (i * FLASH_BATCH_BLOCKS) as u64;
        trace!("flashing {} bytes at block {lba}", chunk.len());
        if chunk.len() % block_size == 0 {
            card.write_blocks(lba, chunk)?;
        } else {
            let mut padded = chunk.to_vec();
            padded.resize(chunk.len().next_multiple_of(block_size), 0);
            card.write_blocks(lba, &padded)?;
        }
        progress();
    }

    Ok(())
}

/// Reads `blocks` whole blocks from `lba`.
pub fn read_blocks<C: Card + ?Sized>(
    card: &mut C,
    lba: u64,
    blocks: u64,
) -> Result<Vec<u8>, StorageError> {
    let block_size = u64::from(card.info().block_size);
    let size = usize::try_from(blocks * block_size).map_err(|_| StorageError::OutOfRange)?;
    card.read(lba * block_size, size)
}
