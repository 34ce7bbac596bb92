// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Journal-backed storage slots within a partition of the card.

mod journal;

use crate::storage::{Card, StorageError};
use alloc::vec::Vec;
use journal::Journal;
use thiserror::Error;

/// Smallest slot, in blocks: a header and a data block in each journal half.
const MIN_SLOT_BLOCKS: u64 = 4;

/// An error accessing a slot.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SlotError {
    /// The partition geometry is inconsistent.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
    /// The slot does not exist.
    #[error("invalid slot {0}")]
    NoSuchSlot(usize),
    /// The data does not fit in the slot.
    #[error("data length {length} exceeds slot capacity {capacity}")]
    TooLarge {
        /// Length of the data.
        length: usize,
        /// Capacity of the slot.
        capacity: usize,
    },
    /// The slot was written since the token was read.
    #[error("invalid token, slot updated since then")]
    InvalidToken,
    /// The slot reached its last revision and cannot be written again.
    #[error("slot revision exhausted")]
    RevisionExhausted,
    /// The card access failed.
    #[error("{0}")]
    Storage(#[from] StorageError),
}

/// Layout of a partition, in blocks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Geometry {
    /// First block of the partition.
    pub start: u64,
    /// Length of the partition.
    pub length: u64,
    /// Length of each slot, laid out back to back from `start`.
    pub slot_lengths: Vec<u64>,
}

impl Geometry {
    /// Checks that the slots fit in the partition and are large enough to hold a journal.
    pub fn validate(&self) -> Result<(), SlotError> {
        if self.slot_lengths.is_empty() {
            return Err(SlotError::InvalidGeometry("no slots"));
        }
        if self.slot_lengths.iter().any(|&length| length < MIN_SLOT_BLOCKS) {
            return Err(SlotError::InvalidGeometry("slot too small"));
        }
        let total = self
            .slot_lengths
            .iter()
            .try_fold(0u64, |total, &length| total.checked_add(length));
        if total.is_none_or(|total| total > self.length) {
            return Err(SlotError::InvalidGeometry("slots exceed partition length"));
        }
        Ok(())
    }
}

/// A partition opened on a card.
#[derive(Debug)]
pub struct Partition {
    geometry: Geometry,
    journals: Vec<Journal>,
}

impl Partition {
    /// Opens every slot of the partition described by `geometry`.
    pub fn open<C: Card + ?Sized>(card: &mut C, geometry: Geometry) -> Result<Self, SlotError> {
        geometry.validate()?;
        let info = card.info();
        if geometry.start.saturating_add(geometry.length) > info.blocks {
            return Err(SlotError::InvalidGeometry("partition exceeds card"));
        }

        let mut journals = Vec::with_capacity(geometry.slot_lengths.len());
        let mut start = geometry.start;
        for &length in &geometry.slot_lengths {
            journals.push(Journal::open(
                card,
                start,
                length,
                info.block_size as usize,
            )?);
            start += length;
        }

        Ok(Self { geometry, journals })
    }

    /// Returns the partition geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Returns the number of slots.
    pub fn num_slots(&self) -> usize {
        self.journals.len()
    }

    /// Returns slot `index`.
    pub fn open_slot(&mut self, index: usize) -> Result<Slot<'_>, SlotError> {
        self.journals
            .get_mut(index)
            .map(|journal| Slot { journal })
            .ok_or(SlotError::NoSuchSlot(index))
    }

    /// Erases every slot.
    pub fn erase<C: Card + ?Sized>(&mut self, card: &mut C) -> Result<(), SlotError> {
        for journal in &mut self.journals {
            journal.erase(card)?;
        }
        Ok(())
    }
}

/// A single record with a revision counter.
#[derive(Debug)]
pub struct Slot<'a> {
    journal: &'a mut Journal,
}

impl Slot<'_> {
    /// Returns the current data and its revision, which is also the token for
    /// [`Slot::check_and_write`].
    pub fn read(&self) -> (Vec<u8>, u32) {
        self.journal.read()
    }

    /// Replaces the slot data.
    pub fn write<C: Card + ?Sized>(&mut self, card: &mut C, data: &[u8]) -> Result<(), SlotError> {
        self.journal.write(card, data)?;
        Ok(())
    }

    /// Replaces the slot data only if its revision still equals `token`.
    pub fn check_and_write<C: Card + ?Sized>(
        &mut self,
        card: &mut C,
        token: u32,
        data: &[u8],
    ) -> Result<(), SlotError> {
        if self.journal.revision() != token {
            return Err(SlotError::InvalidToken);
        }
        self.write(card, data)
    }

    /// Returns the maximum data length.
    pub fn capacity(&self) -> usize {
        self.journal.capacity()
    }
}
