// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A two-record journal backing a single slot.
//!
//! The slot is split in two halves, each holding a header block followed by the record data.
//! Writes always go to the half not holding the current record, so an interrupted write leaves
//! the previous record intact.

use super::SlotError;
use crate::storage::{self, Card};
use alloc::vec::Vec;
use log::debug;
use sha2::{Digest, Sha256};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U32},
};

const MAGIC: [u8; 4] = *b"TOSJ";

#[derive(FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned)]
#[repr(C)]
struct RecordHeader {
    magic: [u8; 4],
    revision: U32<BigEndian>,
    length: U32<BigEndian>,
    digest: [u8; 32],
}

#[derive(Debug)]
struct Record {
    half: u64,
    revision: u32,
    data: Vec<u8>,
}

/// The journal of one slot.
#[derive(Debug)]
pub struct Journal {
    start: u64,
    half_blocks: u64,
    block_size: usize,
    current: Option<Record>,
}

impl Journal {
    /// Opens the journal occupying `blocks` blocks from `start`, picking the valid record with the
    /// highest revision.
    pub fn open<C: Card + ?Sized>(
        card: &mut C,
        start: u64,
        blocks: u64,
        block_size: usize,
    ) -> Result<Self, SlotError> {
        let mut journal = Self {
            start,
            half_blocks: blocks / 2,
            block_size,
            current: None,
        };

        for half in 0..2 {
            if let Some(record) = journal.read_record(card, half)? {
                if journal
                    .current
                    .as_ref()
                    .is_none_or(|current| record.revision > current.revision)
                {
                    journal.current = Some(record);
                }
            }
        }

        Ok(journal)
    }

    /// Returns the maximum record length in bytes.
    pub fn capacity(&self) -> usize {
        (self.half_blocks.saturating_sub(1) as usize) * self.block_size
    }

    /// Returns the current data and revision, `(empty, 0)` if nothing was ever written.
    pub fn read(&self) -> (Vec<u8>, u32) {
        match &self.current {
            Some(record) => (record.data.clone(), record.revision),
            None => (Vec::new(), 0),
        }
    }

    /// Returns the current revision.
    pub fn revision(&self) -> u32 {
        self.current.as_ref().map_or(0, |record| record.revision)
    }

    /// Writes `data` as the next revision, returning it.
    pub fn write<C: Card + ?Sized>(&mut self, card: &mut C, data: &[u8]) -> Result<u32, SlotError> {
        if data.len() > self.capacity() {
            return Err(SlotError::TooLarge {
                length: data.len(),
                capacity: self.capacity(),
            });
        }

        let (half, revision) = match &self.current {
            Some(record) => (
                1 - record.half,
                record
                    .revision
                    .checked_add(1)
                    .ok_or(SlotError::RevisionExhausted)?,
            ),
            None => (0, 1),
        };

        let header = RecordHeader {
            magic: MAGIC,
            revision: revision.into(),
            length: (data.len() as u32).into(),
            digest: Sha256::digest(data).into(),
        };
        let mut buf = Vec::with_capacity(self.block_size + data.len());
        buf.extend_from_slice(header.as_bytes());
        buf.resize(self.block_size, 0);
        buf.extend_from_slice(data);

        storage::flash(card, &buf, self.half_lba(half), || {})?;
        debug!("journal at block {} written revision {revision}", self.start);

        self.current = Some(Record {
            half,
            revision,
            data: data.to_vec(),
        });
        Ok(revision)
    }

    /// Invalidates both records.
    pub fn erase<C: Card + ?Sized>(&mut self, card: &mut C) -> Result<(), SlotError> {
        let zeroes = alloc::vec![0; self.block_size];
        for half in 0..2 {
            storage::flash(card, &zeroes, self.half_lba(half), || {})?;
        }
        self.current = None;
        Ok(())
    }

    fn half_lba(&self, half: u64) -> u64 {
        self.start + half * self.half_blocks
    }

    fn read_record<C: Card + ?Sized>(
        &self,
        card: &mut C,
        half: u64,
    ) -> Result<Option<Record>, SlotError> {
        let lba = self.half_lba(half);
        let block = storage::read_blocks(card, lba, 1)?;
        let Ok((header, _)) = RecordHeader::read_from_prefix(&block) else {
            return Ok(None);
        };
        let length = header.length.get() as usize;
        if header.magic != MAGIC || length > self.capacity() {
            return Ok(None);
        }

        let data_blocks = length.div_ceil(self.block_size) as u64;
        let mut data = storage::read_blocks(card, lba + 1, data_blocks)?;
        data.truncate(length);

        if Sha256::digest(&data)[..] != header.digest {
            debug!("journal at block {} half {half} is corrupt", self.start);
            return Ok(None);
        }

        Ok(Some(Record {
            half,
            revision: header.revision.get(),
            data,
        }))
    }
}
