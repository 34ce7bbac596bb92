// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Chunked over-the-air firmware transfers.

use crate::{bundle::VerifyError, firmware::FirmwareError, rollback::RollbackError};
use alloc::vec::Vec;
use log::{debug, info, warn};
use thiserror::Error;
use trusted_os_api::{
    firmware::{Component, ProofBundle},
    rpc::FirmwareUpdate,
};

/// Largest firmware image accepted, in bytes.
pub const OTA_LIMIT: usize = 31_457_280;

/// Chunks between progress log lines.
const PROGRESS_INTERVAL: u32 = 100;

/// An error receiving or applying a firmware update.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UpdateError {
    /// A chunk arrived out of order or changed the transfer length.
    #[error("invalid firmware update sequence")]
    Sequence,
    /// The transfer exceeds the maximum image size.
    #[error("size limit exceeded")]
    SizeLimit,
    /// The transfer completed without a proof bundle.
    #[error("missing proof bundle")]
    MissingProof,
    /// No trust anchors are configured, so nothing can be verified.
    #[error("firmware verification not configured")]
    Untrusted,
    /// The image failed verification.
    #[error("firmware verification error, {0}")]
    Verify(#[from] VerifyError),
    /// The image is older than the installed firmware.
    #[error("{0}")]
    Rollback(#[from] RollbackError),
    /// The image could not be written.
    #[error("firmware flashing error, {0}")]
    Firmware(#[from] FirmwareError),
}

/// A completely received, not yet verified, firmware image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReceivedFirmware {
    /// Component the image is for.
    pub component: Component,
    /// Firmware image.
    pub image: Vec<u8>,
    /// Last proof bundle received with the transfer.
    pub proof: Option<ProofBundle>,
}

#[derive(Debug)]
struct Transfer {
    component: Component,
    total: u32,
    sequence: u32,
    image: Vec<u8>,
    proof: Option<ProofBundle>,
}

/// Reassembles firmware images from sequenced chunks.
///
/// Sequence 0 starts a transfer, replacing any transfer in progress, and announces `total`, the
/// sequence number of the final chunk. Every other chunk must follow the previous one with the
/// same total, or the whole transfer is discarded.
#[derive(Debug)]
pub struct OtaBuffer {
    limit: usize,
    transfer: Option<Transfer>,
}

impl OtaBuffer {
    /// Creates an empty buffer accepting images of up to `limit` bytes.
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            transfer: None,
        }
    }

    /// Returns the component, last sequence number and total of the transfer in progress.
    pub fn in_progress(&self) -> Option<(Component, u32, u32)> {
        self.transfer
            .as_ref()
            .map(|transfer| (transfer.component, transfer.sequence, transfer.total))
    }

    /// Discards the transfer in progress.
    pub fn reset(&mut self) {
        self.transfer = None;
    }

    /// Adds a chunk of a `component` update, returning the complete image once the final chunk
    /// has been received.
    pub fn push(
        &mut self,
        component: Component,
        update: FirmwareUpdate,
    ) -> Result<Option<ReceivedFirmware>, UpdateError> {
        let FirmwareUpdate {
            sequence,
            total,
            image,
            proof,
        } = update;

        if sequence == 0 {
            if total == 0 {
                self.reset();
                return Err(UpdateError::Sequence);
            }
            if self.transfer.is_some() {
                warn!("SM discarding firmware update in progress");
            }
            info!("SM starting {component} update ({total} chunks)");
            self.transfer = Some(Transfer {
                component,
                total,
                sequence: 0,
                image: Vec::new(),
                proof: None,
            });
        }

        let Some(transfer) = self.transfer.as_mut().filter(|transfer| {
            sequence == 0
                || (transfer.component == component
                    && Some(sequence) == transfer.sequence.checked_add(1)
                    && total == transfer.total)
        }) else {
            self.reset();
            return Err(UpdateError::Sequence);
        };

        if transfer.image.len().saturating_add(image.len()) > self.limit {
            self.reset();
            return Err(UpdateError::SizeLimit);
        }

        transfer.sequence = sequence;
        transfer.image.extend_from_slice(&image);
        if proof.is_some() {
            transfer.proof = proof;
        }

        if sequence % PROGRESS_INTERVAL == 0 {
            debug!("received {sequence}/{total} {component} update chunks");
        }

        if sequence < transfer.total {
            return Ok(None);
        }

        info!("SM received all {total} {component} update chunks");
        Ok(self.transfer.take().map(|transfer| ReceivedFirmware {
            component: transfer.component,
            image: transfer.image,
            proof: transfer.proof,
        }))
    }
}

impl Default for OtaBuffer {
    fn default() -> Self {
        Self::new(OTA_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPLET: Component = Component::TrustedApplet;

    fn chunk(sequence: u32, total: u32, image: &[u8]) -> FirmwareUpdate {
        FirmwareUpdate {
            sequence,
            total,
            image: image.to_vec(),
            proof: None,
        }
    }

    fn proof(log_index: u64) -> ProofBundle {
        ProofBundle {
            log_index,
            ..Default::default()
        }
    }

    #[test]
    fn reassembles_in_order() {
        let mut ota = OtaBuffer::default();
        let data: Vec<u8> = (0..=255).collect();
        let chunks: Vec<&[u8]> = data.chunks(100).collect();
        let total = chunks.len() as u32;

        let mut header = chunk(0, total, &[]);
        header.proof = Some(proof(1));
        assert_eq!(ota.push(APPLET, header), Ok(None));

        for (i, piece) in chunks.iter().enumerate() {
            let sequence = i as u32 + 1;
            let result = ota.push(APPLET, chunk(sequence, total, piece)).unwrap();
            if sequence < total {
                assert_eq!(result, None);
                assert_eq!(ota.in_progress(), Some((APPLET, sequence, total)));
            } else {
                assert_eq!(
                    result,
                    Some(ReceivedFirmware {
                        component: APPLET,
                        image: data.clone(),
                        proof: Some(proof(1)),
                    })
                );
            }
        }
        assert_eq!(ota.in_progress(), None);
    }

    #[test]
    fn skipped_chunk_discards_transfer() {
        let mut ota = OtaBuffer::default();
        ota.push(APPLET, chunk(0, 3, b"a")).unwrap();
        ota.push(APPLET, chunk(1, 3, b"b")).unwrap();

        let err = ota.push(APPLET, chunk(3, 3, b"d")).unwrap_err();
        assert_eq!(err.to_string(), "invalid firmware update sequence");
        assert_eq!(ota.in_progress(), None);

        // Resuming is not possible.
        assert_eq!(
            ota.push(APPLET, chunk(2, 3, b"c")),
            Err(UpdateError::Sequence)
        );
    }

    #[test]
    fn restart_is_a_fresh_transfer() {
        let mut ota = OtaBuffer::default();
        ota.push(APPLET, chunk(0, 2, b"old")).unwrap();
        ota.push(APPLET, chunk(1, 2, b"old")).unwrap();

        ota.push(APPLET, chunk(0, 2, b"new")).unwrap();
        ota.push(APPLET, chunk(1, 2, b"1")).unwrap();
        let received = ota.push(APPLET, chunk(2, 2, b"2")).unwrap().unwrap();
        assert_eq!(received.image, b"new12");

        // Sending the same transfer again is harmless.
        ota.push(APPLET, chunk(0, 2, b"new")).unwrap();
        ota.push(APPLET, chunk(1, 2, b"1")).unwrap();
        let again = ota.push(APPLET, chunk(2, 2, b"2")).unwrap().unwrap();
        assert_eq!(again, received);
    }

    #[test]
    fn total_must_not_change() {
        let mut ota = OtaBuffer::default();
        ota.push(APPLET, chunk(0, 3, b"")).unwrap();
        assert_eq!(
            ota.push(APPLET, chunk(1, 4, b"")),
            Err(UpdateError::Sequence)
        );
    }

    #[test]
    fn component_must_not_change() {
        let mut ota = OtaBuffer::default();
        ota.push(APPLET, chunk(0, 3, b"")).unwrap();
        assert_eq!(
            ota.push(Component::TrustedOs, chunk(1, 3, b"")),
            Err(UpdateError::Sequence)
        );

        ota.push(APPLET, chunk(0, 3, b"")).unwrap();
        ota.push(Component::TrustedOs, chunk(0, 1, b"os")).unwrap();
        assert_eq!(
            ota.in_progress(),
            Some((Component::TrustedOs, 0, 1))
        );
    }

    #[test]
    fn chunk_without_transfer() {
        let mut ota = OtaBuffer::default();
        assert_eq!(
            ota.push(APPLET, chunk(1, 1, b"x")),
            Err(UpdateError::Sequence)
        );
        assert_eq!(
            ota.push(APPLET, chunk(0, 0, b"x")),
            Err(UpdateError::Sequence)
        );
    }

    #[test]
    fn size_limit() {
        let mut ota = OtaBuffer::new(10);
        ota.push(APPLET, chunk(0, 3, b"")).unwrap();
        ota.push(APPLET, chunk(1, 3, b"12345")).unwrap();
        ota.push(APPLET, chunk(2, 3, b"67890")).unwrap();
        assert_eq!(
            ota.push(APPLET, chunk(3, 3, b"!")),
            Err(UpdateError::SizeLimit)
        );
        assert_eq!(ota.in_progress(), None);
    }

    #[test]
    fn last_proof_wins() {
        let mut ota = OtaBuffer::default();
        let mut first = chunk(0, 2, b"");
        first.proof = Some(proof(1));
        ota.push(APPLET, first).unwrap();
        let mut second = chunk(1, 2, b"a");
        second.proof = Some(proof(2));
        ota.push(APPLET, second).unwrap();
        let received = ota.push(APPLET, chunk(2, 2, b"b")).unwrap().unwrap();
        assert_eq!(received.proof, Some(proof(2)));
    }
}
