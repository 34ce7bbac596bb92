// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware transparency proof bundle verification.

pub mod checkpoint;
pub mod merkle;
pub mod note;

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use checkpoint::{Checkpoint, CheckpointError};
use log::debug;
use merkle::{HASH_LENGTH, Hash, MerkleError};
use note::{NoteError, NoteVerifier};
use sha2::{Digest, Sha256};
use thiserror::Error;
use trusted_os_api::firmware::{Component, FirmwareRelease, ProofBundle};

/// An error verifying a proof bundle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VerifyError {
    /// The manifest note does not carry a valid signature from a release key.
    #[error("invalid manifest signature: {0}")]
    ManifestSignature(NoteError),
    /// The manifest is not a valid release description.
    #[error("invalid manifest: {0}")]
    Manifest(String),
    /// The manifest is for another component.
    #[error("manifest for {found}, expected {expected}")]
    ComponentMismatch {
        /// Component being verified.
        expected: Component,
        /// Component named by the manifest.
        found: Component,
    },
    /// The checkpoint note does not carry a valid log signature.
    #[error("invalid checkpoint signature: {0}")]
    CheckpointSignature(NoteError),
    /// The checkpoint body is malformed.
    #[error("invalid checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// The checkpoint is from another log.
    #[error("checkpoint origin {0:?} does not match log")]
    OriginMismatch(String),
    /// An inclusion proof hash is not a SHA-256 hash.
    #[error("invalid inclusion proof hash length")]
    ProofHashLength,
    /// The manifest is not included in the log at the claimed index.
    #[error("inclusion proof: {0}")]
    Inclusion(#[from] MerkleError),
    /// The firmware image does not match the manifest.
    #[error("firmware digest mismatch")]
    DigestMismatch,
}

/// Verifies proof bundles against the trusted log and release keys.
#[derive(Clone, Debug)]
pub struct BundleVerifier {
    log_origin: String,
    log_verifier: NoteVerifier,
    manifest_verifiers: Vec<NoteVerifier>,
}

impl BundleVerifier {
    /// Creates a verifier trusting the log `log_origin` signed by `log_verifier`, and releases
    /// signed by any of `manifest_verifiers`.
    pub fn new(
        log_origin: &str,
        log_verifier: NoteVerifier,
        manifest_verifiers: Vec<NoteVerifier>,
    ) -> Self {
        Self {
            log_origin: log_origin.to_string(),
            log_verifier,
            manifest_verifiers,
        }
    }

    /// Creates a verifier from verifier key strings.
    pub fn from_keys(
        log_origin: &str,
        log_key: &str,
        manifest_keys: &[&str],
    ) -> Result<Self, NoteError> {
        let manifest_verifiers = manifest_keys
            .iter()
            .map(|key| NoteVerifier::parse(key))
            .collect::<Result<_, _>>()?;
        Ok(Self::new(
            log_origin,
            NoteVerifier::parse(log_key)?,
            manifest_verifiers,
        ))
    }

    /// Verifies that `image` is the `component` release described by the bundle's manifest and
    /// that the manifest is included in the log, returning the release.
    ///
    /// Leaf hashes are dropped from the bundle once it has been verified.
    pub fn verify(
        &self,
        bundle: &mut ProofBundle,
        component: Component,
        image: &[u8],
    ) -> Result<FirmwareRelease, VerifyError> {
        let manifest = note::open(&bundle.manifest, &self.manifest_verifiers)
            .map_err(VerifyError::ManifestSignature)?;
        let release: FirmwareRelease = serde_json::from_str(&manifest.text)
            .map_err(|e| VerifyError::Manifest(e.to_string()))?;
        if release.component != component {
            return Err(VerifyError::ComponentMismatch {
                expected: component,
                found: release.component,
            });
        }

        let checkpoint = note::open(
            &bundle.checkpoint,
            core::slice::from_ref(&self.log_verifier),
        )
        .map_err(VerifyError::CheckpointSignature)?;
        let checkpoint = Checkpoint::parse(&checkpoint.text)?;
        if checkpoint.origin != self.log_origin {
            return Err(VerifyError::OriginMismatch(checkpoint.origin));
        }

        let proof = bundle
            .inclusion_proof
            .iter()
            .map(|hash| Hash::try_from(hash.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VerifyError::ProofHashLength)?;
        merkle::verify_inclusion(
            bundle.log_index,
            checkpoint.size,
            &merkle::leaf_hash(&bundle.manifest),
            &proof,
            &checkpoint.root,
        )?;

        let digest = Sha256::digest(image);
        if release.firmware_digest_sha256.len() != HASH_LENGTH
            || digest[..] != release.firmware_digest_sha256[..]
        {
            return Err(VerifyError::DigestMismatch);
        }

        bundle.leaf_hashes = None;
        debug!(
            "verified {component} {} at log index {}",
            release.git_tag_name, bundle.log_index
        );

        Ok(release)
    }
}
