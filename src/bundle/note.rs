// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Signed notes, as used by transparency logs for checkpoints and release manifests.
//!
//! A note is UTF-8 text ending in a newline, followed by a blank line and one signature line per
//! signer: an em dash, the signer name, and the base64 encoding of the signer's key hash followed
//! by the signature.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Algorithm identifier of Ed25519 verifier keys.
pub const ALG_ED25519: u8 = 1;

pub(crate) const SIGNATURE_PREFIX: &str = "\u{2014} ";

/// An error parsing or verifying a note.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NoteError {
    /// The verifier key string is malformed.
    #[error("malformed verifier key")]
    MalformedVerifier,
    /// The verifier key uses an unsupported algorithm.
    #[error("unsupported verifier key algorithm {0}")]
    UnsupportedAlgorithm(u8),
    /// The note is malformed.
    #[error("malformed note")]
    Malformed,
    /// A known signer's signature does not verify.
    #[error("invalid signature from {0}")]
    InvalidSignature(String),
    /// No signature from a known signer was found.
    #[error("no verifiable signatures")]
    Unverified,
}

/// An Ed25519 note verifier, parsed from its `name+hash+key` string form.
#[derive(Clone, Debug)]
pub struct NoteVerifier {
    name: String,
    key_hash: u32,
    key: VerifyingKey,
}

impl NoteVerifier {
    /// Parses a verifier key string.
    pub fn parse(vkey: &str) -> Result<Self, NoteError> {
        let mut parts = vkey.splitn(3, '+');
        let (Some(name), Some(hash), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(NoteError::MalformedVerifier);
        };
        if !is_valid_name(name) || hash.len() != 8 {
            return Err(NoteError::MalformedVerifier);
        }
        let hash = u32::from_str_radix(hash, 16).map_err(|_| NoteError::MalformedVerifier)?;
        let key = STANDARD
            .decode(key)
            .map_err(|_| NoteError::MalformedVerifier)?;

        match key.split_first() {
            Some((&ALG_ED25519, raw)) => {
                if key_hash(name, &key) != hash {
                    return Err(NoteError::MalformedVerifier);
                }
                let raw: &[u8; 32] = raw.try_into().map_err(|_| NoteError::MalformedVerifier)?;
                Ok(Self {
                    name: name.to_string(),
                    key_hash: hash,
                    key: VerifyingKey::from_bytes(raw).map_err(|_| NoteError::MalformedVerifier)?,
                })
            }
            Some((&alg, _)) => Err(NoteError::UnsupportedAlgorithm(alg)),
            None => Err(NoteError::MalformedVerifier),
        }
    }

    /// Returns the signer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key hash identifying this key among keys with the same name.
    pub fn key_hash(&self) -> u32 {
        self.key_hash
    }

    fn verify(&self, text: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = <&[u8; 64]>::try_from(signature) else {
            return false;
        };
        self.key
            .verify_strict(text, &Signature::from_bytes(signature))
            .is_ok()
    }
}

/// A note whose signatures have been checked.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Note {
    /// The signed text, including its final newline.
    pub text: String,
    /// Names of the known signers whose signatures verified.
    pub signers: Vec<String>,
}

/// Returns the key hash for a verifier named `name` with the encoded key `key`, which includes the
/// algorithm byte.
pub(crate) fn key_hash(name: &str, key: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(key);
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c: char| c.is_whitespace() || c == '+')
}

/// Parses `msg` and verifies its signatures against `verifiers`.
///
/// Signatures from unknown signers are ignored, but at least one known signer must have signed
/// the note and every known signature must verify.
pub fn open(msg: &[u8], verifiers: &[NoteVerifier]) -> Result<Note, NoteError> {
    let msg = core::str::from_utf8(msg).map_err(|_| NoteError::Malformed)?;
    if msg.contains(|c: char| c.is_control() && c != '\n') {
        return Err(NoteError::Malformed);
    }

    let split = msg.rfind("\n\n").ok_or(NoteError::Malformed)?;
    let (text, signatures) = (&msg[..split + 1], &msg[split + 2..]);
    if signatures.is_empty() || !signatures.ends_with('\n') {
        return Err(NoteError::Malformed);
    }

    let mut signers = Vec::new();
    for line in signatures.split_terminator('\n') {
        let line = line
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or(NoteError::Malformed)?;
        let (name, encoded) = line.split_once(' ').ok_or(NoteError::Malformed)?;
        if !is_valid_name(name) {
            return Err(NoteError::Malformed);
        }
        let decoded = STANDARD.decode(encoded).map_err(|_| NoteError::Malformed)?;
        if decoded.len() < 5 {
            return Err(NoteError::Malformed);
        }
        let hash = u32::from_be_bytes([decoded[0], decoded[1], decoded[2], decoded[3]]);

        let Some(verifier) = verifiers
            .iter()
            .find(|verifier| verifier.name == name && verifier.key_hash == hash)
        else {
            continue;
        };
        if !verifier.verify(text.as_bytes(), &decoded[4..]) {
            return Err(NoteError::InvalidSignature(name.to_string()));
        }
        if !signers.iter().any(|signer| signer == name) {
            signers.push(name.to_string());
        }
    }

    if signers.is_empty() {
        return Err(NoteError::Unverified);
    }

    Ok(Note {
        text: text.to_string(),
        signers,
    })
}
