// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RFC 6962 Merkle tree hashing and inclusion proofs.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a tree hash.
pub const HASH_LENGTH: usize = 32;

/// A tree hash.
pub type Hash = [u8; HASH_LENGTH];

const LEAF_PREFIX: u8 = 0;
const NODE_PREFIX: u8 = 1;

/// An error verifying an inclusion proof.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MerkleError {
    /// The leaf index is not within the tree.
    #[error("index {index} out of range for tree size {size}")]
    IndexOutOfRange {
        /// Leaf index.
        index: u64,
        /// Tree size.
        size: u64,
    },
    /// The proof has the wrong number of hashes for the index and tree size.
    #[error("wrong proof size {actual}, want {expected}")]
    WrongProofSize {
        /// Number of hashes in the proof.
        actual: usize,
        /// Number of hashes required.
        expected: usize,
    },
    /// The recomputed root differs from the expected one.
    #[error("root mismatch")]
    RootMismatch,
}

/// Returns the hash of a leaf holding `data`.
pub fn leaf_hash(data: &[u8]) -> Hash {
    Sha256::new()
        .chain_update([LEAF_PREFIX])
        .chain_update(data)
        .finalize()
        .into()
}

/// Returns the hash of an interior node.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    Sha256::new()
        .chain_update([NODE_PREFIX])
        .chain_update(left)
        .chain_update(right)
        .finalize()
        .into()
}

/// Recomputes the tree root from the leaf at `index` in a tree of `size` leaves and its inclusion
/// proof.
pub fn root_from_inclusion_proof(
    index: u64,
    size: u64,
    leaf: &Hash,
    proof: &[Hash],
) -> Result<Hash, MerkleError> {
    if index >= size {
        return Err(MerkleError::IndexOutOfRange { index, size });
    }

    // Levels below the point where the paths to `index` and to the last leaf diverge.
    let inner = (u64::BITS - (index ^ (size - 1)).leading_zeros()) as usize;
    // Levels above it where the path to `index` goes through a left child.
    let border = (index >> inner).count_ones() as usize;
    if proof.len() != inner + border {
        return Err(MerkleError::WrongProofSize {
            actual: proof.len(),
            expected: inner + border,
        });
    }

    let (inner_proof, border_proof) = proof.split_at(inner);
    let mut hash = *leaf;
    for (level, sibling) in inner_proof.iter().enumerate() {
        hash = if (index >> level) & 1 == 0 {
            node_hash(&hash, sibling)
        } else {
            node_hash(sibling, &hash)
        };
    }
    for sibling in border_proof {
        hash = node_hash(sibling, &hash);
    }

    Ok(hash)
}

/// Checks that `leaf` is at `index` in the tree of `size` leaves with root `root`.
pub fn verify_inclusion(
    index: u64,
    size: u64,
    leaf: &Hash,
    proof: &[Hash],
    root: &Hash,
) -> Result<(), MerkleError> {
    if root_from_inclusion_proof(index, size, leaf, proof)? == *root {
        Ok(())
    } else {
        Err(MerkleError::RootMismatch)
    }
}


#[cfg(test)]
mod tests {
    use super::reference::{inclusion_proof, root};
    use super::*;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| leaf_hash(&[i as u8])).collect()
    }

    #[test]
    fn hashes_are_domain_separated() {
        let leaf = leaf_hash(b"");
        assert_eq!(
            leaf,
            <[u8; 32]>::from(Sha256::digest([LEAF_PREFIX]))
        );
        assert_ne!(node_hash(&leaf, &leaf), leaf_hash(&[leaf, leaf].concat()));
    }

    #[test]
    fn every_leaf_of_every_small_tree() {
        for size in 1..=17 {
            let leaves = leaves(size);
            let root = root(&leaves);
            for index in 0..size {
                let proof = inclusion_proof(index, &leaves);
                assert_eq!(
                    verify_inclusion(index as u64, size as u64, &leaves[index], &proof, &root),
                    Ok(()),
                    "leaf {index} of {size}"
                );
            }
        }
    }

    #[test]
    fn single_leaf_tree() {
        let leaves = leaves(1);
        assert_eq!(
            root_from_inclusion_proof(0, 1, &leaves[0], &[]),
            Ok(leaves[0])
        );
    }

    #[test]
    fn wrong_leaf_or_index() {
        let leaves = leaves(7);
        let root = root(&leaves);
        let proof = inclusion_proof(3, &leaves);

        assert_eq!(
            verify_inclusion(3, 7, &leaves[4], &proof, &root),
            Err(MerkleError::RootMismatch)
        );
        assert_eq!(
            verify_inclusion(2, 7, &leaves[3], &proof, &root),
            Err(MerkleError::RootMismatch)
        );
        assert_eq!(
            verify_inclusion(7, 7, &leaves[3], &proof, &root),
            Err(MerkleError::IndexOutOfRange { index: 7, size: 7 })
        );
    }

    #[test]
    fn tampered_proof() {
        let leaves = leaves(11);
        let root = root(&leaves);
        let proof = inclusion_proof(6, &leaves);

        for i in 0..proof.len() {
            let mut tampered = proof.clone();
            tampered[i][0] ^= 1;
            assert_eq!(
                verify_inclusion(6, 11, &leaves[6], &tampered, &root),
                Err(MerkleError::RootMismatch)
            );
        }

        assert!(matches!(
            verify_inclusion(6, 11, &leaves[6], &proof[1..], &root),
            Err(MerkleError::WrongProofSize { .. })
        ));
    }
}
