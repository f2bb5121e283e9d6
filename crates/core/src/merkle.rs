//! Merkle tree over a block's transaction hashes.

use crate::hash::{keccak256, keccak256_concat, MerkleRoot, TransactionHash, H256};
use serde::{Deserialize, Serialize};

const EMPTY_ROOT_DOMAIN: &[u8] = b"plasma-mvp-empty-merkle";

impl MerkleRoot {
    /// Root of a tree with no leaves. Domain separated so that it cannot coincide
    /// with the hash of an encoded transaction.
    pub fn empty() -> Self {
        MerkleRoot(keccak256(EMPTY_ROOT_DOMAIN))
    }
}

fn parent(left: &H256, right: &H256) -> H256 {
    keccak256_concat(&[left.as_slice(), right.as_slice()])
}

fn next_level(current: &[H256]) -> Vec<H256> {
    current
        .chunks(2)
        .map(|chunk| match chunk {
            [left, right] => parent(left, right),
            // Odd number of elements: hash the last one with itself
            [last] => parent(last, last),
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

/// Compute the merkle root of an ordered list of transaction hashes.
///
/// Returns [`MerkleRoot::empty`] if the list is empty and the leaf itself for a
/// single transaction. Leaf order is significant.
pub fn merkle_root(hashes: &[TransactionHash]) -> MerkleRoot {
    if hashes.is_empty() {
        return MerkleRoot::empty();
    }

    let mut current_level: Vec<H256> = hashes.iter().map(|h| h.0).collect();
    while current_level.len() > 1 {
        current_level = next_level(&current_level);
    }

    MerkleRoot(current_level[0])
}

/// A merkle tree for inclusion proofs.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// All nodes in the tree, level by level (leaves first). Empty for no leaves.
    levels: Vec<Vec<H256>>,
}

/// A merkle proof for a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The leaf being proven.
    pub leaf: TransactionHash,
    /// Sibling hashes from leaf to root.
    pub siblings: Vec<H256>,
    /// Direction for each sibling (true = right, false = left).
    pub directions: Vec<bool>,
}

impl MerkleTree {
    /// Build a merkle tree from a list of leaf hashes.
    pub fn new(leaves: &[TransactionHash]) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves.iter().map(|h| h.0).collect::<Vec<_>>()];
        loop {
            let current = &levels[levels.len() - 1];
            if current.len() <= 1 {
                break;
            }
            let next = next_level(current);
            levels.push(next);
        }

        Self { levels }
    }

    /// Get the root of the merkle tree.
    pub fn root(&self) -> MerkleRoot {
        self.levels
            .last()
            .and_then(|top| top.first())
            .map_or_else(MerkleRoot::empty, |root| MerkleRoot(*root))
    }

    /// Get the number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Generate a proof for the leaf at the given index.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let leaf = TransactionHash(self.levels[0][index]);
        let mut siblings = Vec::new();
        let mut directions = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let sibling = if sibling_idx < level.len() {
                level[sibling_idx]
            } else {
                level[idx]
            };

            siblings.push(sibling);
            directions.push(idx % 2 == 0);
            idx /= 2;
        }

        Some(MerkleProof {
            leaf,
            siblings,
            directions,
        })
    }
}

/// Verify a merkle proof against a given root.
pub fn verify_proof(root: &MerkleRoot, proof: &MerkleProof) -> bool {
    let mut current = proof.leaf.0;

    for (sibling, is_right) in proof.siblings.iter().zip(proof.directions.iter()) {
        current = if *is_right {
            parent(&current, sibling)
        } else {
            parent(sibling, &current)
        };
    }

    current == root.0
}
