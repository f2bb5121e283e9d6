//! Block and block header structures.

use crate::crypto::Address;
use crate::hash::{keccak256_concat, BlockHash, MerkleRoot, TransactionHash};
use crate::merkle::{merkle_root, MerkleProof, MerkleTree};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed mixed into the genesis block's previous-hash field.
pub const GENESIS_SEED: &[u8] = b"plasma-mvp-genesis";

/// Position of a block on the child chain.
///
/// Operator blocks are numbered on a fixed stride; deposit blocks are numbered by
/// the root chain and fall between strides.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub const GENESIS: Self = Self(0);

    pub fn value(&self) -> u64 {
        self.0
    }

    /// True if this number sits on the child-block stride.
    pub fn is_child(&self, interval: u64) -> bool {
        self.0 != 0 && self.0 % interval == 0
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The header of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the previous block.
    pub previous_block_hash: BlockHash,
    /// Merkle root of transactions.
    pub merkle_root: MerkleRoot,
}

impl Header {
    /// Calculate the hash of this block header.
    pub fn hash(&self) -> BlockHash {
        BlockHash::of_header(&self.previous_block_hash, &self.merkle_root)
    }
}

/// A block: header, number and ordered transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub number: BlockNumber,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a block, computing the merkle root over the transactions.
    pub fn new(
        previous_block_hash: BlockHash,
        number: BlockNumber,
        transactions: Vec<Transaction>,
    ) -> Self {
        let tx_hashes: Vec<TransactionHash> = transactions.iter().map(|tx| tx.hash()).collect();
        Self {
            header: Header {
                previous_block_hash,
                merkle_root: merkle_root(&tx_hashes),
            },
            number,
            transactions,
        }
    }

    /// Create the genesis block for an operator.
    pub fn genesis(operator: Address) -> Self {
        let seed = keccak256_concat(&[GENESIS_SEED, operator.as_bytes().as_slice()]);
        Self {
            header: Header {
                previous_block_hash: BlockHash(seed),
                merkle_root: MerkleRoot::empty(),
            },
            number: BlockNumber::GENESIS,
            transactions: Vec::new(),
        }
    }

    /// Create a deposit block holding a single generation transaction.
    pub fn deposit(
        previous_block_hash: BlockHash,
        number: BlockNumber,
        transaction: Transaction,
    ) -> Self {
        Self::new(previous_block_hash, number, vec![transaction])
    }

    /// Get the block hash (hash of the header).
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    pub fn merkle_root(&self) -> MerkleRoot {
        self.header.merkle_root
    }

    pub fn is_genesis(&self) -> bool {
        self.number == BlockNumber::GENESIS
    }

    /// Get the number of transactions in this block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transaction_hashes(&self) -> Vec<TransactionHash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }

    /// Verify the merkle root matches the transactions.
    pub fn verify_merkle_root(&self) -> bool {
        merkle_root(&self.transaction_hashes()) == self.header.merkle_root
    }

    /// Inclusion proof for the transaction at `index`.
    pub fn transaction_proof(&self, index: usize) -> Option<MerkleProof> {
        MerkleTree::new(&self.transaction_hashes()).proof(index)
    }
}
