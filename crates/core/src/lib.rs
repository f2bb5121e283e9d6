//! Core child-chain primitives for the plasma operator node.
//!
//! This crate provides the fundamental types used throughout the node:
//! - Cryptographic primitives (keccak hashing, secp256k1 keys, addresses)
//! - Transactions, inputs and outputs (UTXO model)
//! - Blocks and block headers
//! - Merkle trees

pub mod block;
pub mod crypto;
pub mod hash;
pub mod merkle;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockNumber, Header};
pub use crypto::{Address, CryptoError, KeyPair, PublicKey, Signature};
pub use hash::{keccak256, keccak256_concat, BlockHash, MerkleRoot, TransactionHash, H256};
pub use merkle::{merkle_root, verify_proof, MerkleProof, MerkleTree};
pub use transaction::{
    CoinbaseData, Input, OutPoint, Output, OutputIndex, Transaction, TransactionError,
};
