//! Child-chain ledger for the plasma operator.
//!
//! This crate holds the state the operator is responsible for:
//! - **Chain**: ordered blocks, the UTXO index and exit flags
//! - **Verification**: transaction admission against a chain snapshot
//! - **Mempool**: verified transactions waiting for the next child block
//!
//! # Example
//!
//! ```rust
//! use plasma_chain::{Chain, Mempool, TransactionVerificationService};
//! use plasma_core::{
//!     Block, BlockNumber, Input, KeyPair, OutPoint, Output, OutputIndex, Transaction,
//! };
//!
//! let operator = KeyPair::generate();
//! let alice = KeyPair::generate();
//! let mut chain = Chain::new(operator.address());
//!
//! // A deposit confirmed on the root chain
//! let deposit = Transaction::generation("1", Output::new(100, alice.address()));
//! let funding = OutPoint::new(deposit.hash(), OutputIndex::FIRST);
//! chain.add(Block::deposit(chain.latest_block().hash(), BlockNumber(1), deposit)).unwrap();
//!
//! // Alice spends it
//! let tx = Transaction::new(
//!     vec![Input::spend(funding, &alice)],
//!     vec![Output::new(100, operator.address())],
//! ).unwrap();
//! let verifier = TransactionVerificationService::new();
//! assert!(verifier.verify(&chain.snapshot(), &tx).is_success());
//!
//! let mut mempool = Mempool::new();
//! mempool.add(tx).unwrap();
//! ```

pub mod chain;
pub mod mempool;
pub mod verification;

// Re-export commonly used types
pub use chain::{
    BlockKind, Chain, ChainError, ChainSnapshot, MarkExitResult, NotFoundReason,
    CHILD_BLOCK_INTERVAL,
};
pub use mempool::{Mempool, MempoolConfig, MempoolError, MempoolStats};
pub use verification::{TransactionVerificationService, VerificationResult};
