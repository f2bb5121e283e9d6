//! Plasma MVP operator node.
//!
//! Wires the child-chain ledger to the outside world:
//! - **Node**: block production loop, transaction pool, root-chain reconciliation
//! - **Root chain**: the contract boundary and an in-memory implementation
//! - **API**: HTTP submission and query endpoints
//! - **Config**: TOML node configuration

pub mod api;
mod backoff;
pub mod config;
pub mod node;
pub mod root_chain;

pub use config::{ApiConfig, ConfigError, NodeConfig, SubmissionPolicy};
pub use node::{Node, NodeError, NodeState, NodeStatus, ProduceOutcome};
pub use root_chain::{
    BlockSubmitted, DepositCreated, ExitStarted, InMemoryRootChain, RootChain, RootChainError,
    RootChainEvents, SubmissionReceipt,
};
