//! The root-chain contract boundary.
//!
//! The node submits child block roots and consumes three ordered event streams. The
//! Ethereum transport lives behind [`RootChain`]; [`InMemoryRootChain`] reproduces the
//! contract's block numbering for development and tests.

use async_trait::async_trait;
use plasma_core::{Address, BlockNumber, MerkleRoot, OutputIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RootChainError {
    #[error("root chain request failed: {0}")]
    Transport(String),

    #[error("root chain rejected the call: {0}")]
    Rejected(String),

    #[error("event streams were already taken")]
    AlreadySubscribed,
}

/// Receipt of an accepted `submitBlock` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Hex encoded root-chain transaction hash.
    pub transaction_hash: String,
    /// Child block number the contract recorded the root under.
    pub block_number: BlockNumber,
}

/// A deposit confirmed on the root chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCreated {
    pub owner: Address,
    pub amount: u64,
    pub block_number: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSubmitted {
    pub block_root: MerkleRoot,
}

/// An exit started on the root chain for one child-chain output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStarted {
    pub owner: Address,
    pub block_number: BlockNumber,
    pub tx_index: u64,
    pub output_index: OutputIndex,
}

/// One ordered stream per event type.
#[derive(Debug)]
pub struct RootChainEvents {
    pub deposits: mpsc::UnboundedReceiver<DepositCreated>,
    pub submissions: mpsc::UnboundedReceiver<BlockSubmitted>,
    pub exits: mpsc::UnboundedReceiver<ExitStarted>,
}

#[async_trait]
pub trait RootChain: Send + Sync + 'static {
    /// Commit a child block root.
    async fn submit_block(&self, root: MerkleRoot) -> Result<SubmissionReceipt, RootChainError>;

    /// Take the event streams. Streams can be taken once.
    async fn subscribe(&self) -> Result<RootChainEvents, RootChainError>;
}

struct Senders {
    deposits: mpsc::UnboundedSender<DepositCreated>,
    submissions: mpsc::UnboundedSender<BlockSubmitted>,
    exits: mpsc::UnboundedSender<ExitStarted>,
}

struct Inner {
    child_block_interval: u64,
    current_child_block: u64,
    /// Offset of the next deposit below `current_child_block`, starting at 1.
    current_deposit_block: u64,
    submitted: Vec<(BlockNumber, MerkleRoot)>,
    failures_remaining: usize,
    submit_calls: usize,
    senders: Senders,
    events: Option<RootChainEvents>,
}

/// Root chain kept in process memory.
pub struct InMemoryRootChain {
    inner: Mutex<Inner>,
}

impl InMemoryRootChain {
    pub fn new(child_block_interval: u64) -> Self {
        let (deposits_tx, deposits) = mpsc::unbounded_channel();
        let (submissions_tx, submissions) = mpsc::unbounded_channel();
        let (exits_tx, exits) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                child_block_interval,
                current_child_block: child_block_interval,
                current_deposit_block: 1,
                submitted: Vec::new(),
                failures_remaining: 0,
                submit_calls: 0,
                senders: Senders {
                    deposits: deposits_tx,
                    submissions: submissions_tx,
                    exits: exits_tx,
                },
                events: Some(RootChainEvents {
                    deposits,
                    submissions,
                    exits,
                }),
            }),
        }
    }

    /// Fail the next `n` calls to `submit_block` with a transport error.
    pub async fn fail_next_submissions(&self, n: usize) {
        self.inner.lock().await.failures_remaining = n;
    }

    /// Record a deposit and emit `DepositCreated` with the assigned block number.
    pub async fn deposit(
        &self,
        owner: Address,
        amount: u64,
    ) -> Result<BlockNumber, RootChainError> {
        let mut inner = self.inner.lock().await;
        if inner.current_deposit_block >= inner.child_block_interval {
            return Err(RootChainError::Rejected(
                "too many deposits before the next child block".into(),
            ));
        }
        let block_number = BlockNumber(
            inner.current_child_block - inner.child_block_interval + inner.current_deposit_block,
        );
        inner.current_deposit_block += 1;
        let _ = inner.senders.deposits.send(DepositCreated {
            owner,
            amount,
            block_number,
        });
        Ok(block_number)
    }

    /// Emit `ExitStarted` for an output.
    pub async fn start_exit(
        &self,
        owner: Address,
        block_number: BlockNumber,
        tx_index: u64,
        output_index: OutputIndex,
    ) {
        let inner = self.inner.lock().await;
        let _ = inner.senders.exits.send(ExitStarted {
            owner,
            block_number,
            tx_index,
            output_index,
        });
    }

    /// Roots accepted so far, with the child block number each was recorded under.
    pub async fn submitted_blocks(&self) -> Vec<(BlockNumber, MerkleRoot)> {
        self.inner.lock().await.submitted.clone()
    }

    /// Number of `submit_block` calls, failed ones included.
    pub async fn submit_calls(&self) -> usize {
        self.inner.lock().await.submit_calls
    }

    pub async fn current_child_block(&self) -> BlockNumber {
        BlockNumber(self.inner.lock().await.current_child_block)
    }
}

#[async_trait]
impl RootChain for InMemoryRootChain {
    async fn submit_block(&self, root: MerkleRoot) -> Result<SubmissionReceipt, RootChainError> {
        let mut inner = self.inner.lock().await;
        inner.submit_calls += 1;
        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(RootChainError::Transport("injected failure".into()));
        }

        let block_number = BlockNumber(inner.current_child_block);
        inner.submitted.push((block_number, root));
        inner.current_child_block += inner.child_block_interval;
        inner.current_deposit_block = 1;
        let _ = inner
            .senders
            .submissions
            .send(BlockSubmitted { block_root: root });

        let tx_hash = plasma_core::keccak256_concat(&[
            root.as_ref(),
            block_number.value().to_be_bytes().as_slice(),
        ]);
        Ok(SubmissionReceipt {
            transaction_hash: hex::encode(tx_hash),
            block_number,
        })
    }

    async fn subscribe(&self) -> Result<RootChainEvents, RootChainError> {
        self.inner
            .lock()
            .await
            .events
            .take()
            .ok_or(RootChainError::AlreadySubscribed)
    }
}
