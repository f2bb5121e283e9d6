//! Operator node orchestration.
//!
//! Three activity sources share the chain and the pool: the block production timer,
//! transaction submissions and root-chain event handlers. All of them go through one
//! `tokio::sync::Mutex`, which is never held across a root-chain call.

use crate::backoff::SubmissionBackoff;
use crate::config::{NodeConfig, SubmissionPolicy};
use crate::root_chain::{
    BlockSubmitted, DepositCreated, ExitStarted, RootChain, RootChainError, RootChainEvents,
    SubmissionReceipt,
};
use plasma_chain::{
    Chain, ChainError, MarkExitResult, Mempool, MempoolError, MempoolStats,
    TransactionVerificationService, VerificationResult,
};
use plasma_core::{
    Address, Block, BlockNumber, MerkleRoot, Output, Transaction, TransactionHash,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("submission of block {number} failed: {source}")]
    Submission {
        number: BlockNumber,
        source: RootChainError,
    },

    #[error(transparent)]
    RootChain(#[from] RootChainError),

    #[error("api server: {0}")]
    Api(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// A child block appended to the chain whose root is not yet on the root chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSubmission {
    number: BlockNumber,
    root: MerkleRoot,
}

/// State shared by every activity source.
pub struct NodeState {
    pub chain: Chain,
    pub pool: Mempool,
    pending: Option<PendingSubmission>,
}

/// Outcome of one block production tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProduceOutcome {
    /// The pool held nothing to include.
    Idle,
    Produced {
        number: BlockNumber,
        root: MerkleRoot,
        transactions: usize,
    },
    /// The block is on the chain but its root could not be submitted yet.
    Deferred { number: BlockNumber },
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub operator: Address,
    pub latest_block: BlockNumber,
    pub next_child_block: BlockNumber,
    pub pending_submission: Option<BlockNumber>,
    pub mempool: MempoolStats,
}

/// The operator node.
pub struct Node<R> {
    state: Arc<Mutex<NodeState>>,
    root_chain: Arc<R>,
    verifier: TransactionVerificationService,
    block_interval: Duration,
    max_block_size: usize,
    submission: SubmissionPolicy,
}

impl<R> Clone for Node<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            root_chain: Arc::clone(&self.root_chain),
            verifier: self.verifier,
            block_interval: self.block_interval,
            max_block_size: self.max_block_size,
            submission: self.submission.clone(),
        }
    }
}

impl<R: RootChain> Node<R> {
    /// Create a node with a fresh chain for `operator`.
    pub fn new(operator: Address, root_chain: Arc<R>, config: &NodeConfig) -> Self {
        let state = NodeState {
            chain: Chain::with_child_block_interval(operator, config.child_block_interval),
            pool: Mempool::with_config(config.mempool.clone()),
            pending: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            root_chain,
            verifier: TransactionVerificationService::new(),
            block_interval: config.block_interval(),
            max_block_size: config.max_block_size,
            submission: config.submission.clone(),
        }
    }

    pub fn root_chain(&self) -> &Arc<R> {
        &self.root_chain
    }

    /// Direct access to the shared state.
    pub fn state(&self) -> &Arc<Mutex<NodeState>> {
        &self.state
    }

    /// Verify a transaction against the current chain and append it to the pool.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<TransactionHash> {
        let mut state = self.state.lock().await;
        let tx_hash = tx.hash();
        let verdict = self.verifier.verify(&state.chain.snapshot(), &tx);
        if let VerificationResult::Failure(reason) = verdict {
            tracing::debug!(tx_hash = %tx_hash, %reason, "transaction rejected");
            return Err(NodeError::Rejected(reason));
        }
        state.pool.add(tx)?;
        tracing::debug!(tx_hash = %tx_hash, pool_size = state.pool.len(), "transaction accepted");
        Ok(tx_hash)
    }

    /// Run one block production tick.
    ///
    /// A block left pending by an earlier tick is submitted first; no new block is
    /// produced while it stays pending.
    pub async fn produce_block(&self) -> Result<ProduceOutcome> {
        let pending = self.state.lock().await.pending;
        if let Some(pending) = pending {
            if !self.submit(pending).await? {
                return Ok(ProduceOutcome::Deferred {
                    number: pending.number,
                });
            }
        }

        let block = {
            let mut state = self.state.lock().await;
            let NodeState { chain, pool, .. } = &mut *state;

            let candidates = pool.snapshot(self.max_block_size);
            if candidates.is_empty() {
                return Ok(ProduceOutcome::Idle);
            }

            // The chain may have moved since admission (exits, earlier blocks).
            let number = chain.next_child_block_number();
            let snapshot = chain.snapshot();
            let (verified, mut stale): (Vec<_>, Vec<_>) = candidates
                .into_iter()
                .partition(|tx| self.verifier.verify(&snapshot, tx).is_success());
            let (included, conflicting) = chain.partition_appendable(number, verified);
            for (tx, err) in conflicting {
                tracing::warn!(
                    tx_hash = %tx.hash(),
                    error = %err,
                    "dropping transaction that conflicts with the chain"
                );
                stale.push(tx);
            }
            let stale: Vec<_> = stale.iter().map(Transaction::hash).collect();
            if !stale.is_empty() {
                tracing::warn!(
                    count = stale.len(),
                    "dropping pooled transactions that no longer verify"
                );
                pool.remove_batch(&stale);
            }
            if included.is_empty() {
                return Ok(ProduceOutcome::Idle);
            }

            let hashes: Vec<_> = included.iter().map(Transaction::hash).collect();
            let block = Block::new(chain.latest_block().hash(), number, included);
            // Out of the pool before the append, so a failed append is never rebuilt.
            pool.remove_batch(&hashes);
            chain.add(block.clone())?;
            state.pending = Some(PendingSubmission {
                number: block.number,
                root: block.merkle_root(),
            });
            block
        };

        tracing::info!(
            number = block.number.value(),
            hash = %block.hash(),
            root = %block.merkle_root(),
            transactions = block.tx_count(),
            "produced child block"
        );

        let pending = PendingSubmission {
            number: block.number,
            root: block.merkle_root(),
        };
        if self.submit(pending).await? {
            Ok(ProduceOutcome::Produced {
                number: block.number,
                root: block.merkle_root(),
                transactions: block.tx_count(),
            })
        } else {
            Ok(ProduceOutcome::Deferred {
                number: block.number,
            })
        }
    }

    /// Submit a pending block root. Returns false when the retry policy gave up.
    async fn submit(&self, pending: PendingSubmission) -> Result<bool> {
        match self.submit_with_policy(pending.root).await {
            Ok(receipt) => {
                let mut state = self.state.lock().await;
                if receipt.block_number != pending.number {
                    tracing::warn!(
                        expected = pending.number.value(),
                        recorded = receipt.block_number.value(),
                        "root chain recorded the block under a different number"
                    );
                }
                state.chain.update_next_child_block_number();
                state.pending = None;
                tracing::info!(
                    number = pending.number.value(),
                    tx_hash = %receipt.transaction_hash,
                    "submitted block root"
                );
                Ok(true)
            }
            Err(source) => match self.submission {
                SubmissionPolicy::Fatal => Err(NodeError::Submission {
                    number: pending.number,
                    source,
                }),
                SubmissionPolicy::Retry { .. } => {
                    tracing::error!(
                        number = pending.number.value(),
                        error = %source,
                        "block submission exhausted retries; will retry next tick"
                    );
                    Ok(false)
                }
            },
        }
    }

    async fn submit_with_policy(
        &self,
        root: MerkleRoot,
    ) -> std::result::Result<SubmissionReceipt, RootChainError> {
        let (max_attempts, initial_backoff_ms) = match self.submission {
            SubmissionPolicy::Fatal => return self.root_chain.submit_block(root).await,
            SubmissionPolicy::Retry {
                max_attempts,
                initial_backoff_ms,
            } => (max_attempts.max(1), initial_backoff_ms),
        };

        let mut backoff = SubmissionBackoff::new(Duration::from_millis(initial_backoff_ms));
        let mut attempt = 1;
        loop {
            match self.root_chain.submit_block(root).await {
                Ok(receipt) => return Ok(receipt),
                Err(err) if attempt >= max_attempts => return Err(err),
                Err(err) => {
                    let sleep = backoff.next_delay();
                    tracing::warn!(
                        attempt,
                        error = %err,
                        backoff_ms = sleep.as_millis() as u64,
                        "block submission failed"
                    );
                    tokio::time::sleep(sleep).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Append a deposit block minting the deposited amount to its owner.
    pub async fn handle_deposit(&self, event: DepositCreated) -> Result<Block> {
        let mut state = self.state.lock().await;
        let coinbase = format!("deposit:{}", event.block_number.value());
        let tx = Transaction::generation(coinbase.as_str(), Output::new(event.amount, event.owner));
        let block = Block::deposit(state.chain.latest_block().hash(), event.block_number, tx);
        state.chain.add(block.clone())?;
        tracing::info!(
            number = event.block_number.value(),
            owner = %event.owner,
            amount = event.amount,
            "applied deposit"
        );
        Ok(block)
    }

    /// Lock an output whose exit started on the root chain.
    pub async fn handle_exit_started(&self, event: ExitStarted) -> MarkExitResult {
        let mut state = self.state.lock().await;
        let result = state.chain.mark_as_exit_started(
            event.block_number,
            event.tx_index,
            event.output_index,
        );
        match result {
            MarkExitResult::Success(outpoint) => {
                tracing::info!(%outpoint, owner = %event.owner, "exit started");
                if let Some(tx_hash) = state.pool.evict_spending(&outpoint) {
                    tracing::info!(
                        %tx_hash,
                        %outpoint,
                        "evicted pooled transaction spending an exiting output"
                    );
                }
            }
            MarkExitResult::NotFound(reason) => {
                tracing::warn!(
                    block = event.block_number.value(),
                    tx_index = event.tx_index,
                    output_index = %event.output_index,
                    %reason,
                    "exit references an unknown output"
                );
            }
        }
        result
    }

    /// Observe a root-chain block submission. No state changes.
    pub async fn handle_block_submitted(&self, event: BlockSubmitted) {
        let state = self.state.lock().await;
        let known = state
            .chain
            .blocks()
            .find(|block| block.merkle_root() == event.block_root)
            .map(|block| block.number);
        match known {
            Some(number) => tracing::debug!(
                number = number.value(),
                root = %event.block_root,
                "block submission confirmed"
            ),
            None => tracing::warn!(root = %event.block_root, "submission of unknown block root"),
        }
    }

    pub async fn genesis_block(&self) -> Block {
        self.state.lock().await.chain.genesis_block().clone()
    }

    pub async fn latest_block(&self) -> Block {
        self.state.lock().await.chain.latest_block().clone()
    }

    pub async fn block(&self, number: BlockNumber) -> Option<Block> {
        self.state.lock().await.chain.block(number).cloned()
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.lock().await;
        NodeStatus {
            operator: state.chain.operator(),
            latest_block: state.chain.latest_block().number,
            next_child_block: state.chain.next_child_block_number(),
            pending_submission: state.pending.map(|p| p.number),
            mempool: state.pool.stats(),
        }
    }

    /// Spawn one task per event stream. Each event is handled to completion before the
    /// next one on the same stream; a failing event is logged and skipped.
    pub fn spawn_event_handlers(&self, events: RootChainEvents) -> Vec<JoinHandle<()>> {
        let RootChainEvents {
            mut deposits,
            mut submissions,
            mut exits,
        } = events;

        let node = self.clone();
        let deposit_task = tokio::spawn(async move {
            while let Some(event) = deposits.recv().await {
                let number = event.block_number;
                if let Err(err) = node.handle_deposit(event).await {
                    tracing::error!(
                        number = number.value(),
                        error = %err,
                        "failed to apply deposit"
                    );
                }
            }
        });

        let node = self.clone();
        let submission_task = tokio::spawn(async move {
            while let Some(event) = submissions.recv().await {
                node.handle_block_submitted(event).await;
            }
        });

        let node = self.clone();
        let exit_task = tokio::spawn(async move {
            while let Some(event) = exits.recv().await {
                node.handle_exit_started(event).await;
            }
        });

        vec![deposit_task, submission_task, exit_task]
    }

    /// Run until `shutdown` resolves or a fatal submission error occurs.
    pub async fn run<F>(self, api: Option<tokio::net::TcpListener>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let events = self.root_chain.subscribe().await?;
        let mut tasks = self.spawn_event_handlers(events);

        if let Some(listener) = api {
            tracing::info!(addr = ?listener.local_addr().ok(), "api server listening");
            let router = crate::api::router(self.clone());
            tasks.push(tokio::spawn(async move {
                if let Err(err) = axum::serve(listener, router).await {
                    tracing::error!(error = %err, "api server stopped");
                }
            }));
        }

        let mut interval = tokio::time::interval(self.block_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    break Ok(());
                }
                _ = interval.tick() => {
                    match self.produce_block().await {
                        Ok(outcome) => tracing::trace!(?outcome, "block tick"),
                        Err(err @ NodeError::Submission { .. }) => {
                            tracing::error!(error = %err, "stopping node");
                            break Err(err);
                        }
                        Err(err) => tracing::error!(error = %err, "block production failed"),
                    }
                }
            }
        };

        for task in tasks {
            task.abort();
        }
        result
    }
}
