//! Transaction pool for pending transactions.
//!
//! The pool stores verified transactions in arrival order until they are included in
//! a child block. Each output may be claimed by at most one pooled transaction.

use plasma_core::{OutPoint, Transaction, TransactionHash};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors that can occur during mempool operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in mempool")]
    DuplicateTransaction,

    #[error("mempool is full (capacity: {0})")]
    MempoolFull(usize),

    #[error("output {outpoint} is already spent by pooled transaction {by}")]
    ConflictingSpend {
        outpoint: OutPoint,
        by: TransactionHash,
    },

    #[error("transaction not found in mempool")]
    TransactionNotFound,
}

pub type Result<T> = std::result::Result<T, MempoolError>;

/// Configuration for the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of transactions in the mempool.
    pub max_transactions: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
        }
    }
}

/// Transaction mempool.
pub struct Mempool {
    config: MempoolConfig,
    /// Transactions indexed by hash.
    transactions: HashMap<TransactionHash, Transaction>,
    /// Hashes in arrival order.
    order: VecDeque<TransactionHash>,
    /// Outputs spent by pooled transactions.
    claims: HashMap<OutPoint, TransactionHash>,
}

impl Mempool {
    /// Create a new mempool with default configuration.
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    /// Create a new mempool with the given configuration.
    pub fn with_config(config: MempoolConfig) -> Self {
        Self {
            config,
            transactions: HashMap::new(),
            order: VecDeque::new(),
            claims: HashMap::new(),
        }
    }

    /// Get the number of transactions in the mempool.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Check if the mempool is empty.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, tx_hash: &TransactionHash) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &TransactionHash) -> Option<&Transaction> {
        self.transactions.get(tx_hash)
    }

    /// The pooled transaction spending `outpoint`, if any.
    pub fn claimed_by(&self, outpoint: &OutPoint) -> Option<TransactionHash> {
        self.claims.get(outpoint).copied()
    }

    /// Add a verified transaction to the back of the pool.
    pub fn add(&mut self, tx: Transaction) -> Result<TransactionHash> {
        let tx_hash = tx.hash();

        if self.contains(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction);
        }

        if self.transactions.len() >= self.config.max_transactions {
            return Err(MempoolError::MempoolFull(self.config.max_transactions));
        }

        if let Some((outpoint, by)) = tx
            .spent_outpoints()
            .find_map(|op| self.claims.get(op).map(|by| (*op, *by)))
        {
            return Err(MempoolError::ConflictingSpend { outpoint, by });
        }

        for outpoint in tx.spent_outpoints() {
            self.claims.insert(*outpoint, tx_hash);
        }
        self.order.push_back(tx_hash);
        self.transactions.insert(tx_hash, tx);

        Ok(tx_hash)
    }

    /// Remove a transaction from the mempool.
    pub fn remove(&mut self, tx_hash: &TransactionHash) -> Result<Transaction> {
        let tx = self.take(tx_hash).ok_or(MempoolError::TransactionNotFound)?;
        self.order.retain(|h| h != tx_hash);
        Ok(tx)
    }

    /// Remove exactly the given transactions, leaving later arrivals in place.
    /// The arrival order is rebuilt once for the whole batch.
    pub fn remove_batch(&mut self, tx_hashes: &[TransactionHash]) {
        let removed: HashSet<TransactionHash> = tx_hashes
            .iter()
            .filter(|hash| self.take(hash).is_some())
            .copied()
            .collect();
        if !removed.is_empty() {
            self.order.retain(|h| !removed.contains(h));
        }
    }

    /// Drop a transaction and its claims without touching the arrival order.
    fn take(&mut self, tx_hash: &TransactionHash) -> Option<Transaction> {
        let tx = self.transactions.remove(tx_hash)?;
        for outpoint in tx.spent_outpoints() {
            self.claims.remove(outpoint);
        }
        Some(tx)
    }

    /// Drop the pooled transaction spending `outpoint`, returning its hash.
    pub fn evict_spending(&mut self, outpoint: &OutPoint) -> Option<TransactionHash> {
        let tx_hash = self.claimed_by(outpoint)?;
        self.remove(&tx_hash).ok().map(|_| tx_hash)
    }

    /// Up to `limit` pooled transactions in arrival order. The pool is not modified.
    pub fn snapshot(&self, limit: usize) -> Vec<Transaction> {
        self.order
            .iter()
            .take(limit)
            .filter_map(|h| self.transactions.get(h).cloned())
            .collect()
    }

    /// Get mempool statistics.
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            total_transactions: self.len(),
            claimed_outputs: self.claims.len(),
            capacity: self.config.max_transactions,
        }
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

/// Mempool statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MempoolStats {
    /// Total number of transactions.
    pub total_transactions: usize,
    /// Number of outputs spent by pooled transactions.
    pub claimed_outputs: usize,
    /// Mempool capacity.
    pub capacity: usize,
}
