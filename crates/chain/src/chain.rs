//! The child-chain ledger.
//!
//! Blocks are kept ordered by number alongside a UTXO index. Outputs consumed by an
//! appended block are recorded as spent and are no longer returned by snapshots.

use plasma_core::{
    Address, Block, BlockHash, BlockNumber, MerkleProof, OutPoint, Output, OutputIndex,
    Transaction, TransactionHash,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Stride between consecutive operator (child) block numbers.
pub const CHILD_BLOCK_INTERVAL: u64 = 1000;

/// Errors raised when appending a block would break a ledger invariant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block number {0} already exists")]
    DuplicateBlockNumber(BlockNumber),

    #[error("block number {number} is not above the last {kind} block {last}")]
    NonIncreasingBlockNumber {
        number: BlockNumber,
        last: BlockNumber,
        kind: BlockKind,
    },

    #[error("block {block} spends unknown output {outpoint}")]
    UnknownOutput {
        block: BlockNumber,
        outpoint: OutPoint,
    },

    #[error("block {block} spends output {outpoint} which is already spent")]
    DoubleSpend {
        block: BlockNumber,
        outpoint: OutPoint,
    },

    #[error("block {block} recreates existing transaction {transaction}")]
    DuplicateTransaction {
        block: BlockNumber,
        transaction: TransactionHash,
    },
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Whether a block was produced by the operator or synthesized from a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Child,
    Deposit,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Child => f.write_str("child"),
            BlockKind::Deposit => f.write_str("deposit"),
        }
    }
}

/// Why an exit could not be matched to an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    UnknownBlock,
    TransactionIndexOutOfRange,
    OutputIndexOutOfRange,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundReason::UnknownBlock => f.write_str("unknown block number"),
            NotFoundReason::TransactionIndexOutOfRange => {
                f.write_str("transaction index out of range")
            }
            NotFoundReason::OutputIndexOutOfRange => f.write_str("output index out of range"),
        }
    }
}

/// Outcome of [`Chain::mark_as_exit_started`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkExitResult {
    Success(OutPoint),
    NotFound(NotFoundReason),
}

#[derive(Debug, Clone, Copy)]
struct OutputLocation {
    block_number: BlockNumber,
    tx_index: usize,
    output_index: OutputIndex,
}

/// Spends and creations accumulated while checking the transactions of one block.
#[derive(Default)]
struct BlockScratch {
    spent: HashSet<OutPoint>,
    created: HashSet<OutPoint>,
    transactions: HashSet<TransactionHash>,
}

/// Ordered blocks, the UTXO index and the child block counter.
#[derive(Debug)]
pub struct Chain {
    operator: Address,
    child_block_interval: u64,
    blocks: BTreeMap<BlockNumber, Block>,
    outputs: HashMap<OutPoint, OutputLocation>,
    /// Spent outputs and the transaction that consumed them.
    spent: HashMap<OutPoint, TransactionHash>,
    next_child_block: u64,
    last_child_block: Option<BlockNumber>,
    last_deposit_block: Option<BlockNumber>,
}

impl Chain {
    /// Create a chain holding only the operator's genesis block.
    pub fn new(operator: Address) -> Self {
        Self::with_child_block_interval(operator, CHILD_BLOCK_INTERVAL)
    }

    pub fn with_child_block_interval(operator: Address, child_block_interval: u64) -> Self {
        assert!(child_block_interval > 0, "child block interval must be positive");
        let genesis = Block::genesis(operator);
        let mut blocks = BTreeMap::new();
        blocks.insert(genesis.number, genesis);
        Self {
            operator,
            child_block_interval,
            blocks,
            outputs: HashMap::new(),
            spent: HashMap::new(),
            next_child_block: child_block_interval,
            last_child_block: None,
            last_deposit_block: None,
        }
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn child_block_interval(&self) -> u64 {
        self.child_block_interval
    }

    pub fn genesis_block(&self) -> &Block {
        &self.blocks[&BlockNumber::GENESIS]
    }

    /// The highest-numbered block.
    pub fn latest_block(&self) -> &Block {
        self.blocks
            .values()
            .next_back()
            .unwrap_or_else(|| self.genesis_block())
    }

    pub fn block(&self, number: BlockNumber) -> Option<&Block> {
        self.blocks.get(&number)
    }

    /// All blocks in ascending number order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Number the next operator block will carry.
    pub fn next_child_block_number(&self) -> BlockNumber {
        BlockNumber(self.next_child_block)
    }

    /// Advance the child block counter by one stride.
    pub fn update_next_child_block_number(&mut self) {
        self.next_child_block += self.child_block_interval;
    }

    /// Read-only view used for verification and queries.
    pub fn snapshot(&self) -> ChainSnapshot<'_> {
        ChainSnapshot { chain: self }
    }

    pub fn kind_of(&self, number: BlockNumber) -> BlockKind {
        if number.is_child(self.child_block_interval) {
            BlockKind::Child
        } else {
            BlockKind::Deposit
        }
    }

    /// Append a block.
    ///
    /// Child and deposit block numbers must each be strictly increasing and never
    /// repeat. Every spent output must be known and unspent. Nothing is mutated on error.
    pub fn add(&mut self, block: Block) -> Result<()> {
        let number = block.number;
        if self.blocks.contains_key(&number) {
            return Err(ChainError::DuplicateBlockNumber(number));
        }

        let kind = self.kind_of(number);
        let last = match kind {
            BlockKind::Child => self.last_child_block,
            BlockKind::Deposit => self.last_deposit_block,
        };
        if let Some(last) = last.filter(|last| number <= *last) {
            return Err(ChainError::NonIncreasingBlockNumber { number, last, kind });
        }

        self.check_spends(&block)?;

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let tx_hash = tx.hash();
            for outpoint in tx.spent_outpoints() {
                self.spent.insert(*outpoint, tx_hash);
            }
            for (outpoint, _) in tx.created_outpoints() {
                self.outputs.insert(
                    outpoint,
                    OutputLocation {
                        block_number: number,
                        tx_index,
                        output_index: outpoint.output_index,
                    },
                );
            }
        }

        match kind {
            BlockKind::Child => self.last_child_block = Some(number),
            BlockKind::Deposit => self.last_deposit_block = Some(number),
        }
        self.blocks.insert(number, block);
        Ok(())
    }

    fn check_spends(&self, block: &Block) -> Result<()> {
        let mut scratch = BlockScratch::default();
        for tx in &block.transactions {
            self.check_transaction(block.number, tx, &mut scratch)?;
        }
        Ok(())
    }

    /// Check one transaction against the chain and the transactions already accepted
    /// into `scratch`. `scratch` is only extended when the check passes.
    fn check_transaction(
        &self,
        number: BlockNumber,
        tx: &Transaction,
        scratch: &mut BlockScratch,
    ) -> Result<()> {
        let mut spent_by_tx = HashSet::new();
        for outpoint in tx.spent_outpoints() {
            let known = self.outputs.contains_key(outpoint) || scratch.created.contains(outpoint);
            if !known {
                return Err(ChainError::UnknownOutput {
                    block: number,
                    outpoint: *outpoint,
                });
            }
            let double = self.spent.contains_key(outpoint)
                || scratch.spent.contains(outpoint)
                || !spent_by_tx.insert(*outpoint);
            if double {
                return Err(ChainError::DoubleSpend {
                    block: number,
                    outpoint: *outpoint,
                });
            }
        }

        let created: Vec<_> = tx.created_outpoints().map(|(outpoint, _)| outpoint).collect();
        let duplicate = scratch.transactions.contains(&tx.hash())
            || created.iter().any(|outpoint| {
                self.outputs.contains_key(outpoint) || scratch.created.contains(outpoint)
            });
        if duplicate {
            return Err(ChainError::DuplicateTransaction {
                block: number,
                transaction: tx.hash(),
            });
        }

        scratch.spent.extend(spent_by_tx);
        scratch.created.extend(created);
        scratch.transactions.insert(tx.hash());
        Ok(())
    }

    /// Split `transactions` into those that can go into block `number` together, in
    /// order, and those that would make [`Chain::add`] fail.
    pub fn partition_appendable(
        &self,
        number: BlockNumber,
        transactions: Vec<Transaction>,
    ) -> (Vec<Transaction>, Vec<(Transaction, ChainError)>) {
        let mut scratch = BlockScratch::default();
        let mut appendable = Vec::with_capacity(transactions.len());
        let mut rejected = Vec::new();
        for tx in transactions {
            match self.check_transaction(number, &tx, &mut scratch) {
                Ok(()) => appendable.push(tx),
                Err(err) => rejected.push((tx, err)),
            }
        }
        (appendable, rejected)
    }

    /// Flag an output as exiting. Calling this twice on the same output is harmless.
    pub fn mark_as_exit_started(
        &mut self,
        block_number: BlockNumber,
        transaction_index: u64,
        output_index: OutputIndex,
    ) -> MarkExitResult {
        let Some(block) = self.blocks.get_mut(&block_number) else {
            return MarkExitResult::NotFound(NotFoundReason::UnknownBlock);
        };
        let tx = usize::try_from(transaction_index)
            .ok()
            .and_then(|i| block.transactions.get_mut(i));
        let Some(tx) = tx else {
            return MarkExitResult::NotFound(NotFoundReason::TransactionIndexOutOfRange);
        };
        if !tx.mark_output_exit_started(output_index) {
            return MarkExitResult::NotFound(NotFoundReason::OutputIndexOutOfRange);
        }
        MarkExitResult::Success(OutPoint::new(tx.hash(), output_index))
    }

    /// Inclusion proof for a transaction, as handed to a user preparing an exit.
    pub fn transaction_proof(
        &self,
        block_number: BlockNumber,
        transaction_index: usize,
    ) -> Option<MerkleProof> {
        self.blocks
            .get(&block_number)?
            .transaction_proof(transaction_index)
    }

    fn output_at(&self, location: &OutputLocation) -> Option<&Output> {
        self.blocks
            .get(&location.block_number)?
            .transactions
            .get(location.tx_index)?
            .output(location.output_index)
    }
}

/// Read-only view of the chain. Holding one borrows the chain, so a snapshot
/// never observes a partially appended block.
#[derive(Clone, Copy)]
pub struct ChainSnapshot<'a> {
    chain: &'a Chain,
}

impl<'a> ChainSnapshot<'a> {
    /// Find an unspent output.
    pub fn find_output(
        &self,
        transaction_hash: TransactionHash,
        output_index: OutputIndex,
    ) -> Option<&'a Output> {
        self.find(&OutPoint::new(transaction_hash, output_index))
    }

    /// Find an unspent output by outpoint.
    pub fn find(&self, outpoint: &OutPoint) -> Option<&'a Output> {
        if self.chain.spent.contains_key(outpoint) {
            return None;
        }
        let location = self.chain.outputs.get(outpoint)?;
        self.chain.output_at(location)
    }

    /// The transaction that spent `outpoint`, if any.
    pub fn spent_by(&self, outpoint: &OutPoint) -> Option<TransactionHash> {
        self.chain.spent.get(outpoint).copied()
    }

    pub fn block(&self, number: BlockNumber) -> Option<&'a Block> {
        self.chain.block(number)
    }

    pub fn latest_block_hash(&self) -> BlockHash {
        self.chain.latest_block().hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_core::{Input, KeyPair};

    fn operator() -> Address {
        Address::from_bytes([9u8; 20])
    }

    fn deposit(chain: &Chain, number: u64, owner: Address, amount: u64) -> Block {
        let tx = Transaction::generation(
            number.to_string().as_str(),
            Output::new(amount, owner),
        );
        Block::deposit(chain.latest_block().hash(), BlockNumber(number), tx)
    }

    fn spend(from: &KeyPair, outpoint: OutPoint, to: Address, amount: u64) -> Transaction {
        Transaction::new(
            vec![Input::spend(outpoint, from)],
            vec![Output::new(amount, to)],
        )
        .unwrap()
    }

    #[test]
    fn test_new_chain_has_genesis() {
        let chain = Chain::new(operator());
        assert_eq!(chain.blocks().count(), 1);
        assert!(chain.genesis_block().is_genesis());
        assert_eq!(chain.latest_block(), chain.genesis_block());
        assert_eq!(chain.genesis_block(), &Block::genesis(operator()));
    }

    #[test]
    fn test_child_block_counter() {
        let mut chain = Chain::new(operator());
        assert_eq!(chain.next_child_block_number(), BlockNumber(1000));
        assert_eq!(chain.next_child_block_number(), BlockNumber(1000));
        chain.update_next_child_block_number();
        assert_eq!(chain.next_child_block_number(), BlockNumber(2000));
    }

    #[test]
    fn test_deposit_output_is_found() {
        let alice = KeyPair::generate();
        let mut chain = Chain::new(operator());
        let block = deposit(&chain, 1, alice.address(), 100);
        let tx_hash = block.transactions[0].hash();
        chain.add(block).unwrap();

        let snapshot = chain.snapshot();
        let output = snapshot.find_output(tx_hash, OutputIndex::FIRST).unwrap();
        assert_eq!(output.amount, 100);
        assert_eq!(output.address, alice.address());
        assert!(snapshot.find_output(tx_hash, OutputIndex::SECOND).is_none());
        assert_eq!(chain.latest_block().number, BlockNumber(1));
    }

    #[test]
    fn test_spent_output_is_not_returned() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut chain = Chain::new(operator());
        let dep = deposit(&chain, 1, alice.address(), 100);
        let funding = OutPoint::new(dep.transactions[0].hash(), OutputIndex::FIRST);
        chain.add(dep).unwrap();

        let tx = spend(&alice, funding, bob.address(), 100);
        let tx_hash = tx.hash();
        let child = Block::new(
            chain.latest_block().hash(),
            chain.next_child_block_number(),
            vec![tx],
        );
        chain.add(child).unwrap();

        let snapshot = chain.snapshot();
        assert!(snapshot.find(&funding).is_none());
        assert_eq!(snapshot.spent_by(&funding), Some(tx_hash));
        assert!(snapshot.find_output(tx_hash, OutputIndex::FIRST).is_some());
    }

    #[test]
    fn test_duplicate_block_number_rejected() {
        let alice = Address::from_bytes([1u8; 20]);
        let mut chain = Chain::new(operator());
        chain.add(deposit(&chain, 1, alice, 10)).unwrap();
        let again = deposit(&chain, 1, alice, 20);
        assert_eq!(
            chain.add(again),
            Err(ChainError::DuplicateBlockNumber(BlockNumber(1)))
        );

        let genesis_clash = Block::new(BlockHash::ZERO, BlockNumber::GENESIS, vec![]);
        assert!(matches!(
            chain.add(genesis_clash),
            Err(ChainError::DuplicateBlockNumber(_))
        ));
    }

    #[test]
    fn test_decreasing_block_numbers_rejected_per_kind() {
        let alice = Address::from_bytes([1u8; 20]);
        let mut chain = Chain::new(operator());
        chain.add(deposit(&chain, 2, alice, 10)).unwrap();
        assert!(matches!(
            chain.add(deposit(&chain, 1, alice, 10)),
            Err(ChainError::NonIncreasingBlockNumber {
                kind: BlockKind::Deposit,
                ..
            })
        ));

        chain
            .add(Block::new(chain.latest_block().hash(), BlockNumber(2000), vec![]))
            .unwrap();
        assert!(matches!(
            chain.add(Block::new(BlockHash::ZERO, BlockNumber(1000), vec![])),
            Err(ChainError::NonIncreasingBlockNumber {
                kind: BlockKind::Child,
                ..
            })
        ));

        // A late deposit below the latest child block is still accepted.
        chain.add(deposit(&chain, 3, alice, 10)).unwrap();
        assert_eq!(chain.latest_block().number, BlockNumber(2000));
    }

    #[test]
    fn test_double_spend_across_blocks_rejected() {
        let alice = KeyPair::generate();
        let bob = Address::from_bytes([2u8; 20]);
        let mut chain = Chain::new(operator());
        let dep = deposit(&chain, 1, alice.address(), 100);
        let funding = OutPoint::new(dep.transactions[0].hash(), OutputIndex::FIRST);
        chain.add(dep).unwrap();

        let first = Block::new(
            BlockHash::ZERO,
            BlockNumber(1000),
            vec![spend(&alice, funding, bob, 100)],
        );
        chain.add(first).unwrap();

        let second = Block::new(
            BlockHash::ZERO,
            BlockNumber(2000),
            vec![spend(&alice, funding, bob, 50)],
        );
        assert_eq!(
            chain.add(second),
            Err(ChainError::DoubleSpend {
                block: BlockNumber(2000),
                outpoint: funding
            })
        );
        assert!(chain.block(BlockNumber(2000)).is_none());
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let alice = KeyPair::generate();
        let bob = Address::from_bytes([2u8; 20]);
        let mut chain = Chain::new(operator());
        let dep = deposit(&chain, 1, alice.address(), 100);
        let funding = OutPoint::new(dep.transactions[0].hash(), OutputIndex::FIRST);
        chain.add(dep).unwrap();

        let block = Block::new(
            BlockHash::ZERO,
            BlockNumber(1000),
            vec![spend(&alice, funding, bob, 100), spend(&alice, funding, bob, 60)],
        );
        assert!(matches!(chain.add(block), Err(ChainError::DoubleSpend { .. })));
        // nothing was applied
        assert!(chain.snapshot().find(&funding).is_some());
    }

    #[test]
    fn test_unknown_output_rejected() {
        let alice = KeyPair::generate();
        let mut chain = Chain::new(operator());
        let missing = OutPoint::new(TransactionHash::digest(b"nowhere"), OutputIndex::FIRST);
        let block = Block::new(
            BlockHash::ZERO,
            BlockNumber(1000),
            vec![spend(&alice, missing, alice.address(), 1)],
        );
        assert!(matches!(chain.add(block), Err(ChainError::UnknownOutput { .. })));
    }

    #[test]
    fn test_mark_as_exit_started() {
        let alice = Address::from_bytes([1u8; 20]);
        let mut chain = Chain::new(operator());
        let dep = deposit(&chain, 1, alice, 100);
        let tx_hash = dep.transactions[0].hash();
        chain.add(dep).unwrap();

        let expected = OutPoint::new(tx_hash, OutputIndex::FIRST);
        assert_eq!(
            chain.mark_as_exit_started(BlockNumber(1), 0, OutputIndex::FIRST),
            MarkExitResult::Success(expected)
        );
        assert!(chain.snapshot().find(&expected).unwrap().exit_started());

        // idempotent
        assert_eq!(
            chain.mark_as_exit_started(BlockNumber(1), 0, OutputIndex::FIRST),
            MarkExitResult::Success(expected)
        );
        assert!(chain.snapshot().find(&expected).unwrap().exit_started());
    }

    #[test]
    fn test_transaction_proof() {
        let alice = Address::from_bytes([1u8; 20]);
        let mut chain = Chain::new(operator());
        chain.add(deposit(&chain, 1, alice, 100)).unwrap();

        let proof = chain.transaction_proof(BlockNumber(1), 0).unwrap();
        let block = chain.block(BlockNumber(1)).unwrap();
        assert!(plasma_core::verify_proof(&block.merkle_root(), &proof));
        assert!(chain.transaction_proof(BlockNumber(1), 1).is_none());
        assert!(chain.transaction_proof(BlockNumber(5), 0).is_none());
        assert!(chain.transaction_proof(BlockNumber::GENESIS, 0).is_none());
    }

    #[test]
    fn test_partition_appendable_drops_conflicts() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = Address::from_bytes([3u8; 20]);
        let mut chain = Chain::new(operator());
        let dep_a = deposit(&chain, 1, alice.address(), 100);
        let funding = OutPoint::new(dep_a.transactions[0].hash(), OutputIndex::FIRST);
        chain.add(dep_a).unwrap();
        let dep_b = deposit(&chain, 2, bob.address(), 50);
        let bobs = OutPoint::new(dep_b.transactions[0].hash(), OutputIndex::FIRST);
        chain.add(dep_b).unwrap();

        let included = spend(&alice, funding, carol, 100);
        chain
            .add(Block::new(
                chain.latest_block().hash(),
                BlockNumber(1000),
                vec![included.clone()],
            ))
            .unwrap();

        let missing = OutPoint::new(TransactionHash::digest(b"missing"), OutputIndex::FIRST);
        let good = spend(&bob, bobs, carol, 50);
        let candidates = vec![
            included,
            good.clone(),
            spend(&bob, bobs, carol, 10),
            spend(&bob, missing, carol, 1),
        ];
        let (appendable, rejected) = chain.partition_appendable(BlockNumber(2000), candidates);

        assert_eq!(appendable, vec![good]);
        let errors: Vec<_> = rejected.into_iter().map(|(_, err)| err).collect();
        assert_eq!(
            errors,
            vec![
                ChainError::DoubleSpend {
                    block: BlockNumber(2000),
                    outpoint: funding
                },
                ChainError::DoubleSpend {
                    block: BlockNumber(2000),
                    outpoint: bobs
                },
                ChainError::UnknownOutput {
                    block: BlockNumber(2000),
                    outpoint: missing
                },
            ]
        );

        let block = Block::new(chain.latest_block().hash(), BlockNumber(2000), appendable);
        assert!(chain.add(block).is_ok());
    }

    #[test]
    fn test_mark_as_exit_started_not_found() {
        let alice = Address::from_bytes([1u8; 20]);
        let mut chain = Chain::new(operator());
        chain.add(deposit(&chain, 1, alice, 100)).unwrap();

        assert_eq!(
            chain.mark_as_exit_started(BlockNumber(7), 0, OutputIndex::FIRST),
            MarkExitResult::NotFound(NotFoundReason::UnknownBlock)
        );
        assert_eq!(
            chain.mark_as_exit_started(BlockNumber(1), 1, OutputIndex::FIRST),
            MarkExitResult::NotFound(NotFoundReason::TransactionIndexOutOfRange)
        );
        assert_eq!(
            chain.mark_as_exit_started(BlockNumber(1), u64::MAX, OutputIndex::FIRST),
            MarkExitResult::NotFound(NotFoundReason::TransactionIndexOutOfRange)
        );
        assert_eq!(
            chain.mark_as_exit_started(BlockNumber(1), 0, OutputIndex::SECOND),
            MarkExitResult::NotFound(NotFoundReason::OutputIndexOutOfRange)
        );
    }
}
