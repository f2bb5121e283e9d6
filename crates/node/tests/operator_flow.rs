use plasma_chain::MarkExitResult;
use plasma_core::{
    Address, BlockNumber, Input, KeyPair, OutPoint, Output, OutputIndex, Transaction,
};
use plasma_node::{
    InMemoryRootChain, Node, NodeConfig, ProduceOutcome, RootChain, SubmissionPolicy,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> NodeConfig {
    NodeConfig {
        block_interval_ms: 20,
        submission: SubmissionPolicy::Retry {
            max_attempts: 3,
            initial_backoff_ms: 1,
        },
        ..NodeConfig::default()
    }
}

fn new_node(config: &NodeConfig) -> Node<InMemoryRootChain> {
    let operator = KeyPair::generate();
    let root_chain = Arc::new(InMemoryRootChain::new(config.child_block_interval));
    Node::new(operator.address(), root_chain, config)
}

/// Poll until `check` holds or a second has passed.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn pay(from: &KeyPair, outpoint: OutPoint, to: Address, amount: u64) -> Transaction {
    Transaction::new(
        vec![Input::spend(outpoint, from)],
        vec![Output::new(amount, to)],
    )
    .unwrap()
}

#[tokio::test]
async fn test_deposit_event_creates_queryable_block() {
    let node = new_node(&test_config());
    let events = node.root_chain().subscribe().await.unwrap();
    let _tasks = node.spawn_event_handlers(events);
    let node = &node;

    let owner = Address::from_bytes([7u8; 20]);
    let number = node.root_chain().deposit(owner, 100).await.unwrap();
    assert_eq!(number, BlockNumber(1));

    assert!(eventually(move || async move { node.block(number).await.is_some() }).await);
    let block = node.block(number).await.unwrap();
    assert_eq!(block.transactions.len(), 1);
    assert!(block.transactions[0].is_generation());
    assert_eq!(block.transactions[0].outputs(), &[Output::new(100, owner)]);
}

#[tokio::test]
async fn test_end_to_end_block_production() {
    let node = new_node(&test_config());
    let events = node.root_chain().subscribe().await.unwrap();
    let _tasks = node.spawn_event_handlers(events);
    let node = &node;

    const N: usize = 4;
    let senders: Vec<KeyPair> = (0..N).map(|_| KeyPair::generate()).collect();
    let recipient = KeyPair::generate();
    for sender in &senders {
        node.root_chain().deposit(sender.address(), 50).await.unwrap();
    }
    let applied = eventually(move || async move {
        node.latest_block().await.number == BlockNumber(N as u64)
    })
    .await;
    assert!(applied);

    let mut submitted = Vec::new();
    for (i, sender) in senders.iter().enumerate() {
        let deposit = node.block(BlockNumber(i as u64 + 1)).await.unwrap();
        let funding = OutPoint::new(deposit.transactions[0].hash(), OutputIndex::FIRST);
        let tx = pay(sender, funding, recipient.address(), 50);
        node.add_transaction(tx.clone()).await.unwrap();
        submitted.push(tx);
    }

    let outcome = node.produce_block().await.unwrap();
    assert!(matches!(
        outcome,
        ProduceOutcome::Produced { number, transactions: N, .. } if number == BlockNumber(1000)
    ));

    let block = node.block(BlockNumber(1000)).await.unwrap();
    assert_eq!(block.transactions, submitted);
    assert_eq!(node.status().await.mempool.total_transactions, 0);
    assert_eq!(node.latest_block().await, block);

    let state = node.state().lock().await;
    let snapshot = state.chain.snapshot();
    for tx in &submitted {
        let output = snapshot.find_output(tx.hash(), OutputIndex::FIRST).unwrap();
        assert_eq!(output.address, recipient.address());
    }
    // Funding outputs are spent now.
    for tx in &submitted {
        let spent = tx.spent_outpoints().next().unwrap();
        assert!(snapshot.find(spent).is_none());
    }
}

#[tokio::test]
async fn test_exit_event_locks_output() {
    let node = new_node(&test_config());
    let events = node.root_chain().subscribe().await.unwrap();
    let _tasks = node.spawn_event_handlers(events);
    let node = &node;

    let alice = KeyPair::generate();
    let number = node.root_chain().deposit(alice.address(), 10).await.unwrap();
    assert!(eventually(move || async move { node.block(number).await.is_some() }).await);
    let funding = OutPoint::new(
        node.block(number).await.unwrap().transactions[0].hash(),
        OutputIndex::FIRST,
    );

    node.root_chain()
        .start_exit(alice.address(), number, 0, OutputIndex::FIRST)
        .await;
    let locked = eventually(move || async move {
        let state = node.state().lock().await;
        let exiting = state
            .chain
            .snapshot()
            .find(&funding)
            .map_or(false, |o| o.exit_started());
        exiting
    })
    .await;
    assert!(locked);

    let err = node
        .add_transaction(pay(&alice, funding, alice.address(), 10))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exit procedure"));

    // A second exit for the same output is harmless.
    assert!(matches!(
        node.state()
            .lock()
            .await
            .chain
            .mark_as_exit_started(number, 0, OutputIndex::FIRST),
        MarkExitResult::Success(_)
    ));
}

#[tokio::test]
async fn test_run_produces_blocks_until_shutdown() {
    let node = new_node(&test_config());
    let root_chain = Arc::clone(node.root_chain());
    let alice = KeyPair::generate();
    root_chain.deposit(alice.address(), 25).await.unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = tokio::spawn(node.clone().run(None, async move {
        let _ = stop_rx.await;
    }));
    let node = &node;
    let root_chain = &root_chain;

    let deposited =
        eventually(move || async move { node.block(BlockNumber(1)).await.is_some() }).await;
    assert!(deposited);
    let funding = OutPoint::new(
        node.block(BlockNumber(1)).await.unwrap().transactions[0].hash(),
        OutputIndex::FIRST,
    );
    node.add_transaction(pay(&alice, funding, alice.address(), 25))
        .await
        .unwrap();

    let submitted = eventually(move || async move {
        root_chain.submitted_blocks().await.len() == 1
    })
    .await;
    assert!(submitted);
    assert!(node.block(BlockNumber(1000)).await.is_some());

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("node stops after shutdown")
        .unwrap();
    assert!(result.is_ok());
}
