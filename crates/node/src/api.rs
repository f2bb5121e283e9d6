//! HTTP API: transaction submission and block queries.

use crate::node::{Node, NodeError, NodeStatus};
use crate::root_chain::RootChain;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use plasma_core::{Block, BlockHash, BlockNumber, MerkleRoot, Transaction, TransactionHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionView {
    pub hash: TransactionHash,
    pub transaction: Transaction,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockView {
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub previous_block_hash: BlockHash,
    pub merkle_root: MerkleRoot,
    pub transactions: Vec<TransactionView>,
}

impl From<Block> for BlockView {
    fn from(block: Block) -> Self {
        Self {
            number: block.number,
            hash: block.hash(),
            previous_block_hash: block.header.previous_block_hash,
            merkle_root: block.header.merkle_root,
            transactions: block
                .transactions
                .into_iter()
                .map(|tx| TransactionView {
                    hash: tx.hash(),
                    transaction: tx,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message })).into_response()
}

pub fn router<R: RootChain>(node: Node<R>) -> Router {
    Router::new()
        .route("/transactions", post(submit_transaction::<R>))
        .route("/blocks/genesis", get(genesis_block::<R>))
        .route("/blocks/latest", get(latest_block::<R>))
        .route("/blocks/:number", get(block_by_number::<R>))
        .route("/status", get(status::<R>))
        .with_state(node)
}

async fn submit_transaction<R: RootChain>(
    State(node): State<Node<R>>,
    Json(tx): Json<Transaction>,
) -> Response {
    match node.add_transaction(tx).await {
        Ok(hash) => Json(SubmitResponse {
            accepted: true,
            transaction_hash: Some(hash),
            reason: None,
        })
        .into_response(),
        Err(err) => {
            let status = match err {
                NodeError::Mempool(plasma_chain::MempoolError::MempoolFull(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_REQUEST,
            };
            let reason = match err {
                NodeError::Rejected(reason) => reason,
                other => other.to_string(),
            };
            let body = SubmitResponse {
                accepted: false,
                transaction_hash: None,
                reason: Some(reason),
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn genesis_block<R: RootChain>(State(node): State<Node<R>>) -> Json<BlockView> {
    Json(node.genesis_block().await.into())
}

async fn latest_block<R: RootChain>(State(node): State<Node<R>>) -> Json<BlockView> {
    Json(node.latest_block().await.into())
}

async fn block_by_number<R: RootChain>(
    State(node): State<Node<R>>,
    Path(number): Path<u64>,
) -> Response {
    match node.block(BlockNumber(number)).await {
        Some(block) => Json(BlockView::from(block)).into_response(),
        None => not_found(format!("block {number} not found")),
    }
}

async fn status<R: RootChain>(State(node): State<Node<R>>) -> Json<NodeStatus> {
    Json(node.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::root_chain::{DepositCreated, InMemoryRootChain};
    use axum::body::Body;
    use axum::http::Request;
    use plasma_core::{Address, Input, KeyPair, OutPoint, Output, OutputIndex};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn node() -> Node<InMemoryRootChain> {
        let config = NodeConfig::default();
        Node::new(
            Address::from_bytes([9u8; 20]),
            Arc::new(InMemoryRootChain::new(config.child_block_interval)),
            &config,
        )
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &impl Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_genesis_and_latest() {
        let node = node();
        let genesis = node.genesis_block().await;

        let (status, body) = send(router(node.clone()), get("/blocks/genesis")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["number"], 0);
        assert_eq!(body["hash"], genesis.hash().to_string());

        let (_, latest) = send(router(node), get("/blocks/latest")).await;
        assert_eq!(latest, body);
    }

    #[tokio::test]
    async fn test_block_by_number() {
        let node = node();
        let owner = Address::from_bytes([3u8; 20]);
        node.handle_deposit(DepositCreated {
            owner,
            amount: 100,
            block_number: BlockNumber(1),
        })
        .await
        .unwrap();

        let (status, body) = send(router(node.clone()), get("/blocks/1")).await;
        assert_eq!(status, StatusCode::OK);
        let view: BlockView = serde_json::from_value(body).unwrap();
        assert_eq!(view.number, BlockNumber(1));
        assert_eq!(view.transactions.len(), 1);
        assert_eq!(
            view.transactions[0].transaction.outputs(),
            &[Output::new(100, owner)]
        );

        let (status, body) = send(router(node), get("/blocks/5")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "block 5 not found");
    }

    #[tokio::test]
    async fn test_submit_transaction() {
        let node = node();
        let alice = KeyPair::generate();
        let deposit = node
            .handle_deposit(DepositCreated {
                owner: alice.address(),
                amount: 100,
                block_number: BlockNumber(1),
            })
            .await
            .unwrap();
        let funding = OutPoint::new(deposit.transactions[0].hash(), OutputIndex::FIRST);
        let tx = Transaction::new(
            vec![Input::spend(funding, &alice)],
            vec![Output::new(100, alice.address())],
        )
        .unwrap();

        let (status, body) = send(router(node.clone()), post_json("/transactions", &tx)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], true);
        assert_eq!(body["transaction_hash"], tx.hash().to_string());

        let (status, body) = send(router(node.clone()), post_json("/transactions", &tx)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["accepted"], false);

        let mallory = KeyPair::generate();
        let forged = Transaction::new(
            vec![Input::spend(funding, &mallory)],
            vec![Output::new(100, mallory.address())],
        )
        .unwrap();
        let (status, body) = send(router(node.clone()), post_json("/transactions", &forged)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["reason"],
            "the OP_EQUALVERIFY operation detects invalid values"
        );

        let (_, status_body) = send(router(node), get("/status")).await;
        assert_eq!(status_body["mempool"]["total_transactions"], 1);
    }
}
