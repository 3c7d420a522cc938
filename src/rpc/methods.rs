//! RPC method implementations.
//!
//! Each method corresponds to a JSON-RPC call that external apps can
//! make. Consensus rejections come back as JSON-RPC error objects with
//! the failure reason as the message; nothing here panics.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::crypto::{Address, Hash};
use crate::ledger::{Transaction, TxKind};
use crate::consensus::Block;
use crate::mining::mine_once;
use crate::node::Node;
use crate::p2p::PeerBook;
use crate::wallet::{Wallet, WalletError};

/// JSON-RPC 2.0 request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Value,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC error object
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// Shared state behind the RPC handlers
pub struct RpcState {
    pub node: Arc<Node>,
    pub wallet: Arc<Mutex<Wallet>>,
    pub peers: Arc<Mutex<PeerBook>>,
    /// Where `getnewaddress` persists the wallet, when set
    pub wallet_path: Option<PathBuf>,
}

/// Process a JSON-RPC request and return a response
pub async fn handle_request(state: &RpcState, request: JsonRpcRequest) -> JsonRpcResponse {
    let JsonRpcRequest {
        method, params, id, ..
    } = request;

    match method.as_str() {
        "getinfo" => get_info(state, id).await,
        "getblockcount" => get_block_count(state, id).await,
        "getblock" => get_block(state, id, params).await,
        "getbalance" => get_balance(state, id, params).await,
        "getconfirmations" => get_confirmations(state, id, params).await,
        "sendtransaction" => send_transaction(state, id, params).await,
        "sendtoaddress" => send_to_address(state, id, params).await,
        "getnewaddress" => get_new_address(state, id).await,
        "mine" => mine(state, id, params).await,
        "getmempool" => get_mempool(state, id).await,
        "getpeers" => get_peers(state, id).await,
        _ => JsonRpcResponse::error(id, -32601, format!("Method not found: {}", method)),
    }
}

/// Returns general node information
async fn get_info(state: &RpcState, id: Value) -> JsonRpcResponse {
    let head = state.node.head_info().await;

    let info = json!({
        "chain": "tin-main",
        "blocks": head.index,
        "head": head.hash.to_string(),
        "cumulative_difficulty": head.cumulative_difficulty.to_string(),
        "next_difficulty": state.node.next_difficulty().await,
        "mempool_size": state.node.mempool_len().await,
        "peers": state.peers.lock().await.connected_count(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    JsonRpcResponse::success(id, info)
}

/// Returns the index of the head block
async fn get_block_count(state: &RpcState, id: Value) -> JsonRpcResponse {
    let head = state.node.head_info().await;
    JsonRpcResponse::success(id, json!(head.index))
}

/// Returns full block data at a given index
async fn get_block(state: &RpcState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let index = match &params {
        Some(Value::Array(arr)) if !arr.is_empty() => arr[0].as_u64(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    };
    let index = match index {
        Some(index) => index,
        None => {
            return JsonRpcResponse::error(id, -32602, "Invalid params: expected block index".into())
        }
    };

    match state.node.block_at(index).await {
        Some(block) => JsonRpcResponse::success(id, block_json(&block)),
        None => JsonRpcResponse::error(id, -8, format!("Block index {} out of range", index)),
    }
}

/// Returns the spendable balance of an address, in base units
async fn get_balance(state: &RpcState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let address_str = match params {
        Some(Value::Array(arr)) if !arr.is_empty() => {
            arr[0].as_str().unwrap_or("").to_string()
        }
        Some(Value::String(s)) => s,
        _ => return JsonRpcResponse::error(id, -32602, "Invalid params: expected address".into()),
    };

    let address: Address = match address_str.parse() {
        Ok(a) => a,
        Err(_) => return JsonRpcResponse::error(id, -5, "Invalid address".into()),
    };

    let balance = state.node.balance_of(&address).await;
    JsonRpcResponse::success(id, json!(balance))
}

/// Returns the confirmation count of a mined transaction
async fn get_confirmations(state: &RpcState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let txid_str = match params {
        Some(Value::Array(arr)) if !arr.is_empty() => {
            arr[0].as_str().unwrap_or("").to_string()
        }
        Some(Value::String(s)) => s,
        _ => {
            return JsonRpcResponse::error(id, -32602, "Invalid params: expected transaction id".into())
        }
    };

    let txid = match Hash::from_hex(&txid_str) {
        Ok(h) => h,
        Err(_) => return JsonRpcResponse::error(id, -5, "Invalid transaction id".into()),
    };

    match state.node.confirmations(&txid).await {
        Some(count) => JsonRpcResponse::success(id, json!(count)),
        None => JsonRpcResponse::error(id, -5, "Transaction not found".into()),
    }
}

/// Submit an externally built transaction
async fn send_transaction(state: &RpcState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let value = match params {
        Some(Value::Array(arr)) if !arr.is_empty() => arr[0].clone(),
        Some(v @ Value::Object(_)) => v,
        _ => {
            return JsonRpcResponse::error(id, -32602, "Invalid params: expected transaction".into())
        }
    };

    let tx: Transaction = match serde_json::from_value(value) {
        Ok(tx) => tx,
        Err(e) => {
            return JsonRpcResponse::error(id, -22, format!("Failed to decode transaction: {}", e))
        }
    };

    let txid = tx.id;
    match state.node.submit_transaction(tx).await {
        Ok(_) => JsonRpcResponse::success(id, json!(txid.to_string())),
        Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
    }
}

/// Build a transfer from the node wallet and submit it
async fn send_to_address(state: &RpcState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let (address_str, amount) = match &params {
        Some(Value::Array(arr)) if arr.len() >= 2 => {
            match (arr[0].as_str(), arr[1].as_u64()) {
                (Some(a), Some(n)) => (a.to_string(), n),
                _ => {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        "Invalid params: [address, amount]".into(),
                    )
                }
            }
        }
        _ => return JsonRpcResponse::error(id, -32602, "Invalid params: [address, amount]".into()),
    };

    let to: Address = match address_str.parse() {
        Ok(a) => a,
        Err(_) => return JsonRpcResponse::error(id, -5, "Invalid recipient address".into()),
    };

    let tx = {
        let wallet = state.wallet.lock().await;
        let utxo = state.node.utxo_snapshot().await;
        match wallet.create_transaction(&utxo, to, amount) {
            Ok(tx) => tx,
            Err(WalletError::InsufficientFunds { have, need }) => {
                return JsonRpcResponse::error(
                    id,
                    -6,
                    format!("Insufficient funds: have {}, need {}", have, need),
                )
            }
            Err(e) => return JsonRpcResponse::error(id, -1, e.to_string()),
        }
    };

    let txid = tx.id;
    match state.node.submit_transaction(tx).await {
        Ok(_) => JsonRpcResponse::success(id, json!(txid.to_string())),
        Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
    }
}

/// Generates a new wallet address
async fn get_new_address(state: &RpcState, id: Value) -> JsonRpcResponse {
    let mut wallet = state.wallet.lock().await;
    let address = wallet.generate_key();

    if let Some(path) = &state.wallet_path {
        if let Err(e) = wallet.save(path) {
            log::error!("failed to save wallet: {}", e);
        }
    }
    JsonRpcResponse::success(id, json!(address.to_string()))
}

/// Mine one block, paying the reward to the given address or to the
/// node wallet
async fn mine(state: &RpcState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let reward_address = match &params {
        Some(Value::Array(arr)) if !arr.is_empty() => {
            match arr[0].as_str().map(str::parse::<Address>) {
                Some(Ok(address)) => Some(address),
                _ => return JsonRpcResponse::error(id, -5, "Invalid reward address".into()),
            }
        }
        _ => None,
    };
    let reward_address = match reward_address {
        Some(address) => address,
        None => match state.wallet.lock().await.first_address() {
            Some(address) => address,
            None => {
                return JsonRpcResponse::error(
                    id,
                    -1,
                    "Wallet has no key; pass a reward address".into(),
                )
            }
        },
    };

    match mine_once(&state.node, reward_address).await {
        Ok(block) => JsonRpcResponse::success(
            id,
            json!({
                "index": block.index,
                "hash": block.hash.to_string(),
            }),
        ),
        Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
    }
}

/// Returns the ids of all pending transactions, oldest first
async fn get_mempool(state: &RpcState, id: Value) -> JsonRpcResponse {
    let ids: Vec<String> = state
        .node
        .mempool_snapshot()
        .await
        .iter()
        .map(|tx| tx.id.to_string())
        .collect();
    JsonRpcResponse::success(id, json!(ids))
}

/// Returns the connected peers and the size of the address book
async fn get_peers(state: &RpcState, id: Value) -> JsonRpcResponse {
    let book = state.peers.lock().await;
    let connected: Vec<Value> = book
        .connected_peers()
        .iter()
        .map(|p| {
            json!({
                "address": p.addr.to_string(),
                "best_index": p.best_index,
            })
        })
        .collect();

    JsonRpcResponse::success(
        id,
        json!({
            "connected": connected,
            "known": book.known_count(),
        }),
    )
}

fn block_json(block: &Block) -> Value {
    json!({
        "index": block.index,
        "hash": block.hash.to_string(),
        "previous_hash": block.previous_hash.to_string(),
        "merkle_root": block.merkle_root().to_string(),
        "timestamp": block.timestamp,
        "difficulty": block.difficulty,
        "nonce": block.nonce,
        "transactions": block.transactions.iter().map(tx_json).collect::<Vec<_>>(),
    })
}

fn tx_json(tx: &Transaction) -> Value {
    json!({
        "id": tx.id.to_string(),
        "kind": match tx.kind {
            TxKind::Regular => "regular",
            TxKind::Reward => "reward",
        },
        "nonce": tx.nonce,
        "inputs": tx.inputs.iter().map(|input| json!({
            "output_id": input.output_id.to_string(),
            "output_index": input.output_index,
            "owner": input.owner.to_string(),
            "signature": hex::encode(input.signature.0),
        })).collect::<Vec<_>>(),
        "outputs": tx.outputs.iter().map(|output| json!({
            "address": output.address.to_string(),
            "amount": output.amount,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;

    fn test_state() -> RpcState {
        let mut wallet = Wallet::new();
        wallet.generate_key();

        RpcState {
            node: Arc::new(Node::new(ChainParams::test())),
            wallet: Arc::new(Mutex::new(wallet)),
            peers: Arc::new(Mutex::new(PeerBook::new(8, 64))),
            wallet_path: None,
        }
    }

    async fn call(state: &RpcState, method: &str, params: Value) -> JsonRpcResponse {
        handle_request(
            state,
            JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                method: method.to_string(),
                params: Some(params),
                id: json!(1),
            },
        )
        .await
    }

    fn result(response: JsonRpcResponse) -> Value {
        assert!(response.error.is_none(), "rpc error: {:?}", response.error);
        response.result.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let state = test_state();
        let response = call(&state, "frobnicate", json!([])).await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_getinfo_reports_genesis() {
        let state = test_state();
        let info = result(call(&state, "getinfo", json!([])).await);

        assert_eq!(info["blocks"], json!(0));
        assert_eq!(info["mempool_size"], json!(0));
        assert_eq!(info["peers"], json!(0));
    }

    #[tokio::test]
    async fn test_mine_advances_block_count() {
        let state = test_state();
        assert_eq!(result(call(&state, "getblockcount", json!([])).await), json!(0));

        let mined = result(call(&state, "mine", json!([])).await);
        assert_eq!(mined["index"], json!(1));
        assert_eq!(result(call(&state, "getblockcount", json!([])).await), json!(1));
    }

    #[tokio::test]
    async fn test_mine_pays_the_wallet() {
        let state = test_state();
        let address = state.wallet.lock().await.first_address().unwrap();

        result(call(&state, "mine", json!([])).await);

        let balance = result(call(&state, "getbalance", json!([address.to_string()])).await);
        assert!(balance.as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_getblock_returns_structure() {
        let state = test_state();
        result(call(&state, "mine", json!([])).await);

        let block = result(call(&state, "getblock", json!([1])).await);
        assert_eq!(block["index"], json!(1));
        assert_eq!(block["transactions"][0]["kind"], json!("reward"));

        let missing = call(&state, "getblock", json!([99])).await;
        assert_eq!(missing.error.unwrap().code, -8);
    }

    #[tokio::test]
    async fn test_getbalance_rejects_garbage_address() {
        let state = test_state();
        let response = call(&state, "getbalance", json!(["not-an-address"])).await;
        assert_eq!(response.error.unwrap().code, -5);
    }

    #[tokio::test]
    async fn test_sendtoaddress_then_confirmations() {
        let state = test_state();
        let sender = state.wallet.lock().await.first_address().unwrap();
        let to = crate::crypto::PrivateKey::generate().address();

        result(call(&state, "mine", json!([])).await);
        let reward = state.node.balance_of(&sender).await;
        let sent = reward / 2;

        let txid = result(call(&state, "sendtoaddress", json!([to.to_string(), sent])).await);
        let txid_str = txid.as_str().unwrap().to_string();

        let mempool = result(call(&state, "getmempool", json!([])).await);
        assert_eq!(mempool, json!([txid_str.clone()]));

        // Unmined transactions have no confirmations yet
        let pending = call(&state, "getconfirmations", json!([txid_str.clone()])).await;
        assert_eq!(pending.error.unwrap().code, -5);

        result(call(&state, "mine", json!([])).await);
        let confirmations = result(call(&state, "getconfirmations", json!([txid_str])).await);
        assert_eq!(confirmations, json!(1));

        // Recipient got the amount; the wallet keeps two rewards minus
        // the spend, change included
        let received = result(call(&state, "getbalance", json!([to.to_string()])).await);
        assert_eq!(received.as_u64().unwrap(), sent);
        let remaining = result(call(&state, "getbalance", json!([sender.to_string()])).await);
        assert_eq!(remaining.as_u64().unwrap(), 2 * reward - sent);
    }

    #[tokio::test]
    async fn test_sendtoaddress_insufficient_funds() {
        let state = test_state();
        let to = crate::crypto::PrivateKey::generate().address();

        let response = call(&state, "sendtoaddress", json!([to.to_string(), 1000])).await;
        assert_eq!(response.error.unwrap().code, -6);
    }

    #[tokio::test]
    async fn test_sendtransaction_roundtrips_json() {
        let state = test_state();
        result(call(&state, "mine", json!([])).await);

        let to = crate::crypto::PrivateKey::generate().address();
        let tx = {
            let wallet = state.wallet.lock().await;
            let utxo = state.node.utxo_snapshot().await;
            wallet.create_transaction(&utxo, to, 1000).unwrap()
        };

        let encoded = serde_json::to_value(&tx).unwrap();
        let txid = result(call(&state, "sendtransaction", json!([encoded])).await);
        assert_eq!(txid, json!(tx.id.to_string()));
        assert_eq!(state.node.mempool_len().await, 1);
    }

    #[tokio::test]
    async fn test_getnewaddress_grows_wallet() {
        let state = test_state();
        let address = result(call(&state, "getnewaddress", json!([])).await);

        let address: Address = address.as_str().unwrap().parse().unwrap();
        assert!(state.wallet.lock().await.contains(&address));
    }

    #[tokio::test]
    async fn test_getpeers_reflects_book() {
        let state = test_state();
        state
            .peers
            .lock()
            .await
            .mark_connected("127.0.0.1:7001".parse().unwrap());

        let peers = result(call(&state, "getpeers", json!([])).await);
        assert_eq!(peers["known"], json!(1));
        assert_eq!(peers["connected"][0]["address"], json!("127.0.0.1:7001"));
    }
}
