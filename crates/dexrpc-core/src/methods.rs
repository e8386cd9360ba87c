//! Typed Tendermint RPC calls layered over [`RpcTransport::request`].
//!
//! Every method builds Tendermint's named params, issues one generic request
//! and decodes the result. 64-bit integers are sent as strings; byte params
//! are hex (`abci_query.data`) or base64 (`tx.hash`, `broadcast_tx_*.tx`).

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::RpcError;
use crate::transport::{decode, RpcTransport};
use crate::types::{
    ResultAbciInfo, ResultAbciQuery, ResultBlock, ResultBroadcastTx, ResultBroadcastTxCommit,
    ResultStatus, ResultTx, ResultTxSearch, ResultValidators,
};

fn height_params(height: Option<u64>) -> Value {
    let mut params = Map::new();
    if let Some(h) = height {
        params.insert("height".into(), Value::String(h.to_string()));
    }
    Value::Object(params)
}

fn tx_params(tx: &[u8]) -> Value {
    json!({ "tx": base64::engine::general_purpose::STANDARD.encode(tx) })
}

/// Typed façade over the Tendermint RPC method set.
///
/// Blanket-implemented for every [`RpcTransport`], so the same calls work over
/// a WebSocket session or plain HTTP.
#[async_trait]
pub trait TendermintRpc: RpcTransport {
    async fn status(&self) -> Result<ResultStatus, RpcError> {
        decode(self.request("status", Value::Null).await?)
    }

    /// `health` returns an empty object when the node is up.
    async fn node_health(&self) -> Result<(), RpcError> {
        self.request("health", Value::Null).await.map(|_| ())
    }

    async fn net_info(&self) -> Result<Value, RpcError> {
        self.request("net_info", Value::Null).await
    }

    async fn abci_info(&self) -> Result<ResultAbciInfo, RpcError> {
        decode(self.request("abci_info", Value::Null).await?)
    }

    /// Query application state at `path`. A height of `None` means latest.
    async fn abci_query(
        &self,
        path: &str,
        data: &[u8],
        height: Option<u64>,
        prove: bool,
    ) -> Result<ResultAbciQuery, RpcError> {
        let params = json!({
            "path": path,
            "data": hex::encode(data),
            "height": height.unwrap_or(0).to_string(),
            "prove": prove,
        });
        decode(self.request("abci_query", params).await?)
    }

    async fn block(&self, height: Option<u64>) -> Result<ResultBlock, RpcError> {
        decode(self.request("block", height_params(height)).await?)
    }

    async fn block_results(&self, height: Option<u64>) -> Result<Value, RpcError> {
        self.request("block_results", height_params(height)).await
    }

    async fn validators(&self, height: Option<u64>) -> Result<ResultValidators, RpcError> {
        decode(self.request("validators", height_params(height)).await?)
    }

    async fn tx(&self, hash: &[u8], prove: bool) -> Result<ResultTx, RpcError> {
        let params = json!({
            "hash": base64::engine::general_purpose::STANDARD.encode(hash),
            "prove": prove,
        });
        decode(self.request("tx", params).await?)
    }

    async fn tx_search(
        &self,
        query: &str,
        prove: bool,
        page: u32,
        per_page: u32,
    ) -> Result<ResultTxSearch, RpcError> {
        let params = json!({
            "query": query,
            "prove": prove,
            "page": page.to_string(),
            "per_page": per_page.to_string(),
        });
        decode(self.request("tx_search", params).await?)
    }

    /// Submit without waiting for `CheckTx`.
    async fn broadcast_tx_async(&self, tx: &[u8]) -> Result<ResultBroadcastTx, RpcError> {
        decode(self.request("broadcast_tx_async", tx_params(tx)).await?)
    }

    /// Submit and wait for `CheckTx`.
    async fn broadcast_tx_sync(&self, tx: &[u8]) -> Result<ResultBroadcastTx, RpcError> {
        decode(self.request("broadcast_tx_sync", tx_params(tx)).await?)
    }

    /// Submit and wait for the transaction to be committed in a block.
    async fn broadcast_tx_commit(&self, tx: &[u8]) -> Result<ResultBroadcastTxCommit, RpcError> {
        decode(self.request("broadcast_tx_commit", tx_params(tx)).await?)
    }
}

impl<T: RpcTransport + ?Sized> TendermintRpc for T {}
