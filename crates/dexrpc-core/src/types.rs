//! Typed results for the Tendermint RPC methods exposed by the façade.
//!
//! Tendermint encodes 64-bit integers as JSON strings; every numeric field
//! here accepts either form. Fields the SDK never interprets are kept as raw
//! [`Value`]s.

use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use crate::error::RpcError;

mod quoted {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Str(String),
        Num(T),
    }

    pub fn deserialize<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
    {
        match Raw::<T>::deserialize(d)? {
            Raw::Str(s) => s.parse().map_err(de::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}

fn decode_base64(field: &str, s: &str) -> Result<Vec<u8>, RpcError> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| RpcError::Other(format!("invalid base64 in {field}: {e}")))
}

// ─── status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(default)]
    pub listen_addr: String,
    pub network: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub moniker: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    #[serde(default)]
    pub latest_block_hash: String,
    #[serde(default)]
    pub latest_app_hash: String,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub latest_block_height: u64,
    #[serde(default)]
    pub latest_block_time: String,
    #[serde(default)]
    pub catching_up: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorInfo {
    pub address: String,
    #[serde(default)]
    pub pub_key: Value,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub voting_power: i64,
}

/// Result of `status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultStatus {
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
    pub validator_info: ValidatorInfo,
}

// ─── abci ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AbciInfo {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "quoted::deserialize")]
    pub last_block_height: u64,
    #[serde(default)]
    pub last_block_app_hash: Option<String>,
}

/// Result of `abci_info`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultAbciInfo {
    pub response: AbciInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbciQueryResponse {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub info: String,
    /// Base64-encoded key.
    #[serde(default)]
    pub key: Option<String>,
    /// Base64-encoded value.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "quoted::deserialize")]
    pub height: i64,
    #[serde(default)]
    pub codespace: String,
}

impl AbciQueryResponse {
    /// Returns `true` if the application accepted the query.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Decoded value bytes (empty when the node returned none).
    pub fn value_bytes(&self) -> Result<Vec<u8>, RpcError> {
        match &self.value {
            Some(v) => decode_base64("abci_query.value", v),
            None => Ok(Vec::new()),
        }
    }
}

/// Result of `abci_query`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultAbciQuery {
    pub response: AbciQueryResponse,
}

// ─── blocks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub chain_id: String,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub height: u64,
    pub time: String,
    #[serde(default)]
    pub app_hash: String,
    #[serde(default)]
    pub proposer_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: Header,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub last_commit: Value,
}

impl Block {
    /// Base64-encoded transactions included in the block.
    pub fn txs(&self) -> Vec<&str> {
        self.data
            .get("txs")
            .and_then(Value::as_array)
            .map(|txs| txs.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Result of `block`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultBlock {
    #[serde(default, alias = "block_meta")]
    pub block_id: Value,
    pub block: Block,
}

// ─── validators ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Validator {
    pub address: String,
    #[serde(default)]
    pub pub_key: Value,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub voting_power: i64,
    #[serde(default, deserialize_with = "quoted::deserialize")]
    pub proposer_priority: i64,
}

/// Result of `validators`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultValidators {
    #[serde(deserialize_with = "quoted::deserialize")]
    pub block_height: u64,
    pub validators: Vec<Validator>,
}

// ─── transactions ─────────────────────────────────────────────────────────────

/// Outcome of `CheckTx`/`DeliverTx` for one transaction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TxResult {
    pub code: u32,
    pub data: Option<String>,
    pub log: String,
    pub info: String,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub gas_wanted: i64,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub gas_used: i64,
    pub events: Value,
    pub codespace: String,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Result of `tx`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultTx {
    pub hash: String,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub height: u64,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub tx_result: TxResult,
    /// Base64-encoded transaction bytes.
    #[serde(default)]
    pub tx: String,
}

impl ResultTx {
    pub fn tx_bytes(&self) -> Result<Vec<u8>, RpcError> {
        decode_base64("tx", &self.tx)
    }
}

/// Result of `tx_search`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultTxSearch {
    pub txs: Vec<ResultTx>,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub total_count: u64,
}

/// Result of `broadcast_tx_async` and `broadcast_tx_sync`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultBroadcastTx {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub codespace: String,
    pub hash: String,
}

impl ResultBroadcastTx {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Result of `broadcast_tx_commit`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultBroadcastTxCommit {
    #[serde(default)]
    pub check_tx: TxResult,
    #[serde(default, alias = "tx_result")]
    pub deliver_tx: TxResult,
    pub hash: String,
    #[serde(deserialize_with = "quoted::deserialize")]
    pub height: u64,
}

impl ResultBroadcastTxCommit {
    pub fn is_ok(&self) -> bool {
        self.check_tx.is_ok() && self.deliver_tx.is_ok()
    }
}
