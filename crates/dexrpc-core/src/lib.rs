//! dexrpc-core — wire types, errors and typed calls for dexrpc.
//!
//! # Overview
//!
//! dexrpc is a client for the Tendermint RPC interface of a DEX chain. The
//! core crate defines:
//!
//! - [`RpcTransport`] — the one generic `request(method, params)` operation
//!   every transport (WebSocket session, HTTP) implements
//! - [`TendermintRpc`] — typed calls (`status`, `block`, `abci_query`,
//!   `broadcast_tx_*`, …) available on any transport
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] / [`CorrelationId`] — wire types
//! - [`RpcError`] — structured error type
//! - [`policy`] — retry/backoff for stateless transports
//! - [`query`] — event subscription query builders

pub mod error;
pub mod methods;
pub mod policy;
pub mod query;
pub mod request;
pub mod transport;
pub mod types;

pub use error::RpcError;
pub use methods::TendermintRpc;
pub use request::{CorrelationId, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::{decode, HealthStatus, RpcTransport};
