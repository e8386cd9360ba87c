//! dexrpc-http — stateless HTTP JSON-RPC transport for Tendermint nodes.
//!
//! Every call is a single `POST` carrying one JSON-RPC request; transient
//! failures are retried with exponential backoff. Subscriptions need the
//! WebSocket session in `dexrpc-ws`.

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient};
