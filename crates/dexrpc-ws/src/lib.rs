//! dexrpc-ws — persistent JSON-RPC session over WebSocket for Tendermint nodes.
//!
//! # Features
//! - Request multiplexing over a single connection, correlated by UUID ids
//! - Per-call timeouts and caller-driven cancellation
//! - Event subscriptions as pull-based streams
//! - Ping keepalive and read deadlines to detect dead connections
//! - Fixed-interval redial with automatic resubscribe

pub mod config;
mod multiplexer;
pub mod session;
pub mod subscriptions;
mod transport;

pub use config::{endpoint_url, WsConfig, DEFAULT_ENDPOINT};
pub use session::Session;
pub use subscriptions::{Event, EventStream};
