//! The `RpcTransport` trait — the one generic operation every transport offers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::RpcError;

/// Transport health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Connected and serving calls.
    Healthy,
    /// Connection lost; the transport is trying to recover.
    Reconnecting,
    /// Shut down for good.
    Closed,
    /// Health status is unknown (not tracked by this transport).
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A JSON-RPC transport to a Tendermint node.
///
/// Implementations must be `Send + Sync` for use across Tokio tasks, and the
/// trait is object-safe so it can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Call `method` with named `params` and return the raw `result` value.
    ///
    /// Node-side errors surface as [`RpcError::Rpc`].
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Return the current health status of this transport.
    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Return the transport's endpoint URL.
    fn url(&self) -> &str;
}

/// Decode a raw result value into `T`.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(RpcError::Deserialization)
}
