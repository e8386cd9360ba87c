//! Error taxonomy shared by every dexrpc transport.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to a Tendermint node.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connecting to the node failed.
    #[error("dial {url} failed: {reason}")]
    Dial { url: String, reason: String },

    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The call did not complete before its deadline.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The caller cancelled the call before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The session has been closed.
    #[error("session closed")]
    Closed,

    /// `subscribe` was called for a topic that is already registered.
    #[error("already subscribed to {topic:?}")]
    AlreadySubscribed { topic: String },

    /// A request with this correlation id is already outstanding.
    #[error("request id {0} is already in flight")]
    DuplicateId(String),

    /// A result or frame could not be (de)serialized.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Returns `true` if this error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. }
        )
    }

    /// Returns `true` if the node itself rejected the request.
    pub fn is_node_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Timeout error for a deadline of `d`.
    pub fn timeout(d: std::time::Duration) -> Self {
        Self::Timeout {
            ms: d.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryable_classification() {
        assert!(RpcError::Http("502".into()).is_retryable());
        assert!(RpcError::timeout(Duration::from_millis(250)).is_retryable());
        assert!(!RpcError::Cancelled.is_retryable());
        assert!(!RpcError::AlreadySubscribed { topic: "t".into() }.is_retryable());
    }

    #[test]
    fn timeout_message_reports_millis() {
        let err = RpcError::timeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "request timed out after 2000ms");
    }

    #[test]
    fn node_error_is_not_retryable() {
        let err = RpcError::Rpc(JsonRpcError {
            code: -32603,
            message: "Internal error".into(),
            data: Some("tx already exists in cache".into()),
        });
        assert!(err.is_node_error());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "RPC error -32603: Internal error");
    }
}
