//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use dexrpc_core::RpcError;

/// Tendermint serves JSON-RPC over WebSocket on this path.
pub const DEFAULT_ENDPOINT: &str = "/websocket";

/// Configuration for a WebSocket [`Session`](crate::Session).
///
/// Durations are (de)serialized as milliseconds. A zero `ping_period` or
/// `read_timeout` disables that keepalive mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Default per-call timeout; see [`Session::set_timeout`](crate::Session::set_timeout).
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Bound on a single dial attempt.
    #[serde(with = "millis")]
    pub dial_timeout: Duration,
    /// Fixed delay between redial attempts after the connection drops.
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    /// Send a ping when nothing was written for this long.
    #[serde(with = "millis")]
    pub ping_period: Duration,
    /// Declare the connection dead when nothing is read for this long.
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    /// Bound on a single frame write.
    #[serde(with = "millis")]
    pub write_timeout: Duration,
    /// Capacity of the outbound frame queue.
    pub write_buffer: usize,
    /// Event buffer used by `subscribe` when the caller passes zero.
    pub default_buffer: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(1),
            ping_period: Duration::from_secs(20),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            write_buffer: 100,
            default_buffer: 100,
        }
    }
}

impl WsConfig {
    pub fn with_request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn with_reconnect_interval(mut self, d: Duration) -> Self {
        self.reconnect_interval = d;
        self
    }

    pub fn with_ping_period(mut self, d: Duration) -> Self {
        self.ping_period = d;
        self
    }

    pub fn with_read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn with_dial_timeout(mut self, d: Duration) -> Self {
        self.dial_timeout = d;
        self
    }
}

/// Build the WebSocket URL for `remote` (`tcp://host:port`, `http(s)://…`,
/// `ws(s)://…` or bare `host:port`) and `endpoint` (e.g. `/websocket`).
pub fn endpoint_url(remote: &str, endpoint: &str) -> Result<String, RpcError> {
    let remote = remote.trim().trim_end_matches('/');
    let (scheme, rest) = match remote.split_once("://") {
        Some((s, rest)) => (s.to_ascii_lowercase(), rest),
        None => ("tcp".to_string(), remote),
    };
    let scheme = match scheme.as_str() {
        "tcp" | "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RpcError::Dial {
                url: remote.to_string(),
                reason: format!("unsupported scheme {other:?}"),
            })
        }
    };
    if rest.is_empty() {
        return Err(RpcError::Dial {
            url: remote.to_string(),
            reason: "missing host".into(),
        });
    }
    let endpoint = endpoint.trim_start_matches('/');
    Ok(format!("{scheme}://{rest}/{endpoint}"))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
