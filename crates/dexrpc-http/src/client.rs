//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Features:
//! - One `POST` per call, correlated by a fresh UUID id
//! - Automatic retry with exponential backoff for transient errors
//! - Node-reported errors surfaced as [`RpcError::Rpc`] and never retried

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use dexrpc_core::policy::{RetryConfig, RetryPolicy};
use dexrpc_core::{CorrelationId, JsonRpcRequest, JsonRpcResponse, RpcError, RpcTransport};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Stateless HTTP JSON-RPC client.
#[derive(Debug, Clone)]
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl HttpRpcClient {
    /// Create a client for the node's JSON-RPC URL (e.g. `http://127.0.0.1:26657`).
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RpcError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::new(url, HttpClientConfig::default())
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            // Some node versions answer RPC errors with a 500 and a JSON-RPC body.
            if let Ok(parsed) = serde_json::from_str::<JsonRpcResponse>(&body) {
                if parsed.error.is_some() {
                    return Ok(parsed);
                }
            }
            let msg = format!("HTTP {}: {}", status.as_u16(), body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                RpcError::Http(msg)
            } else {
                RpcError::Other(msg)
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn transport_error(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::timeout(self.request_timeout)
        } else {
            RpcError::Http(e.to_string())
        }
    }

    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url = %self.url,
                            method = %req.method,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(
                            attempt,
                            error = %e,
                            url = %self.url,
                            method = %req.method,
                            "max retries exceeded"
                        );
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = CorrelationId::new();
        let resp = self
            .send(JsonRpcRequest::new(id.clone(), method, params))
            .await?;

        if CorrelationId::from_wire(&resp.id).is_some_and(|got| got != id) {
            return Err(RpcError::Other(format!(
                "response id {} does not match request id {id}",
                resp.id
            )));
        }
        resp.into_result().map_err(RpcError::Rpc)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Echo the request id back with a fixed result.
    struct Echo(Value);

    impl Respond for Echo {
        fn respond(&self, req: &Request) -> ResponseTemplate {
            let body: Value = serde_json::from_slice(&req.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": self.0,
            }))
        }
    }

    fn fast_retry() -> HttpClientConfig {
        HttpClientConfig {
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                multiplier: 2.0,
            },
            request_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn request_posts_jsonrpc_and_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"jsonrpc": "2.0", "method": "status"})))
            .respond_with(Echo(json!({"node_info": {"network": "dex-1"}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRpcClient::new(server.uri(), fast_retry()).unwrap();
        let result = client.request("status", Value::Null).await.unwrap();
        assert_eq!(result["node_info"]["network"], "dex-1");
    }

    #[tokio::test]
    async fn node_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32602, "message": "Invalid params"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRpcClient::new(server.uri(), fast_retry()).unwrap();
        match client.request("block", json!({"height": "x"})).await {
            Err(RpcError::Rpc(e)) => assert_eq!(e.code, -32602),
            other => panic!("expected node error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(3)
            .mount(&server)
            .await;

        let client = HttpRpcClient::new(server.uri(), fast_retry()).unwrap();
        let err = client.request("status", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Http(ref m) if m.starts_with("HTTP 503")));
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRpcClient::new(server.uri(), fast_retry()).unwrap();
        assert!(matches!(
            client.request("status", Value::Null).await,
            Err(RpcError::Other(_))
        ));
    }

    #[tokio::test]
    async fn error_body_on_500_is_a_node_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32603, "message": "Internal error", "data": "tx not found"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpRpcClient::new(server.uri(), fast_retry()).unwrap();
        let err = client.request("tx", json!({"hash": "AAAA"})).await.unwrap_err();
        assert!(err.is_node_error());
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(Echo(json!({})).delayed())
            .mount(&server)
            .await;

        let config = HttpClientConfig {
            retry: RetryConfig::none(),
            request_timeout: Duration::from_millis(100),
        };
        let client = HttpRpcClient::new(server.uri(), config).unwrap();
        assert!(matches!(
            client.request("status", Value::Null).await,
            Err(RpcError::Timeout { ms: 100 })
        ));
    }

    impl Echo {
        fn delayed(self) -> Delayed {
            Delayed(self)
        }
    }

    struct Delayed(Echo);

    impl Respond for Delayed {
        fn respond(&self, req: &Request) -> ResponseTemplate {
            self.0.respond(req).set_delay(Duration::from_secs(2))
        }
    }

    #[tokio::test]
    async fn typed_calls_work_over_http() {
        use dexrpc_core::TendermintRpc;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "abci_info"})))
            .respond_with(Echo(json!({
                "response": {"data": "dexd", "version": "1.0.0", "last_block_height": "42"}
            })))
            .mount(&server)
            .await;

        let client = HttpRpcClient::default_for(server.uri()).unwrap();
        let info = client.abci_info().await.unwrap();
        assert_eq!(info.response.last_block_height, 42);
    }
}
