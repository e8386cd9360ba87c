//! The public WebSocket session: call multiplexing, subscriptions and a
//! supervisor that transparently redials dead connections.
//!
//! Task layout per session:
//!
//! ```text
//!             ┌────────────┐  frames   ┌──────────┐  one-shot  ┌────────┐
//!  caller ──► │ transport  │ ────────► │  router  │ ─────────► │ caller │
//!             │ (gen N)    │           └──────────┘            └────────┘
//!             └────────────┘                │ staging
//!                   ▲ redial                ▼
//!             ┌────────────┐           ┌──────────┐   stream   ┌────────┐
//!             │ supervisor │           │  relay   │ ─────────► │ caller │
//!             └────────────┘           └──────────┘            └────────┘
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

use dexrpc_core::{CorrelationId, HealthStatus, JsonRpcRequest, RpcError, RpcTransport};

use crate::config::{endpoint_url, WsConfig};
use crate::multiplexer::RequestMultiplexer;
use crate::subscriptions::{EventStream, SubscriptionRegistry};
use crate::transport::{Inbound, Transport, TransportHandle};

/// State shared by the session handle, the router and the supervisor.
struct Core {
    url: String,
    config: WsConfig,
    timeout_ms: AtomicU64,
    /// Current transport generation; written only by the supervisor (and by
    /// shutdown, which clears it).
    current: watch::Sender<Option<TransportHandle>>,
    mux: Arc<RequestMultiplexer>,
    registry: SubscriptionRegistry,
    closed: AtomicBool,
}

impl Core {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), RpcError> {
        if self.is_closed() {
            Err(RpcError::Closed)
        } else {
            Ok(())
        }
    }

    fn publish(&self, handle: Option<TransportHandle>) {
        if !self.is_closed() {
            self.current.send_replace(handle);
        }
    }

    /// Mark the session closed and release everything callers can observe.
    /// Returns `false` if it was already closed.
    fn shut_down(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.current.send_replace(None);
        self.mux.clear();
        self.registry.remove_all();
        true
    }

    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, RpcError> {
        self.call_with_id(CorrelationId::new(), method, params, timeout)
            .await
    }

    async fn call_with_id(
        &self,
        id: CorrelationId,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.ensure_open()?;
        let mut pending = self.mux.register(id.clone())?;
        let frame = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;

        let exchange = async {
            self.send_frame(frame).await?;
            pending.recv().await
        };
        let response = match time::timeout(timeout, exchange).await {
            Ok(response) => response?,
            Err(_) => {
                tracing::debug!(id = %id, method, "call timed out");
                return Err(RpcError::timeout(timeout));
            }
        };
        response.into_result().map_err(RpcError::Rpc)
    }

    /// Hand `frame` to the current transport.
    ///
    /// While disconnected the frame waits for the next generation; a send that
    /// races a dying transport is retried on its successor.
    async fn send_frame(&self, mut frame: String) -> Result<(), RpcError> {
        let mut current = self.current.subscribe();
        let mut failed_generation = None;
        loop {
            self.ensure_open()?;
            let handle = current.borrow_and_update().clone();
            if let Some(handle) = handle {
                if failed_generation != Some(handle.generation) {
                    match handle.send(frame).await {
                        Ok(()) => return Ok(()),
                        Err(returned) => {
                            tracing::debug!(
                                generation = handle.generation,
                                "transport closed mid-send, waiting for the next one"
                            );
                            frame = returned;
                            failed_generation = Some(handle.generation);
                        }
                    }
                }
            }
            if current.changed().await.is_err() {
                return Err(RpcError::Closed);
            }
        }
    }

    fn route(&self, inbound: Inbound) {
        let Inbound {
            generation,
            response,
        } = inbound;
        let Some(id) = CorrelationId::from_wire(&response.id) else {
            tracing::debug!(generation, "dropping frame without id");
            return;
        };
        let Some(response) = self.registry.dispatch(&id, generation, response) else {
            return;
        };
        if !self.mux.resolve(&id, response) {
            tracing::debug!(generation, id = %id, "no caller waiting for frame, dropping");
        }
    }

    /// Replay `subscribe` on `generation` for every topic confirmed on an
    /// earlier one.
    ///
    /// Topics whose own subscribe is still queued are left to that call.
    async fn resubscribe_all(self: Arc<Self>, generation: u64) {
        let topics = self.registry.replayable(generation);
        if topics.is_empty() {
            return;
        }
        tracing::info!(url = %self.url, count = topics.len(), "resubscribing");

        let core = &self;
        let timeout = self.timeout();
        let calls = topics.into_iter().filter_map(|topic| {
            let id = core.registry.rebind(&topic, generation)?;
            Some(async move {
                let result = core
                    .call_with_id(id, "subscribe", json!({ "query": topic }), timeout)
                    .await;
                (topic, result)
            })
        });
        for (topic, result) in futures::future::join_all(calls).await {
            if let Err(e) = result {
                tracing::warn!(topic = %topic, error = %e, "resubscribe failed, topic stays registered");
            }
        }
    }
}

/// Drain the shared inbound channel, routing each frame by correlation id.
async fn route_frames(
    core: Arc<Core>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame,
            _ = shutdown.changed() => break,
        };
        match frame {
            Some(frame) => core.route(frame),
            None => break,
        }
    }
    tracing::debug!(url = %core.url, "router stopped");
}

/// Own the current transport: publish it, watch for its death and redial.
async fn supervise(
    core: Arc<Core>,
    mut transport: Transport,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        core.publish(Some(transport.handle()));
        let current = transport.generation();
        let resubscribe =
            (current > 1).then(|| tokio::spawn(Arc::clone(&core).resubscribe_all(current)));

        let stop = tokio::select! {
            _ = transport.dead() => false,
            _ = shutdown.changed() => true,
        };
        if let Some(task) = resubscribe {
            task.abort();
        }

        let generation = transport.generation();
        if stop {
            transport.shutdown().await;
            break;
        }

        core.publish(None);
        tracing::warn!(url = %core.url, generation, "connection lost, reconnecting");
        transport.shutdown().await;

        transport = match redial(&core, generation + 1, &inbound, &mut shutdown).await {
            Some(t) => t,
            None => break,
        };
    }
    tracing::debug!(url = %core.url, "supervisor stopped");
}

/// Dial on a fixed interval until it succeeds or the session shuts down.
async fn redial(
    core: &Core,
    generation: u64,
    inbound: &mpsc::UnboundedSender<Inbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Transport> {
    let mut attempt = 0u64;
    loop {
        tokio::select! {
            _ = time::sleep(core.config.reconnect_interval) => {}
            _ = shutdown.changed() => return None,
        }
        attempt += 1;
        let dialed = tokio::select! {
            dialed = Transport::dial(&core.url, generation, &core.config, inbound.clone()) => dialed,
            _ = shutdown.changed() => return None,
        };
        match dialed {
            Ok(transport) => {
                tracing::info!(url = %core.url, generation, attempt, "reconnected");
                return Some(transport);
            }
            Err(e) => {
                tracing::warn!(url = %core.url, attempt, error = %e, "redial failed");
            }
        }
    }
}

struct SessionInner {
    core: Arc<Core>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.core.shut_down();
        self.shutdown.send_replace(true);
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// A persistent JSON-RPC session over one logical WebSocket connection.
///
/// Cheap to clone; all clones share the connection. The session survives
/// connection drops: it redials on a fixed interval and replays every active
/// subscription. Calls outstanding when a connection dies are not failed
/// early, they run into their own timeout.
///
/// # Example
/// ```no_run
/// # async fn example() -> Result<(), dexrpc_core::RpcError> {
/// use dexrpc_core::{query, TendermintRpc};
/// use dexrpc_ws::{Session, WsConfig};
///
/// let session = Session::dial("tcp://127.0.0.1:26657", "/websocket", WsConfig::default()).await?;
/// let status = session.status().await?;
/// println!("height {}", status.sync_info.latest_block_height);
///
/// let mut blocks = session.subscribe(&query::event(query::NEW_BLOCK), 16).await?;
/// while let Some(event) = blocks.recv().await {
///     println!("{:?}", event.event_type());
/// }
/// session.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.inner.core.url)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Session {
    /// Dial `remote` (`tcp://host:port`, `https://…`, …) at `endpoint`.
    pub async fn dial(remote: &str, endpoint: &str, config: WsConfig) -> Result<Self, RpcError> {
        let url = endpoint_url(remote, endpoint)?;
        Self::connect(url, config).await
    }

    /// Connect to a full `ws://` / `wss://` URL.
    ///
    /// Fails if the first dial fails; later connection losses are healed in
    /// the background.
    pub async fn connect(url: impl Into<String>, config: WsConfig) -> Result<Self, RpcError> {
        let url = url.into();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Transport::dial(&url, 1, &config, inbound_tx.clone()).await?;

        let (current, _) = watch::channel(Some(transport.handle()));
        let core = Arc::new(Core {
            url,
            timeout_ms: AtomicU64::new(config.request_timeout.as_millis() as u64),
            config,
            current,
            mux: Arc::new(RequestMultiplexer::default()),
            registry: SubscriptionRegistry::default(),
            closed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = tokio::spawn(route_frames(
            Arc::clone(&core),
            inbound_rx,
            shutdown_rx.clone(),
        ));
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&core),
            transport,
            inbound_tx,
            shutdown_rx,
        ));

        Ok(Self {
            inner: Arc::new(SessionInner {
                core,
                shutdown: shutdown_tx,
                tasks: Mutex::new(vec![router, supervisor]),
            }),
        })
    }

    /// Call `method` with the session's default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let core = &self.inner.core;
        core.call(method, params, core.timeout()).await
    }

    /// Call `method`, giving up with [`RpcError::Timeout`] after `timeout`.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.inner.core.call(method, params, timeout).await
    }

    /// Like [`call_with_timeout`](Self::call_with_timeout), but also returns
    /// [`RpcError::Cancelled`] as soon as `cancel` completes. The request is
    /// not withdrawn on the wire; a late response is discarded.
    pub async fn call_with_cancel<F>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        cancel: F,
    ) -> Result<Value, RpcError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.call_with_timeout(method, params, timeout) => result,
            _ = cancel => Err(RpcError::Cancelled),
        }
    }

    /// Subscribe to a Tendermint event query, e.g. `tm.event = 'Tx'`.
    ///
    /// `buffer` bounds queued events (zero picks the configured default);
    /// events beyond it are dropped rather than stalling other traffic.
    pub async fn subscribe(&self, topic: &str, buffer: usize) -> Result<EventStream, RpcError> {
        let core = &self.inner.core;
        core.ensure_open()?;
        let buffer = if buffer == 0 {
            core.config.default_buffer
        } else {
            buffer
        };
        let (id, stream) = core.registry.reserve(topic, buffer)?;
        match core
            .call_with_id(id, "subscribe", json!({ "query": topic }), core.timeout())
            .await
        {
            Ok(_) => {
                tracing::info!(topic = %topic, "subscribed");
                Ok(stream)
            }
            Err(e) => {
                core.registry.remove(topic);
                Err(e)
            }
        }
    }

    /// Cancel the subscription for `topic` and end its stream.
    ///
    /// Unknown topics are not an error locally; only the node's reply can fail.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), RpcError> {
        let core = &self.inner.core;
        core.call("unsubscribe", json!({ "query": topic }), core.timeout())
            .await?;
        if core.registry.remove(topic) {
            tracing::info!(topic = %topic, "unsubscribed");
        }
        Ok(())
    }

    /// Cancel every subscription and end every stream.
    pub async fn unsubscribe_all(&self) -> Result<(), RpcError> {
        let core = &self.inner.core;
        core.call("unsubscribe_all", json!({}), core.timeout()).await?;
        let removed = core.registry.remove_all();
        tracing::info!(removed, "unsubscribed from all topics");
        Ok(())
    }

    /// Topics currently registered, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.core.registry.topics()
    }

    /// Change the default timeout for calls issued from now on.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner
            .core
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        self.inner.core.timeout()
    }

    /// `true` while connected; `false` during a redial and after `close`.
    pub fn is_active(&self) -> bool {
        let core = &self.inner.core;
        !core.is_closed() && core.current.borrow().is_some()
    }

    pub fn url(&self) -> &str {
        &self.inner.core.url
    }

    /// Shut the session down: fail outstanding calls with
    /// [`RpcError::Closed`], end every subscription stream, stop every task
    /// and release the socket. Calling it again is a no-op.
    pub async fn close(&self) {
        if !self.inner.core.shut_down() {
            return;
        }
        self.inner.shutdown.send_replace(true);
        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!(url = %self.inner.core.url, "session closed");
    }
}

#[async_trait]
impl RpcTransport for Session {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call(method, params).await
    }

    fn health(&self) -> HealthStatus {
        if self.inner.core.is_closed() {
            HealthStatus::Closed
        } else if self.is_active() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Reconnecting
        }
    }

    fn url(&self) -> &str {
        &self.inner.core.url
    }
}
