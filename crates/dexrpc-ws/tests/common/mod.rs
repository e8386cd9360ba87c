//! In-process fake of a Tendermint WebSocket RPC endpoint.
//!
//! Every received request is recorded together with the index of the
//! connection it arrived on; replies are produced by a handler closure and may
//! be delayed individually. `kill_connections` drops every open socket to
//! simulate a node restart.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub struct Reply {
    pub delay: Duration,
    pub text: String,
}

impl Reply {
    pub fn now(frame: Value) -> Self {
        Self::after(Duration::ZERO, frame)
    }

    pub fn after(delay: Duration, frame: Value) -> Self {
        Self {
            delay,
            text: frame.to_string(),
        }
    }

    /// Send `text` verbatim, valid JSON or not.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            text: text.into(),
        }
    }
}

/// `(connection index, request) -> replies`
pub type Handler = Arc<dyn Fn(usize, &Value) -> Vec<Reply> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub frame: Value,
}

impl Received {
    pub fn method(&self) -> &str {
        self.frame["method"].as_str().unwrap_or_default()
    }

    pub fn id(&self) -> &str {
        self.frame["id"].as_str().unwrap_or_default()
    }
}

pub fn result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// Answer every request with its own id as the result.
pub fn echo_id() -> Handler {
    Arc::new(|_: usize, req: &Value| vec![Reply::now(result(&req["id"], req["id"].clone()))])
}

/// Never answer.
pub fn silent() -> Handler {
    Arc::new(|_: usize, _: &Value| Vec::new())
}

/// Acknowledge subscribe/unsubscribe calls; echo ids for everything else.
pub fn tendermint() -> Handler {
    Arc::new(|_: usize, req: &Value| match req["method"].as_str() {
        Some("subscribe") | Some("unsubscribe") | Some("unsubscribe_all") => {
            vec![Reply::now(result(&req["id"], json!({})))]
        }
        _ => vec![Reply::now(result(&req["id"], req["id"].clone()))],
    })
}

/// Like [`tendermint`], but each subscribe is followed by one event frame
/// carrying the connection index.
pub fn tendermint_with_events() -> Handler {
    Arc::new(|conn: usize, req: &Value| match req["method"].as_str() {
        Some("subscribe") => {
            let id = req["id"].as_str().unwrap_or_default();
            let query = req["params"]["query"].clone();
            vec![
                Reply::now(result(&req["id"], json!({}))),
                Reply::after(
                    Duration::from_millis(20),
                    json!({
                        "jsonrpc": "2.0",
                        "id": format!("{id}#event"),
                        "result": {
                            "query": query,
                            "data": {"type": "tendermint/event/NewBlock", "value": {"conn": conn}}
                        }
                    }),
                ),
            ]
        }
        _ => vec![Reply::now(result(&req["id"], json!({})))],
    })
}

/// Like [`tendermint_with_events`], but rejects a second subscribe for a
/// query already active on the same connection, as a Tendermint node does.
pub fn tendermint_rejecting_duplicates() -> Handler {
    let active: Arc<Mutex<HashSet<(usize, String)>>> = Arc::default();
    let events = tendermint_with_events();
    Arc::new(move |conn: usize, req: &Value| {
        if req["method"].as_str() == Some("subscribe") {
            let query = req["params"]["query"].as_str().unwrap_or_default().to_string();
            if !active.lock().unwrap().insert((conn, query)) {
                return vec![Reply::now(json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "error": {"code": -32603, "message": "Internal error", "data": "already subscribed"}
                }))];
            }
        }
        events(conn, req)
    })
}

struct NodeState {
    received: Mutex<Vec<Received>>,
    connections: AtomicUsize,
    kill: watch::Sender<u64>,
}

pub struct FakeNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
    accept: JoinHandle<()>,
}

impl FakeNode {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kill, _) = watch::channel(0u64);
        let state = Arc::new(NodeState {
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            kill,
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let conn = accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let kill = accept_state.kill.subscribe();
                tokio::spawn(serve(
                    ws,
                    conn,
                    Arc::clone(&accept_state),
                    Arc::clone(&handler),
                    kill,
                ));
            }
        });

        Self {
            addr,
            state,
            accept,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/websocket", self.addr)
    }

    pub fn remote(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn received_on(&self, connection: usize) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| r.connection == connection)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Drop every open connection; the listener keeps accepting.
    pub fn kill_connections(&self) {
        self.state.kill.send_modify(|epoch| *epoch += 1);
    }

    /// Poll `cond` every 10ms until it holds, panicking after `limit`.
    pub async fn wait_until(&self, limit: Duration, cond: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + limit;
        while !cond(self) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met within {limit:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.accept.abort();
        self.kill_connections();
    }
}

async fn serve(
    ws: WebSocketStream<TcpStream>,
    conn: usize,
    state: Arc<NodeState>,
    handler: Handler,
    mut kill: watch::Receiver<u64>,
) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            _ = kill.changed() => break,
            Some(text) = out_rx.recv() => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    state.received.lock().unwrap().push(Received {
                        connection: conn,
                        frame: frame.clone(),
                    });
                    for reply in handler(conn, &frame) {
                        let tx = out_tx.clone();
                        if reply.delay.is_zero() {
                            let _ = tx.send(reply.text);
                        } else {
                            tokio::spawn(async move {
                                tokio::time::sleep(reply.delay).await;
                                let _ = tx.send(reply.text);
                            });
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
