//! One physical WebSocket connection ("transport generation").
//!
//! A transport owns exactly one reader task and one writer task. All frames
//! funnel through the writer so framing is never interleaved. Either task
//! failing marks the transport dead and stops the other one; a transport never
//! heals itself, the session supervisor replaces it.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use dexrpc_core::{JsonRpcResponse, RpcError};

use crate::config::WsConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A decoded frame tagged with the generation that received it.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub generation: u64,
    pub response: JsonRpcResponse,
}

/// Cheap, cloneable sending side of a transport.
#[derive(Debug, Clone)]
pub(crate) struct TransportHandle {
    pub generation: u64,
    frames: mpsc::Sender<String>,
}

impl TransportHandle {
    /// Queue `frame` for the writer, waiting while the queue is full.
    ///
    /// Hands the frame back if this generation's writer is gone.
    pub async fn send(&self, frame: String) -> Result<(), String> {
        self.frames.send(frame).await.map_err(|e| e.0)
    }
}

pub(crate) struct Transport {
    handle: TransportHandle,
    closed: Arc<watch::Sender<bool>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Transport {
    /// Connect to `url` and start the reader and writer tasks.
    ///
    /// Decoded frames are pushed to `inbound`.
    pub async fn dial(
        url: &str,
        generation: u64,
        config: &WsConfig,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Self, RpcError> {
        let dial_err = |reason: String| RpcError::Dial {
            url: url.to_string(),
            reason,
        };

        let connect = tokio_tungstenite::connect_async(url);
        let connected = if config.dial_timeout.is_zero() {
            connect.await
        } else {
            time::timeout(config.dial_timeout, connect)
                .await
                .map_err(|_| dial_err(format!("timed out after {:?}", config.dial_timeout)))?
        };
        let (ws, _) = connected.map_err(|e| dial_err(e.to_string()))?;
        let (sink, stream) = ws.split();

        let (frames_tx, frames_rx) = mpsc::channel(config.write_buffer.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed = Arc::new(closed_tx);

        let writer = tokio::spawn(write_loop(
            generation,
            sink,
            frames_rx,
            Arc::clone(&closed),
            closed_rx.clone(),
            config.ping_period,
            config.write_timeout,
        ));
        let reader = tokio::spawn(read_loop(
            generation,
            stream,
            inbound,
            Arc::clone(&closed),
            closed_rx,
            config.read_timeout,
        ));

        tracing::info!(url = %url, generation, "websocket connected");

        Ok(Self {
            handle: TransportHandle {
                generation,
                frames: frames_tx,
            },
            closed,
            reader,
            writer,
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation
    }

    /// Resolves once the transport is dead (either task stopped).
    pub async fn dead(&self) {
        let mut rx = self.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop both tasks and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.closed.send_replace(true);
        let _ = (&mut self.writer).await;
        let _ = (&mut self.reader).await;
        tracing::debug!(generation = self.handle.generation, "transport stopped");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.closed.send_replace(true);
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(
    generation: u64,
    mut sink: SplitSink<WsStream, Message>,
    mut frames: mpsc::Receiver<String>,
    closed: Arc<watch::Sender<bool>>,
    mut stop: watch::Receiver<bool>,
    ping_period: Duration,
    write_timeout: Duration,
) {
    let mut ping = (!ping_period.is_zero()).then(|| {
        let mut interval = time::interval_at(Instant::now() + ping_period, ping_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_write = Instant::now();

    loop {
        if *stop.borrow_and_update() {
            let _ = write_frame(&mut sink, Message::Close(None), write_timeout).await;
            break;
        }

        let msg = tokio::select! {
            _ = stop.changed() => continue,
            frame = frames.recv() => match frame {
                Some(text) => Message::Text(text),
                None => break,
            },
            _ = tick(&mut ping) => {
                if last_write.elapsed() < ping_period {
                    continue;
                }
                Message::Ping(Vec::new())
            }
        };

        if let Err(e) = write_frame(&mut sink, msg, write_timeout).await {
            tracing::warn!(generation, error = %e, "websocket write failed");
            break;
        }
        last_write = Instant::now();
    }

    closed.send_replace(true);
}

async fn write_frame(
    sink: &mut SplitSink<WsStream, Message>,
    msg: Message,
    write_timeout: Duration,
) -> Result<(), RpcError> {
    let send = sink.send(msg);
    let sent = if write_timeout.is_zero() {
        send.await
    } else {
        time::timeout(write_timeout, send)
            .await
            .map_err(|_| RpcError::WebSocket(format!("write timed out after {write_timeout:?}")))?
    };
    sent.map_err(|e| RpcError::WebSocket(e.to_string()))
}

/// Next ping tick, or never when keepalive is disabled.
async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn read_loop(
    generation: u64,
    mut stream: SplitStream<WsStream>,
    inbound: mpsc::UnboundedSender<Inbound>,
    closed: Arc<watch::Sender<bool>>,
    mut stop: watch::Receiver<bool>,
    read_timeout: Duration,
) {
    loop {
        if *stop.borrow_and_update() {
            break;
        }

        let next = tokio::select! {
            _ = stop.changed() => continue,
            next = next_message(&mut stream, read_timeout) => next,
        };

        let msg = match next {
            Err(_) => {
                tracing::warn!(
                    generation,
                    timeout_ms = read_timeout.as_millis() as u64,
                    "read deadline exceeded, treating connection as dead"
                );
                break;
            }
            Ok(None) => {
                tracing::info!(generation, "websocket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(generation, error = %e, "websocket receive error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let decoded = match msg {
            Message::Text(text) => serde_json::from_str::<JsonRpcResponse>(&text),
            Message::Binary(bytes) => serde_json::from_slice::<JsonRpcResponse>(&bytes),
            Message::Close(frame) => {
                tracing::info!(generation, ?frame, "websocket closed by peer");
                break;
            }
            // Ping/pong only refresh the read deadline.
            _ => continue,
        };

        match decoded {
            Ok(response) => {
                if inbound.send(Inbound { generation, response }).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "dropping undecodable frame");
            }
        }
    }

    closed.send_replace(true);
}

async fn next_message(
    stream: &mut SplitStream<WsStream>,
    read_timeout: Duration,
) -> Result<Option<Result<Message, tokio_tungstenite::tungstenite::Error>>, time::error::Elapsed> {
    if read_timeout.is_zero() {
        Ok(stream.next().await)
    } else {
        time::timeout(read_timeout, stream.next()).await
    }
}
