//! Reconnect-surviving subscription bookkeeping.
//!
//! Each topic owns a correlation id, a bounded staging queue fed by the
//! router, and a relay task that forwards staged events to the caller's
//! [`EventStream`]. The router never waits on a slow consumer: when the
//! staging queue is full the event is dropped and logged.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use dexrpc_core::{CorrelationId, JsonRpcResponse, RpcError};

/// One event delivered on a subscription.
///
/// `result` is Tendermint's `ResultEvent` (`query`, `data`, `events`), kept
/// opaque by the session layer.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub id: CorrelationId,
    pub result: Value,
}

impl Event {
    /// The query the node matched, as echoed back in the event.
    pub fn query(&self) -> Option<&str> {
        self.result.get("query").and_then(Value::as_str)
    }

    /// The event payload (`{"type": …, "value": …}`).
    pub fn data(&self) -> Option<&Value> {
        self.result.get("data")
    }

    /// Event type tag, e.g. `tendermint/event/NewBlock`.
    pub fn event_type(&self) -> Option<&str> {
        self.data()?.get("type").and_then(Value::as_str)
    }
}

/// Pull-based stream of events for one topic.
///
/// Ends only after `unsubscribe`, `unsubscribe_all` or session shutdown; a
/// reconnect is invisible apart from a possible gap in events.
#[derive(Debug)]
pub struct EventStream {
    topic: String,
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

struct TopicEntry {
    id: CorrelationId,
    staging: mpsc::Sender<Event>,
    quit: Option<oneshot::Sender<()>>,
    /// Generation that delivered the first successful acknowledgement for the
    /// current id. Only topics confirmed on an earlier generation are replayed
    /// after a reconnect.
    confirmed: Option<u64>,
}

impl TopicEntry {
    fn stop(mut self) {
        if let Some(quit) = self.quit.take() {
            let _ = quit.send(());
        }
    }
}

struct Route {
    topic: String,
    /// The first frame on a subscription id is the subscribe acknowledgement.
    acked: bool,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, TopicEntry>,
    routes: HashMap<CorrelationId, Route>,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    state: Mutex<State>,
}

impl SubscriptionRegistry {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `topic` before its subscribe call is sent, so events racing
    /// the acknowledgement are not lost.
    ///
    /// Must be called from within a Tokio runtime (spawns the relay task).
    pub fn reserve(
        &self,
        topic: &str,
        buffer: usize,
    ) -> Result<(CorrelationId, EventStream), RpcError> {
        let mut state = self.lock();
        if state.topics.contains_key(topic) {
            return Err(RpcError::AlreadySubscribed {
                topic: topic.to_string(),
            });
        }

        let buffer = buffer.max(1);
        let (staging_tx, staging_rx) = mpsc::channel(buffer);
        let (output_tx, output_rx) = mpsc::channel(buffer);
        let (quit_tx, quit_rx) = oneshot::channel();
        tokio::spawn(relay(topic.to_string(), staging_rx, output_tx, quit_rx));

        let id = CorrelationId::new();
        state.routes.insert(
            id.clone(),
            Route {
                topic: topic.to_string(),
                acked: false,
            },
        );
        state.topics.insert(
            topic.to_string(),
            TopicEntry {
                id: id.clone(),
                staging: staging_tx,
                quit: Some(quit_tx),
                confirmed: None,
            },
        );

        Ok((
            id,
            EventStream {
                topic: topic.to_string(),
                rx: output_rx,
            },
        ))
    }

    /// Remove `topic` and end its stream. Returns `false` if it was not
    /// registered.
    pub fn remove(&self, topic: &str) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.topics.remove(topic) else {
            return false;
        };
        state.routes.remove(&entry.id);
        entry.stop();
        true
    }

    /// Remove every topic and end every stream. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let mut state = self.lock();
        state.routes.clear();
        let entries: Vec<TopicEntry> = state.topics.drain().map(|(_, e)| e).collect();
        let n = entries.len();
        entries.into_iter().for_each(TopicEntry::stop);
        n
    }

    /// Move `topic` onto a freshly minted id for a resubscribe on
    /// `generation`. Frames still carrying the old id are no longer routed to
    /// it.
    ///
    /// Returns `None` for unknown topics and for topics not confirmed on an
    /// earlier generation: their own subscribe is still in flight or already
    /// landed on `generation`.
    pub fn rebind(&self, topic: &str, generation: u64) -> Option<CorrelationId> {
        let mut state = self.lock();
        let id = CorrelationId::new();
        let old = {
            let entry = state
                .topics
                .get_mut(topic)
                .filter(|e| e.confirmed.is_some_and(|g| g < generation))?;
            std::mem::replace(&mut entry.id, id.clone())
        };
        state.routes.remove(&old);
        state.routes.insert(
            id.clone(),
            Route {
                topic: topic.to_string(),
                acked: false,
            },
        );
        Some(id)
    }

    /// Route a frame addressed to `id`.
    ///
    /// Returns the frame back when it is not a subscription event (unknown id,
    /// or the subscribe acknowledgement) so the caller can hand it to a pending
    /// request. Events are consumed.
    pub fn dispatch(
        &self,
        id: &CorrelationId,
        generation: u64,
        response: JsonRpcResponse,
    ) -> Option<JsonRpcResponse> {
        let mut state = self.lock();
        let Some(route) = state.routes.get_mut(id) else {
            return Some(response);
        };
        if !route.acked {
            route.acked = true;
            if response.error.is_none() {
                let topic = route.topic.clone();
                if let Some(entry) = state.topics.get_mut(&topic) {
                    entry.confirmed = Some(generation);
                }
            }
            return Some(response);
        }
        let topic = route.topic.clone();
        let entry = state.topics.get(&topic)?;

        match response.into_result() {
            Ok(result) => {
                let event = Event {
                    topic,
                    id: id.clone(),
                    result,
                };
                match entry.staging.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        tracing::warn!(topic = %event.topic, "event buffer full, dropping event");
                    }
                    Err(TrySendError::Closed(event)) => {
                        tracing::debug!(topic = %event.topic, "subscriber gone, dropping event");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "node reported an error on subscription");
            }
        }
        None
    }

    /// Correlation id currently bound to `topic`.
    #[cfg(test)]
    pub fn id_of(&self, topic: &str) -> Option<CorrelationId> {
        self.lock().topics.get(topic).map(|e| e.id.clone())
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Topics to replay on `generation`: those acknowledged on an earlier
    /// one, sorted.
    pub fn replayable(&self, generation: u64) -> Vec<String> {
        let mut topics: Vec<String> = self
            .lock()
            .topics
            .iter()
            .filter(|(_, e)| e.confirmed.is_some_and(|g| g < generation))
            .map(|(t, _)| t.clone())
            .collect();
        topics.sort();
        topics
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().topics.len()
    }
}

/// Forward staged events to the caller until told to quit or the caller
/// drops its stream.
async fn relay(
    topic: String,
    mut staging: mpsc::Receiver<Event>,
    output: mpsc::Sender<Event>,
    mut quit: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            _ = &mut quit => break,
            event = staging.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        tokio::select! {
            _ = &mut quit => break,
            sent = output.send(event) => {
                if sent.is_err() {
                    tracing::debug!(topic = %topic, "event stream dropped by caller");
                    break;
                }
            }
        }
    }
    tracing::debug!(topic = %topic, "subscription relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn frame(id: &CorrelationId, n: u64) -> JsonRpcResponse {
        JsonRpcResponse::success(id.clone(), json!({"query": "q", "data": {"n": n}}))
    }

    #[tokio::test]
    async fn first_frame_is_ack_then_events() {
        let reg = SubscriptionRegistry::default();
        let (id, mut stream) = reg.reserve("tm.event = 'NewBlock'", 8).unwrap();

        assert!(reg.dispatch(&id, 1, frame(&id, 0)).is_some(), "ack goes to the caller");
        assert!(reg.dispatch(&id, 1, frame(&id, 1)).is_none());
        assert!(reg.dispatch(&id, 1, frame(&id, 2)).is_none());

        let first = stream.recv().await.unwrap();
        assert_eq!(first.data().unwrap()["n"], 1);
        assert_eq!(first.topic, "tm.event = 'NewBlock'");
        assert_eq!(stream.recv().await.unwrap().data().unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn second_reserve_of_topic_fails() {
        let reg = SubscriptionRegistry::default();
        let _first = reg.reserve("foo", 1).unwrap();
        assert!(matches!(
            reg.reserve("foo", 1),
            Err(RpcError::AlreadySubscribed { ref topic }) if topic == "foo"
        ));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn remove_ends_stream_and_frees_topic() {
        let reg = SubscriptionRegistry::default();
        let (id, mut stream) = reg.reserve("foo", 1).unwrap();
        assert!(reg.remove("foo"));
        assert!(!reg.remove("foo"));
        assert!(stream.recv().await.is_none());
        // Frames for the old id are no longer consumed as events.
        assert!(reg.dispatch(&id, 1, frame(&id, 1)).is_some());
        assert!(reg.reserve("foo", 1).is_ok());
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking() {
        let reg = SubscriptionRegistry::default();
        let (id, mut stream) = reg.reserve("foo", 1).unwrap();
        reg.dispatch(&id, 1, frame(&id, 0));
        for n in 1..=50 {
            assert!(reg.dispatch(&id, 1, frame(&id, n)).is_none());
        }
        // Let the relay move what it can.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut received = Vec::new();
        while let Ok(Some(ev)) =
            tokio::time::timeout(Duration::from_millis(20), stream.recv()).await
        {
            received.push(ev.data().unwrap()["n"].as_u64().unwrap());
        }
        assert!(!received.is_empty());
        assert!(received.len() < 50);
        assert_eq!(received[0], 1);
    }

    #[tokio::test]
    async fn rebind_moves_topic_to_new_id() {
        let reg = SubscriptionRegistry::default();
        let (old, mut stream) = reg.reserve("foo", 4).unwrap();
        reg.dispatch(&old, 1, frame(&old, 0));

        let new = reg.rebind("foo", 2).unwrap();
        assert_ne!(old, new);
        assert_eq!(reg.id_of("foo"), Some(new.clone()));
        assert!(reg.dispatch(&old, 1, frame(&old, 1)).is_some());

        // New id needs its own acknowledgement before events flow.
        assert!(reg.dispatch(&new, 1, frame(&new, 2)).is_some());
        assert!(reg.dispatch(&new, 1, frame(&new, 3)).is_none());
        assert_eq!(stream.recv().await.unwrap().data().unwrap()["n"], 3);
        assert!(reg.rebind("missing", 2).is_none());
    }

    #[tokio::test]
    async fn remove_all_clears_everything() {
        let reg = SubscriptionRegistry::default();
        let (_, mut a) = reg.reserve("a", 1).unwrap();
        let (_, mut b) = reg.reserve("b", 1).unwrap();
        assert_eq!(reg.topics(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(reg.remove_all(), 2);
        assert!(a.recv().await.is_none());
        assert!(b.recv().await.is_none());
        assert!(reg.topics().is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_topic_is_not_replayed() {
        let reg = SubscriptionRegistry::default();
        let (pending, _p) = reg.reserve("pending", 1).unwrap();
        let (live, _l) = reg.reserve("live", 1).unwrap();
        reg.dispatch(&live, 1, frame(&live, 0));

        assert_eq!(reg.topics(), vec!["live".to_string(), "pending".to_string()]);
        assert_eq!(reg.replayable(2), vec!["live".to_string()]);
        // Confirmed on the generation being replayed: already live there.
        assert!(reg.replayable(1).is_empty());
        assert!(reg.rebind("live", 1).is_none());
        assert!(reg.rebind("pending", 2).is_none());
        assert_eq!(reg.id_of("pending"), Some(pending));
        assert!(reg.rebind("live", 2).is_some());
    }

    #[tokio::test]
    async fn error_ack_does_not_confirm() {
        let reg = SubscriptionRegistry::default();
        let (id, _stream) = reg.reserve("foo", 1).unwrap();
        let rejected = JsonRpcResponse {
            error: Some(dexrpc_core::JsonRpcError {
                code: -32603,
                message: "already subscribed".into(),
                data: None,
            }),
            ..JsonRpcResponse::success(id.clone(), Value::Null)
        };
        assert!(reg.dispatch(&id, 1, rejected).is_some());
        assert!(reg.replayable(2).is_empty());
    }
}
