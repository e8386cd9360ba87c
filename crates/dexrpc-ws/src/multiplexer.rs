//! Pending-request table: one response slot per outstanding correlation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use dexrpc_core::{CorrelationId, JsonRpcResponse, RpcError};

/// Tracks outstanding calls and hands each inbound response to its caller.
///
/// Delivery never blocks the router: each slot is a one-shot channel, and a
/// response for a caller that already gave up is simply dropped.
#[derive(Debug, Default)]
pub(crate) struct RequestMultiplexer {
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<JsonRpcResponse>>>,
}

impl RequestMultiplexer {
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, oneshot::Sender<JsonRpcResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a response slot for `id`.
    ///
    /// Fails if `id` is already outstanding. The slot is released when the
    /// returned [`PendingRequest`] is dropped.
    pub fn register(self: &Arc<Self>, id: CorrelationId) -> Result<PendingRequest, RpcError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock();
            if pending.contains_key(&id) {
                return Err(RpcError::DuplicateId(id.to_string()));
            }
            pending.insert(id.clone(), tx);
        }
        Ok(PendingRequest {
            id,
            rx,
            mux: Arc::clone(self),
        })
    }

    /// Deliver `response` to the caller waiting on `id`.
    ///
    /// Returns `false` when no request with that id is outstanding.
    pub fn resolve(&self, id: &CorrelationId, response: JsonRpcResponse) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            return false;
        };
        if tx.send(response).is_err() {
            tracing::debug!(id = %id, "caller abandoned request, dropping response");
        }
        true
    }

    fn deregister(&self, id: &CorrelationId) {
        self.lock().remove(id);
    }

    /// Drop every slot; waiting callers observe [`RpcError::Closed`].
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// An outstanding call. Dropping it deregisters the id.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    id: CorrelationId,
    rx: oneshot::Receiver<JsonRpcResponse>,
    mux: Arc<RequestMultiplexer>,
}

impl PendingRequest {
    /// Wait for the response.
    pub async fn recv(&mut self) -> Result<JsonRpcResponse, RpcError> {
        (&mut self.rx).await.map_err(|_| RpcError::Closed)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.mux.deregister(&self.id);
    }
}
