//! 🔗 Request correlation
//!
//! Maps in-flight request ids to the oneshot resolvers of awaiting callers.
//! Each transport instance owns one correlator per direction it initiates
//! requests in; the id spaces are disjoint so peer-allocated ids can never
//! collide with ours (numeric ids toward LSP children, `srv:`-prefixed
//! string ids for server-originated client RPCs).

use crate::log_debug;
use crate::rpc::message::{JsonRpcResponse, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};

/// Which id space this correlator allocates from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpace {
    /// Plain numeric ids (LSP child transport)
    Numeric,
    /// `srv:<n>` string ids (server-originated requests on a client socket)
    ServerTagged,
}

/// 🔗 In-memory mapping from correlation id to pending resolver
#[derive(Debug)]
pub struct Correlator {
    space: IdSpace,
    next_id: AtomicU64,
    pending: Arc<RwLock<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>,
}

impl Correlator {
    pub fn new(space: IdSpace) -> Self {
        Self {
            space,
            next_id: AtomicU64::new(1),
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Allocate the next id in this correlator's space
    pub fn allocate(&self) -> RequestId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.space {
            IdSpace::Numeric => RequestId::Number(n),
            IdSpace::ServerTagged => RequestId::String(format!("srv:{n}")),
        }
    }

    /// Install a resolver for `id`; the returned receiver completes when the
    /// matching response arrives
    pub async fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.write().await;
        pending.insert(id, tx);
        rx
    }

    /// Complete the pending request matching `response.id`
    ///
    /// Returns false when no resolver is installed (late response after a
    /// timeout, or a peer inventing ids); the caller logs and drops the frame.
    pub async fn complete(&self, response: JsonRpcResponse) -> bool {
        let sender = {
            let mut pending = self.pending.write().await;
            pending.remove(&response.id)
        };
        match sender {
            Some(tx) => {
                // Receiver may have given up already; that is fine
                let _ = tx.send(response);
                true
            }
            None => {
                log_debug!("rpc", "🗑️ Dropping response for unknown id {}", response.id);
                false
            }
        }
    }

    /// Remove a resolver without completing it (timeout expiry path)
    pub async fn forget(&self, id: &RequestId) {
        let mut pending = self.pending.write().await;
        pending.remove(id);
    }

    /// Whether an id in this correlator's space is currently pending
    pub async fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.read().await.contains_key(id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Fail every pending request with the supplied error, draining the map.
    /// Used when the underlying transport closes.
    pub async fn fail_all(&self, code: i32, message: &str, kind: &str) {
        let drained: Vec<(RequestId, oneshot::Sender<JsonRpcResponse>)> = {
            let mut pending = self.pending.write().await;
            pending.drain().collect()
        };
        if !drained.is_empty() {
            log_debug!("rpc", "🚮 Failing {} pending requests: {message}", drained.len());
        }
        for (id, tx) in drained {
            let response = JsonRpcResponse::failure(
                id,
                crate::rpc::message::RpcError::new(code, message).with_kind(kind),
            );
            let _ = tx.send(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_id_spaces_are_disjoint() {
        let lsp = Correlator::new(IdSpace::Numeric);
        let client = Correlator::new(IdSpace::ServerTagged);

        assert_eq!(lsp.allocate(), RequestId::Number(1));
        assert_eq!(lsp.allocate(), RequestId::Number(2));
        assert_eq!(client.allocate(), RequestId::String("srv:1".into()));
        assert_eq!(client.allocate(), RequestId::String("srv:2".into()));
    }

    #[tokio::test]
    async fn test_complete_resolves_waiter() {
        let correlator = Correlator::new(IdSpace::Numeric);
        let id = correlator.allocate();
        let rx = correlator.register(id.clone()).await;

        let delivered = correlator
            .complete(JsonRpcResponse::success(id, json!({"ok": true})))
            .await;
        assert!(delivered);

        let response = rx.await.unwrap();
        assert_eq!(response.result.unwrap()["ok"], json!(true));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_response_is_dropped() {
        let correlator = Correlator::new(IdSpace::Numeric);
        let delivered = correlator
            .complete(JsonRpcResponse::success(RequestId::Number(99), json!(null)))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_forget_then_late_response() {
        let correlator = Correlator::new(IdSpace::Numeric);
        let id = correlator.allocate();
        let _rx = correlator.register(id.clone()).await;

        // Timeout path removes the resolver; the late response must be dropped
        correlator.forget(&id).await;
        let delivered = correlator
            .complete(JsonRpcResponse::success(id, json!(null)))
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_fail_all_drains() {
        let correlator = Correlator::new(IdSpace::ServerTagged);
        let id_a = correlator.allocate();
        let id_b = correlator.allocate();
        let rx_a = correlator.register(id_a).await;
        let rx_b = correlator.register(id_b).await;

        correlator
            .fail_all(-32004, "socket closed", "transport_closed")
            .await;

        for rx in [rx_a, rx_b] {
            let response = rx.await.unwrap();
            let error = response.error.unwrap();
            assert_eq!(error.data.unwrap()["kind"], json!("transport_closed"));
        }
        assert_eq!(correlator.pending_count().await, 0);
    }
}
