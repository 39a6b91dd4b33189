//! 📞 Server-originated RPC capability for one client socket
//!
//! The FS bridge (and anything else that must ask the client for something)
//! holds this capability, not the session or the socket itself. Requests use
//! the `srv:`-tagged id space so they can never collide with ids the client
//! chose for its own tool calls on the same socket.

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::message::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::rpc::{Correlator, IdSpace};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default deadline for a round trip to the client
pub const CLIENT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// 📞 Frame-sending capability plus correlation for server→client requests
pub struct ClientRpc {
    /// Outbound frames toward the socket writer task
    outbound: mpsc::UnboundedSender<String>,
    correlator: Correlator,
}

impl ClientRpc {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound,
            correlator: Correlator::new(IdSpace::ServerTagged),
        }
    }

    /// Send a raw, already-serialized frame
    pub fn send_raw(&self, frame: String) -> GatewayResult<()> {
        self.outbound
            .send(frame)
            .map_err(|_| GatewayError::TransportClosed {
                context: "client socket writer gone".to_string(),
            })
    }

    /// Send any serializable frame object
    pub fn send_frame<T: serde::Serialize>(&self, frame: &T) -> GatewayResult<()> {
        self.send_raw(serde_json::to_string(frame)?)
    }

    /// Send a notification to the client
    pub fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        self.send_frame(&JsonRpcNotification::new(method, params))
    }

    /// 📤 Issue a server-originated request and await the client's response
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> GatewayResult<Value> {
        let id = self.correlator.allocate();
        let rx = self.correlator.register(id.clone()).await;

        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.send_frame(&request) {
            self.correlator.forget(&id).await;
            return Err(e);
        }

        let response = match timeout(deadline, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(GatewayError::TransportClosed {
                    context: "client response channel dropped".to_string(),
                });
            }
            Err(_) => {
                self.correlator.forget(&id).await;
                return Err(GatewayError::TransportTimeout {
                    method: method.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(GatewayError::generic(format!(
                "client error {}: {}",
                error.code, error.message
            )));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Route an inbound `{id, result|error}` frame to its waiter.
    /// Returns false when no waiter is installed (late or bogus response).
    pub async fn handle_response(&self, response: JsonRpcResponse) -> bool {
        self.correlator.complete(response).await
    }

    /// Fail every pending server-originated RPC; called on socket close
    pub async fn close(&self) {
        self.correlator
            .fail_all(-32004, "client socket closed", "transport_closed")
            .await;
    }

    pub async fn in_flight(&self) -> usize {
        self.correlator.pending_count().await
    }
}

impl std::fmt::Debug for ClientRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRpc").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::{JsonRpcMessage, RequestId};
    use serde_json::json;

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rpc = std::sync::Arc::new(ClientRpc::new(tx));

        // A stand-in client: read the framed request, echo a response back
        let rpc_clone = rpc.clone();
        let client_task = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            let msg: JsonRpcMessage = serde_json::from_str(&frame).unwrap();
            let JsonRpcMessage::Request(req) = msg else {
                panic!("expected request frame");
            };
            assert_eq!(req.method, "client/readFile");
            assert!(matches!(&req.id, RequestId::String(s) if s.starts_with("srv:")));
            rpc_clone
                .handle_response(JsonRpcResponse::success(
                    req.id,
                    json!({"content": "fn main() {}"}),
                ))
                .await;
        });

        let value = rpc
            .request(
                "client/readFile",
                Some(json!({"path": "/u/P/src/main.rs"})),
                CLIENT_RPC_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(value["content"], json!("fn main() {}"));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let rpc = std::sync::Arc::new(ClientRpc::new(tx));

        let rpc_clone = rpc.clone();
        let pending = tokio::spawn(async move {
            rpc_clone
                .request("client/readFile", Some(json!({"path": "/x"})), CLIENT_RPC_TIMEOUT)
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rpc.in_flight().await, 1);
        rpc.close().await;

        let outcome = pending.await.unwrap();
        assert!(outcome.is_err());
        assert_eq!(rpc.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let rpc = ClientRpc::new(tx);
        let err = rpc.notify("server/ping", None).unwrap_err();
        assert_eq!(err.kind(), "transport_closed");
    }
}
