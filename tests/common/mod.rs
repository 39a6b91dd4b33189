//! 🧰 Shared test helpers
//!
//! `FakeClient` plays the remote editor: it consumes the frames the gateway
//! sends down the socket lane and answers `client/*` RPCs from an in-memory
//! file table, recording every request it served.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use switchboard::rpc::message::{JsonRpcMessage, JsonRpcResponse};
use switchboard::session::{ClientRpc, Session};
use tokio::sync::mpsc;

/// In-memory stand-in for the client side of the socket
pub struct FakeClient {
    pub rpc: Arc<ClientRpc>,
    pub read_count: Arc<AtomicUsize>,
    pub write_count: Arc<AtomicUsize>,
    files: Arc<Mutex<HashMap<String, String>>>,
}

impl FakeClient {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let files: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(
            files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
        ));
        let read_count = Arc::new(AtomicUsize::new(0));
        let write_count = Arc::new(AtomicUsize::new(0));

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let rpc = Arc::new(ClientRpc::new(tx));

        let rpc_task = rpc.clone();
        let files_task = files.clone();
        let read_count_task = read_count.clone();
        let write_count_task = write_count.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&frame) else {
                    continue;
                };
                let JsonRpcMessage::Request(request) = message else {
                    continue; // responses/notifications toward the client
                };
                let params = request.params.clone().unwrap_or(Value::Null);
                let path = params
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                let response = match request.method.as_str() {
                    "client/readFile" => {
                        read_count_task.fetch_add(1, Ordering::SeqCst);
                        let content = files_task.lock().unwrap().get(&path).cloned();
                        match content {
                            Some(content) => JsonRpcResponse::success(
                                request.id,
                                json!({ "content": content, "mtime": 1_700_000_000 }),
                            ),
                            None => JsonRpcResponse::failure(
                                request.id,
                                switchboard::rpc::message::RpcError::new(
                                    -32005,
                                    format!("no such file: {path}"),
                                ),
                            ),
                        }
                    }
                    "client/writeFile" => {
                        write_count_task.fetch_add(1, Ordering::SeqCst);
                        let content = params
                            .get("content")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        files_task.lock().unwrap().insert(path, content);
                        JsonRpcResponse::success(request.id, json!({}))
                    }
                    "client/fileExists" => {
                        let exists = files_task.lock().unwrap().contains_key(&path);
                        JsonRpcResponse::success(request.id, json!({ "exists": exists }))
                    }
                    _ => JsonRpcResponse::success(request.id, Value::Null),
                };
                rpc_task.handle_response(response).await;
            }
        });

        Self {
            rpc,
            read_count,
            write_count,
            files,
        }
    }

    pub fn reads(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Mutate a file on the "client disk" (as an external edit would)
    pub fn set_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }
}

/// An initialized session for project P with the fake client attached
pub async fn connected_session(client: &FakeClient) -> Arc<Session> {
    let session = Session::new("P", "/u/P", None);
    session.attach_client(client.rpc.clone()).await;
    session.mark_initialized();
    session
}
