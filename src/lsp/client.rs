//! 🔌 LSP Client - JSON-RPC communication with one language server child
//!
//! Owns the stdio loop for a single child process: Content-Length framing,
//! request correlation, the initialize handshake, and delivery of inbound
//! server notifications (diagnostics). Requests issued before the child has
//! answered `initialize` are queued and flushed in order once it has.

use crate::log_debug;
use crate::log_info;
use crate::log_warn;
use crate::lsp::types::{LspError, LspResult};
use crate::rpc::framing;
use crate::rpc::message::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcError,
};
use crate::rpc::{Correlator, IdSpace};
use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionItemCapability,
    DiagnosticClientCapabilities, DocumentSymbolClientCapabilities, GotoCapability,
    HoverClientCapabilities, InitializeParams, InitializeResult, MarkupKind,
    ReferenceClientCapabilities, TextDocumentClientCapabilities, TraceValue,
    WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::timeout;
use url::Url;

/// Synthetic error code used to fail pending requests when the child's
/// transport goes away; `request` maps it back to `TransportClosed`.
const TRANSPORT_CLOSED_CODE: i32 = -32099;

/// Child-initiated requests we answer with a null result so conforming
/// servers don't stall waiting on us.
const BENIGN_SERVER_REQUESTS: &[&str] = &[
    "workspace/configuration",
    "client/registerCapability",
    "client/unregisterCapability",
    "window/workDoneProgress/create",
];

enum Deferred {
    Request {
        method: String,
        params: Option<Value>,
        tx: oneshot::Sender<LspResult<Value>>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

enum InitState {
    /// Requests issued before `initialized` wait here, in order
    Pending(Vec<Deferred>),
    Ready,
}

/// 🔧 LSP client for one child process
pub struct LspClient {
    /// Workspace directory this child serves
    workspace: PathBuf,
    correlator: Arc<Correlator>,
    /// Outbound frames toward the child's stdin
    message_tx: mpsc::UnboundedSender<String>,
    init_state: Arc<Mutex<InitState>>,
    default_timeout: Duration,
    notification_tx: broadcast::Sender<JsonRpcNotification>,
}

impl std::fmt::Debug for LspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspClient")
            .field("workspace", &self.workspace)
            .field("notification_subscribers", &self.notification_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

impl LspClient {
    /// Create a new LSP client with the child's stdio handles and spawn the
    /// communication loop
    pub fn new(
        stdin: tokio::process::ChildStdin,
        stdout: tokio::process::ChildStdout,
        workspace: PathBuf,
        default_timeout: Duration,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel::<String>();
        let correlator = Arc::new(Correlator::new(IdSpace::Numeric));
        let (notification_tx, _) = broadcast::channel(100);

        let client = Self {
            workspace,
            correlator: correlator.clone(),
            message_tx,
            init_state: Arc::new(Mutex::new(InitState::Pending(Vec::new()))),
            default_timeout,
            notification_tx: notification_tx.clone(),
        };

        let outbound = client.message_tx.clone();
        tokio::spawn(async move {
            Self::run_communication(stdin, stdout, message_rx, correlator, notification_tx, outbound)
                .await;
        });

        client
    }

    /// 🚀 Main communication loop
    async fn run_communication(
        mut stdin: tokio::process::ChildStdin,
        stdout: tokio::process::ChildStdout,
        mut message_rx: mpsc::UnboundedReceiver<String>,
        correlator: Arc<Correlator>,
        notification_tx: broadcast::Sender<JsonRpcNotification>,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        let mut reader = BufReader::new(stdout);

        loop {
            tokio::select! {
                msg = message_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if let Err(e) = framing::write_frame(&mut stdin, &message).await {
                                log_warn!("lsp", "Failed to write to LSP stdin: {e}");
                                break;
                            }
                        }
                        None => break,
                    }
                }

                read_result = framing::read_frame(&mut reader) => {
                    match read_result {
                        Ok(Some(content)) => {
                            Self::handle_incoming(&content, &correlator, &notification_tx, &outbound).await;
                        }
                        Ok(None) => {
                            log_debug!("lsp", "📴 LSP stdout EOF");
                            break;
                        }
                        Err(e) => {
                            log_warn!("lsp", "Failed to read LSP message: {e}");
                            break;
                        }
                    }
                }
            }
        }

        // No partial frames survive a close; every waiter learns the
        // transport is gone so the pool can re-route them.
        correlator
            .fail_all(TRANSPORT_CLOSED_CODE, "LSP child transport closed", "transport_closed")
            .await;
    }

    async fn handle_incoming(
        content: &str,
        correlator: &Arc<Correlator>,
        notification_tx: &broadcast::Sender<JsonRpcNotification>,
        outbound: &mpsc::UnboundedSender<String>,
    ) {
        let message: JsonRpcMessage = match serde_json::from_str(content.trim()) {
            Ok(m) => m,
            Err(e) => {
                log_warn!("lsp", "Failed to parse JSON-RPC from child: {e}");
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => {
                correlator.complete(response).await;
            }
            JsonRpcMessage::Notification(notification) => {
                log_debug!("lsp", "📨 LSP notification: {}", notification.method);
                let _ = notification_tx.send(notification); // Ignore if no subscribers
            }
            JsonRpcMessage::Request(request) => {
                // Child-initiated requests are answered, never correlated
                let response = if BENIGN_SERVER_REQUESTS.contains(&request.method.as_str()) {
                    JsonRpcResponse::success(request.id, Value::Null)
                } else {
                    log_warn!("lsp", "Unsupported server request: {}", request.method);
                    JsonRpcResponse::failure(
                        request.id,
                        RpcError::new(-32601, format!("Unsupported method: {}", request.method)),
                    )
                };
                if let Ok(body) = serde_json::to_string(&response) {
                    let _ = outbound.send(body);
                }
            }
        }
    }

    /// 📤 Send a request and wait for the response, with a per-call timeout
    pub async fn request(&self, method: &str, params: Option<Value>) -> LspResult<Value> {
        self.request_with_timeout(method, params, self.default_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_duration: Duration,
    ) -> LspResult<Value> {
        // Requests before `initialized` queue here and flush in order later
        {
            let mut state = self.init_state.lock().await;
            if let InitState::Pending(queue) = &mut *state {
                if method != "initialize" {
                    let (tx, rx) = oneshot::channel();
                    queue.push(Deferred::Request {
                        method: method.to_string(),
                        params,
                        tx,
                    });
                    drop(state);
                    return rx.await.map_err(|_| LspError::TransportClosed {
                        context: "client dropped before initialization".to_string(),
                    })?;
                }
            }
        }

        self.send_request_now(method, params, timeout_duration).await
    }

    async fn send_request_now(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_duration: Duration,
    ) -> LspResult<Value> {
        let id = self.correlator.allocate();
        let rx = self.correlator.register(id.clone()).await;

        let request = JsonRpcRequest::new(id.clone(), method, params);
        let message = serde_json::to_string(&request)?;
        if self.message_tx.send(message).is_err() {
            self.correlator.forget(&id).await;
            return Err(LspError::TransportClosed {
                context: "LSP stdin channel closed".to_string(),
            });
        }

        let response = match timeout(timeout_duration, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(LspError::TransportClosed {
                    context: "response channel dropped".to_string(),
                });
            }
            Err(_) => {
                // Expired request removes its resolver; a late response is
                // dropped by the correlator.
                self.correlator.forget(&id).await;
                return Err(LspError::Timeout {
                    timeout_ms: timeout_duration.as_millis() as u64,
                    method: method.to_string(),
                });
            }
        };

        if let Some(error) = response.error {
            if error.code == TRANSPORT_CLOSED_CODE {
                return Err(LspError::TransportClosed {
                    context: error.message,
                });
            }
            return Err(LspError::ServerError {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        // result is REQUIRED in successful responses but may be null
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// 📢 Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> LspResult<()> {
        {
            let mut state = self.init_state.lock().await;
            if let InitState::Pending(queue) = &mut *state {
                if method != "initialized" && method != "exit" {
                    queue.push(Deferred::Notification {
                        method: method.to_string(),
                        params,
                    });
                    return Ok(());
                }
            }
        }
        self.send_notification_now(method, params)
    }

    fn send_notification_now(&self, method: &str, params: Option<Value>) -> LspResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        let message = serde_json::to_string(&notification)?;
        self.message_tx
            .send(message)
            .map_err(|_| LspError::TransportClosed {
                context: "LSP stdin channel closed".to_string(),
            })
    }

    /// 🚀 Initialize the LSP server, then flush the deferred queue in order
    pub async fn initialize(&self, init_options: Option<Value>) -> LspResult<InitializeResult> {
        let params = self.initialize_params(init_options)?;

        let raw = self
            .send_request_now(
                "initialize",
                Some(serde_json::to_value(params)?),
                self.default_timeout,
            )
            .await?;
        let result: InitializeResult =
            serde_json::from_value(raw).map_err(|e| LspError::InitializationError {
                message: format!("bad initialize result: {e}"),
            })?;

        self.send_notification_now("initialized", Some(json!({})))?;

        // Flush everything queued while the handshake was in flight
        let deferred = {
            let mut state = self.init_state.lock().await;
            match std::mem::replace(&mut *state, InitState::Ready) {
                InitState::Pending(queue) => queue,
                InitState::Ready => Vec::new(),
            }
        };
        if !deferred.is_empty() {
            log_debug!("lsp", "⏩ Flushing {} deferred messages", deferred.len());
        }
        for entry in deferred {
            match entry {
                Deferred::Request { method, params, tx } => {
                    let outcome = self
                        .send_request_now(&method, params, self.default_timeout)
                        .await;
                    let _ = tx.send(outcome);
                }
                Deferred::Notification { method, params } => {
                    let _ = self.send_notification_now(&method, params);
                }
            }
        }

        log_info!(
            "lsp",
            "🚀 LSP server initialized for {}",
            self.workspace.display()
        );
        Ok(result)
    }

    fn initialize_params(&self, init_options: Option<Value>) -> LspResult<InitializeParams> {
        let root_url =
            Url::from_file_path(&self.workspace).map_err(|_| LspError::InitializationError {
                message: format!("workspace is not an absolute path: {}", self.workspace.display()),
            })?;
        let root_uri =
            lsp_types::Uri::from_str(root_url.as_str()).map_err(|e| LspError::InitializationError {
                message: format!("bad workspace uri: {e}"),
            })?;

        let capabilities = ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                configuration: Some(true),
                ..Default::default()
            }),
            text_document: Some(TextDocumentClientCapabilities {
                hover: Some(HoverClientCapabilities {
                    dynamic_registration: Some(false),
                    content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                }),
                completion: Some(CompletionClientCapabilities {
                    dynamic_registration: Some(false),
                    completion_item: Some(CompletionItemCapability {
                        snippet_support: Some(false),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                definition: Some(GotoCapability {
                    dynamic_registration: Some(false),
                    link_support: Some(true),
                }),
                references: Some(ReferenceClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                document_symbol: Some(DocumentSymbolClientCapabilities {
                    dynamic_registration: Some(false),
                    hierarchical_document_symbol_support: Some(true),
                    ..Default::default()
                }),
                diagnostic: Some(DiagnosticClientCapabilities {
                    dynamic_registration: Some(false),
                    related_document_support: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(InitializeParams {
            process_id: Some(std::process::id()),
            initialization_options: init_options,
            capabilities,
            trace: Some(TraceValue::Off),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: self
                    .workspace
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("workspace")
                    .to_string(),
            }]),
            client_info: Some(ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        })
    }

    /// 🛑 Graceful shutdown: `shutdown` request then `exit` notification
    pub async fn shutdown(&self, grace: Duration) -> LspResult<()> {
        match self
            .request_with_timeout("shutdown", None, grace)
            .await
        {
            Ok(_) => log_debug!("lsp", "✅ Shutdown request acknowledged"),
            Err(e) => log_warn!("lsp", "Shutdown request failed: {e}"),
        }
        // Exit must go out even if shutdown was refused
        self.send_notification_now("exit", None)?;
        Ok(())
    }

    /// 📡 Subscribe to server → client notifications (diagnostics etc.)
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notification_tx.subscribe()
    }

    /// Workspace directory this child serves
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Number of requests currently awaiting a response
    pub async fn in_flight(&self) -> usize {
        self.correlator.pending_count().await
    }
}
