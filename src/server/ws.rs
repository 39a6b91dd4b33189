//! 🔌 WebSocket front-end - per-socket state machine
//!
//! `accepted → authenticated → initialized → live → closing → closed`, with
//! short-circuit paths to closed on protocol violation. Once live, frames
//! route three ways: `server/fileChanged` notifications to the FS bridge,
//! `{id, result|error}` frames to the session's server-RPC correlator, and
//! everything else with an id to the dispatcher.

use crate::error::{GatewayError, GatewayResult};
use crate::log_debug;
use crate::log_info;
use crate::log_warn;
use crate::mcp::protocol::InitializeResult;
use crate::rpc::message::{JsonRpcRequest, JsonRpcResponse, RpcError};
use crate::server::http::{respond, RequestHead};
use crate::server::Gateway;
use crate::session::{ClientRpc, Session};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Deadline for the auth + initialize handshake after upgrade
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Releases the connection slot however the socket task exits
struct ConnectionSlot(Arc<Gateway>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.release_connection();
    }
}

/// Serve one upgraded socket to completion
pub async fn serve_socket<S>(gateway: Arc<Gateway>, mut stream: S, head: RequestHead)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Origin policy is enforced before the upgrade completes
    if !gateway.config.origin_allowed(head.header("origin")) {
        let origin = head.header("origin").unwrap_or("<missing>");
        log_warn!("ws", "🚫 Origin rejected: {origin}");
        let _ = respond(&mut stream, 403, "text/plain", "origin not allowed").await;
        return;
    }

    let Some(key) = head.header("sec-websocket-key") else {
        let _ = respond(&mut stream, 400, "text/plain", "missing Sec-WebSocket-Key").await;
        return;
    };

    let accept = derive_accept_key(key.as_bytes());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    let mut ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;

    // Capacity cap: the max_clients-th connection is accepted, the next one
    // is rejected with close code 1008
    if !gateway.try_claim_connection() {
        log_warn!("ws", "🚫 Capacity reached, closing with 1008");
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "max clients reached".into(),
            }))
            .await;
        return;
    }
    let _slot = ConnectionSlot(gateway.clone());

    let (mut sink, mut source) = ws.split();

    // Writer task: one outbound lane for responses, server-originated RPCs,
    // and pongs
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = msg_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // ClientRpc speaks strings; adapt them onto the message lane
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    {
        let msg_tx = msg_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if msg_tx.send(Message::Text(frame)).is_err() {
                    break;
                }
            }
        });
    }
    let client_rpc = Arc::new(ClientRpc::new(frame_tx));

    // accepted → authenticated → initialized
    let session = match handshake(&gateway, &client_rpc, &mut source).await {
        Ok(session) => session,
        Err(e) => {
            log_warn!("ws", "Handshake failed: {e}");
            drop(msg_tx);
            let _ = writer.await;
            return;
        }
    };

    // live
    let exit = live_loop(&gateway, &session, &client_rpc, &mut source, &msg_tx).await;
    if let Err(e) = exit {
        log_warn!("ws", "Socket for session {} closed: {e}", session.id());
    }

    // closing: into the reconnection grace window
    let bridge = gateway.bridge.clone();
    gateway
        .sessions
        .disconnect(
            session.id(),
            Box::new(move |expired: Arc<Session>| {
                // Session cleanup hook: drop the session's cache entries
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    bridge.purge_session(expired.id()).await;
                });
            }),
        )
        .await;

    drop(msg_tx);
    let _ = writer.await;
}

/// Read the auth frame (when required) and the initialize request, producing
/// a bound session
async fn handshake<St>(
    gateway: &Arc<Gateway>,
    client_rpc: &Arc<ClientRpc>,
    source: &mut St,
) -> GatewayResult<Arc<Session>>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let handshake = async {
        // accepted → authenticated
        let token = if gateway.auth.required() {
            let frame = next_text(source).await?;
            let value: Value = serde_json::from_str(&frame)
                .map_err(|_| GatewayError::protocol("auth frame is not JSON"))?;
            let token = value
                .get("token")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::AuthFailed {
                    reason: "first frame must carry a token".to_string(),
                })?;
            Some(token.to_string())
        } else {
            None
        };

        // authenticated → initialized
        let frame = next_text(source).await?;
        let request: JsonRpcRequest = serde_json::from_str(&frame)
            .map_err(|_| GatewayError::protocol("expected initialize request"))?;
        if request.method != "initialize" {
            let error = GatewayError::SessionNotInitialized;
            let _ = client_rpc.send_frame(&JsonRpcResponse::failure(
                request.id,
                RpcError::new(error.json_rpc_code(), error.to_string()).with_kind(error.kind()),
            ));
            return Err(GatewayError::protocol("first request must be initialize"));
        }

        let params = request.params.clone().unwrap_or(Value::Null);
        let project = params
            .get("project")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_params("initialize", "missing project"))?
            .to_string();
        let project_root = params
            .get("projectRoot")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_params("initialize", "missing projectRoot"))?
            .to_string();
        let session_id = params
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Token verification binds principal to the declared project
        let principal = match gateway
            .auth
            .verify(token.as_deref().unwrap_or(""), &project)
        {
            Ok(principal) => principal,
            Err(e) => {
                let _ = client_rpc.send_frame(&JsonRpcResponse::failure(
                    request.id,
                    RpcError::new(e.json_rpc_code(), e.to_string()).with_kind(e.kind()),
                ));
                return Err(e);
            }
        };

        // Reclaim a disconnected session, by id or by (project, root); a
        // stale or mismatched id simply falls through to a fresh session
        let mut reclaimed = None;
        if let Some(id) = &session_id {
            if let Some(session) = gateway.sessions.reconnect(id, client_rpc.clone()).await {
                if session.matches(&project, &project_root) {
                    reclaimed = Some(session);
                } else {
                    // Wrong binding: send it back to the grace table untouched
                    let bridge = gateway.bridge.clone();
                    gateway
                        .sessions
                        .disconnect(
                            session.id(),
                            Box::new(move |expired: Arc<Session>| {
                                let bridge = bridge.clone();
                                tokio::spawn(async move {
                                    bridge.purge_session(expired.id()).await;
                                });
                            }),
                        )
                        .await;
                }
            }
        }
        if reclaimed.is_none() {
            if let Some(session) = gateway
                .sessions
                .find_reconnectable(&project, &project_root)
                .await
            {
                gateway
                    .sessions
                    .restore(session.clone(), client_rpc.clone())
                    .await;
                reclaimed = Some(session);
            }
        }

        let (session, reconnected) = match reclaimed {
            Some(session) => (session, true),
            None => {
                let session = Session::new(&project, &project_root, Some(principal));
                session.attach_client(client_rpc.clone()).await;
                gateway.sessions.add(session.clone()).await;
                (session, false)
            }
        };

        // Reconnects require this explicit re-handshake; nothing is
        // implicitly reattached
        session.mark_initialized();

        let result = InitializeResult::new(session.id(), reconnected);
        client_rpc.send_frame(&JsonRpcResponse::success(
            request.id,
            serde_json::to_value(&result)?,
        ))?;

        log_info!(
            "ws",
            "✅ Session {} initialized for project {} (reconnected: {reconnected})",
            session.id(),
            project
        );
        Ok(session)
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| GatewayError::protocol("handshake timed out"))?
}

/// Pull the next text frame, answering pings along the way
async fn next_text<St>(source: &mut St) -> GatewayResult<String>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err(GatewayError::TransportClosed {
                    context: "socket closed during handshake".to_string(),
                });
            }
            Some(Ok(_)) => {
                return Err(GatewayError::protocol("unexpected binary frame"));
            }
            Some(Err(e)) => {
                return Err(GatewayError::TransportClosed {
                    context: e.to_string(),
                });
            }
        }
    }
}

/// 🔄 The live frame router
async fn live_loop<St>(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    client_rpc: &Arc<ClientRpc>,
    source: &mut St,
    msg_tx: &mpsc::UnboundedSender<Message>,
) -> GatewayResult<()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                route_frame(gateway, session, client_rpc, &text).await?;
            }
            Ok(Message::Ping(payload)) => {
                let _ = msg_tx.send(Message::Pong(payload));
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                log_debug!("ws", "👋 Orderly close from session {}", session.id());
                return Ok(());
            }
            Ok(Message::Binary(_)) => {
                return Err(GatewayError::protocol("binary frames are not part of the protocol"));
            }
            Ok(_) => {}
            Err(e) => {
                return Err(GatewayError::TransportClosed {
                    context: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Route one text frame. A malformed frame is fatal for the socket (the
/// session enters the grace window), an unknown method is fatal only for
/// that call.
async fn route_frame(
    gateway: &Arc<Gateway>,
    session: &Arc<Session>,
    client_rpc: &Arc<ClientRpc>,
    text: &str,
) -> GatewayResult<()> {
    let value: Value = serde_json::from_str(text)
        .map_err(|_| GatewayError::protocol("frame is not a JSON object"))?;
    if !value.is_object() {
        return Err(GatewayError::protocol("frame is not a JSON object"));
    }

    let has_method = value.get("method").and_then(Value::as_str).is_some();
    let has_id = value.get("id").is_some();

    match (has_method, has_id) {
        // Client-originated notification
        (true, false) => {
            let method = value["method"].as_str().unwrap_or_default();
            if method == "server/fileChanged" {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                let Some(path) = params.get("path").and_then(Value::as_str) else {
                    log_warn!("ws", "fileChanged without a path");
                    return Ok(());
                };
                let mtime = params.get("mtime").and_then(Value::as_i64);
                // Invalidation lands before any later frame is routed
                gateway.bridge.file_changed(session, path, mtime).await;
            } else {
                log_debug!("ws", "📨 Ignoring notification {method}");
            }
            Ok(())
        }

        // Tool request: concurrent calls run independently
        (true, true) => {
            let request: JsonRpcRequest = serde_json::from_value(value)
                .map_err(|_| GatewayError::protocol("malformed request frame"))?;
            let dispatcher = gateway.dispatcher.clone();
            let session = session.clone();
            let client_rpc = client_rpc.clone();
            tokio::spawn(async move {
                let response = dispatcher.dispatch(&session, request).await;
                if client_rpc.send_frame(&response).is_err() {
                    log_debug!("ws", "Response dropped; socket already gone");
                }
            });
            Ok(())
        }

        // Response to a server-originated RPC
        (false, true) => {
            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|_| GatewayError::protocol("malformed response frame"))?;
            // Unknown correlation ids are logged and dropped
            client_rpc.handle_response(response).await;
            Ok(())
        }

        (false, false) => Err(GatewayError::protocol("frame has neither method nor id")),
    }
}
