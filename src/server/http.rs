//! 🩺 HTTP sidecar on the gateway listener
//!
//! Minimal request-head parsing is shared with the WebSocket upgrade path:
//! the front-end reads the head once, then either completes the upgrade or
//! answers here. Surfaces: `GET /healthz` (JSON), `GET /metrics`
//! (Prometheus text), `POST /auth` (token minting).

use crate::error::{GatewayError, GatewayResult};
use crate::log_debug;
use crate::server::Gateway;
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a request head; anything bigger is hostile
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Upper bound on a POST body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Parsed request line + headers, plus whatever body bytes arrived with them
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub leftover: Vec<u8>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == "GET"
            && self
                .header("upgrade")
                .map(|v| v.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false)
    }
}

/// Read and parse one HTTP request head off the raw stream
pub async fn read_request_head<S>(stream: &mut S) -> GatewayResult<RequestHead>
where
    S: AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_HEAD_BYTES {
            return Err(GatewayError::protocol("request head too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GatewayError::protocol("connection closed mid-head"));
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head_text = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let leftover = buffer[head_end + 4..].to_vec();

    let mut lines = head_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| GatewayError::protocol("empty request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| GatewayError::protocol("missing method"))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| GatewayError::protocol("missing path"))?
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Ok(RequestHead {
        method,
        path,
        headers,
        leftover,
    })
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Answer a non-upgrade request
pub async fn serve_sidecar<S>(gateway: &Gateway, mut stream: S, head: RequestHead)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    log_debug!("http", "🩺 {} {}", head.method, head.path);
    let result = match (head.method.as_str(), head.path.as_str()) {
        ("GET", "/healthz") => {
            let snapshot = gateway.snapshot().await;
            respond(&mut stream, 200, "application/json", &snapshot.to_string()).await
        }
        ("GET", "/metrics") => {
            let body = render_metrics(gateway).await;
            respond(&mut stream, 200, "text/plain; version=0.0.4", &body).await
        }
        ("POST", "/auth") => serve_auth(gateway, &mut stream, head).await,
        _ => respond(&mut stream, 404, "text/plain", "not found").await,
    };
    if let Err(e) = result {
        log_debug!("http", "Sidecar response failed: {e}");
    }
}

async fn serve_auth<S>(gateway: &Gateway, stream: &mut S, head: RequestHead) -> GatewayResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let content_length: usize = head
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return respond(stream, 413, "text/plain", "body too large").await;
    }

    let mut body = head.leftover;
    while body.len() < content_length {
        let mut chunk = vec![0u8; content_length - body.len()];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return respond(stream, 400, "text/plain", "invalid JSON body").await,
    };
    let project_id = parsed.get("project_id").and_then(Value::as_str);
    let secret_key = parsed.get("secret_key").and_then(Value::as_str);
    let (Some(project_id), Some(secret_key)) = (project_id, secret_key) else {
        return respond(stream, 400, "text/plain", "project_id and secret_key required").await;
    };

    match gateway.auth.mint(project_id, secret_key) {
        Ok((token, expires_at)) => {
            let body = serde_json::json!({ "token": token, "expires_at": expires_at });
            respond(stream, 200, "application/json", &body.to_string()).await
        }
        Err(e) => respond(stream, 401, "text/plain", &e.to_string()).await,
    }
}

/// Prometheus text-format gauges for the aggregate counts
async fn render_metrics(gateway: &Gateway) -> String {
    let sessions = gateway.sessions.stats().await;
    let pool = gateway.pool.stats().await;
    let cache = gateway.bridge.cache_stats().await;

    let mut out = String::new();
    let mut gauge = |name: &str, help: &str, value: u64| {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
        ));
    };

    gauge(
        "switchboard_connections_active",
        "Open client sockets",
        gateway.connection_count() as u64,
    );
    gauge(
        "switchboard_sessions_active",
        "Sessions with a live socket",
        sessions.active as u64,
    );
    gauge(
        "switchboard_sessions_disconnected",
        "Sessions in the reconnection grace window",
        sessions.disconnected as u64,
    );
    gauge(
        "switchboard_projects",
        "Distinct projects with sessions",
        sessions.projects as u64,
    );
    gauge(
        "switchboard_lsp_servers_active",
        "Live LSP pool entries",
        pool.active as u64,
    );
    gauge(
        "switchboard_lsp_servers_restarting",
        "Pool entries mid-restart",
        pool.restarting as u64,
    );
    gauge(
        "switchboard_cache_entries",
        "File cache entries",
        cache.entries as u64,
    );
    gauge(
        "switchboard_cache_bytes",
        "File cache content bytes",
        cache.bytes as u64,
    );

    out.push_str(&format!(
        "# HELP switchboard_uptime_seconds_total Seconds since start\n# TYPE switchboard_uptime_seconds_total counter\nswitchboard_uptime_seconds_total {}\n",
        gateway.uptime_seconds()
    ));
    out
}

/// Write one minimal HTTP/1.1 response and close
pub async fn respond<S>(
    stream: &mut S,
    status: u16,
    content_type: &str,
    body: &str,
) -> GatewayResult<()>
where
    S: AsyncWrite + Unpin,
{
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Payload Too Large",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_parse_websocket_upgrade_head() {
        let raw = b"GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nOrigin: https://ide.example.com\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let head = read_request_head(&mut cursor).await.unwrap();

        assert!(head.is_websocket_upgrade());
        assert_eq!(head.path, "/ws");
        assert_eq!(head.header("origin"), Some("https://ide.example.com"));
        assert_eq!(
            head.header("sec-websocket-key"),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
        assert!(head.leftover.is_empty());
    }

    #[tokio::test]
    async fn test_parse_post_with_body_leftover() {
        let raw = b"POST /auth HTTP/1.1\r\nContent-Length: 13\r\n\r\n{\"a\":\"bcdef\"}";
        let mut cursor = Cursor::new(raw.to_vec());
        let head = read_request_head(&mut cursor).await.unwrap();

        assert!(!head.is_websocket_upgrade());
        assert_eq!(head.method, "POST");
        assert_eq!(head.leftover, b"{\"a\":\"bcdef\"}");
    }

    #[tokio::test]
    async fn test_truncated_head_fails() {
        let raw = b"GET /healthz HTTP/1.1\r\nHost: x";
        let mut cursor = Cursor::new(raw.to_vec());
        assert!(read_request_head(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_respond_shape() {
        let mut out = Vec::new();
        respond(&mut out, 200, "application/json", "{}").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2"));
        assert!(text.ends_with("{}"));
    }
}
