//! 🌐 Server front-end
//!
//! One listener carries both surfaces: WebSocket upgrades become client
//! sessions (`ws`), anything else is the HTTP sidecar (`http`: /healthz,
//! /metrics, POST /auth). `tls` builds the optional rustls acceptor.

pub mod http;
pub mod tls;
pub mod ws;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::fsbridge::FsBridge;
use crate::log_error;
use crate::lsp::languages::LanguageRegistry;
use crate::lsp::pool::LspPool;
use crate::mcp::Dispatcher;
use crate::session::SessionManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

/// 🌐 The assembled gateway
pub struct Gateway {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<LspPool>,
    pub bridge: Arc<FsBridge>,
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Arc<Authenticator>,
    started_at: Instant,
    /// Live socket count, for max_clients and the stats surface
    connections: AtomicUsize,
}

impl Gateway {
    pub fn new(config: Config) -> Arc<Self> {
        let registry = LanguageRegistry::with_overrides(&config.language_map);
        let pool = LspPool::new(registry, config.pool.clone());
        let bridge = FsBridge::new(pool.clone());
        let call_timeout = config.pool.request_timeout() + Duration::from_secs(15);
        let dispatcher = Dispatcher::new(pool.clone(), bridge.clone(), call_timeout);
        let sessions = SessionManager::new(config.session.reconnection_grace());
        let auth = Arc::new(Authenticator::new(&config.auth));

        Arc::new(Self {
            config,
            sessions,
            pool,
            bridge,
            dispatcher,
            auth,
            started_at: Instant::now(),
            connections: AtomicUsize::new(0),
        })
    }

    /// 🚀 Bind and serve until the accept loop is aborted
    pub async fn run(self: Arc<Self>) -> GatewayResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|e| GatewayError::BindFailed {
                port: self.config.port,
                reason: e.to_string(),
            })?;

        let tls_acceptor = match &self.config.tls {
            Some(tls_config) => Some(tls::build_acceptor(tls_config)?),
            None => None,
        };

        self.pool.start_sweeper();
        crate::logging::log_startup(self.config.port, tls_acceptor.is_some());

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log_error!("server", "Accept failed: {e}");
                    continue;
                }
            };

            let gateway = self.clone();
            match tls_acceptor.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => gateway.serve_connection(tls_stream).await,
                            Err(e) => log_error!("server", "TLS handshake with {peer} failed: {e}"),
                        }
                    });
                }
                None => {
                    tokio::spawn(async move {
                        gateway.serve_connection(stream).await;
                    });
                }
            }
        }
    }

    /// Demux one accepted stream: sidecar HTTP or WebSocket session
    async fn serve_connection<S>(self: Arc<Self>, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let head = match http::read_request_head(&mut stream).await {
            Ok(head) => head,
            Err(e) => {
                log_error!("server", "Unreadable request head: {e}");
                return;
            }
        };

        if head.is_websocket_upgrade() {
            ws::serve_socket(self, stream, head).await;
        } else {
            http::serve_sidecar(&self, stream, head).await;
        }
    }

    /// 🛑 Graceful shutdown: tear down every pool entry, bounded
    pub async fn shutdown(self: &Arc<Self>) {
        let _ = tokio::time::timeout(Duration::from_secs(10), self.pool.shutdown_all()).await;
        crate::logging::log_shutdown();
    }

    // === 📊 Stats plumbing ===

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Claim a connection slot; false once max_clients is reached
    pub fn try_claim_connection(&self) -> bool {
        let max = self.config.max_clients.unwrap_or(usize::MAX);
        self.connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current < max {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn release_connection(&self) {
        self.connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Aggregate snapshot backing /healthz and /metrics
    pub async fn snapshot(&self) -> serde_json::Value {
        let sessions = self.sessions.stats().await;
        let pool = self.pool.stats().await;
        let cache = self.bridge.cache_stats().await;
        let active_connections = self.connection_count();

        serde_json::json!({
            "status": "ok",
            "uptime_seconds": self.uptime_seconds(),
            "connections": {
                "active": active_connections,
                "disconnected": sessions.disconnected,
                "total": active_connections + sessions.disconnected,
            },
            "sessions": sessions,
            "lsp_servers": {
                "active": pool.active,
                "projects": pool.projects,
                "languages": pool.languages,
                "restarting": pool.restarting,
                "total_crashes": pool.total_crashes,
            },
            "cache": cache,
            "security": {
                "tls": self.config.tls.is_some(),
                "protocol": if self.config.tls.is_some() { "wss" } else { "ws" },
            },
        })
    }
}
