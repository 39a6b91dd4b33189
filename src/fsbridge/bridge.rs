//! 🌉 The bridge: virtual-path IO served by the client over its own socket
//!
//! Each operation becomes a server-originated RPC correlated through the
//! session's `ClientRpc`. Reads coalesce: for a given (session, virtual
//! path), one RPC is in flight at a time and concurrent callers await the
//! same outcome. Path translation strips the session's project root so pool
//! entries see a stable, root-independent path.

use crate::error::{GatewayError, GatewayResult};
use crate::fsbridge::cache::{CacheStats, FileCache};
use crate::log_debug;
use crate::log_warn;
use crate::lsp::pool::LspPool;
use crate::session::client_rpc::CLIENT_RPC_TIMEOUT;
use crate::session::Session;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Clone-able outcome shared between coalesced readers
#[derive(Debug, Clone)]
enum ReadOutcome {
    Content(String, Option<i64>),
    SessionGone,
    Timeout(u64),
    Failed(String),
}

impl ReadOutcome {
    fn into_result(self, session_id: &str, path: &str) -> GatewayResult<String> {
        match self {
            ReadOutcome::Content(content, _) => Ok(content),
            ReadOutcome::SessionGone => Err(GatewayError::SessionGone {
                session_id: session_id.to_string(),
            }),
            ReadOutcome::Timeout(timeout_ms) => Err(GatewayError::TransportTimeout {
                method: "client/readFile".to_string(),
                timeout_ms,
            }),
            ReadOutcome::Failed(cause) => Err(GatewayError::FsReadFailed {
                path: path.to_string(),
                cause,
            }),
        }
    }
}

/// 🌉 Streaming FS bridge
pub struct FsBridge {
    cache: FileCache,
    pool: Arc<LspPool>,
    /// (session, virtual path) → the in-flight read's broadcaster
    inflight: Mutex<HashMap<(String, String), broadcast::Sender<ReadOutcome>>>,
    /// Monotonic version for forwarded didChange notifications
    change_version: AtomicI32,
}

impl FsBridge {
    pub fn new(pool: Arc<LspPool>) -> Arc<Self> {
        Arc::new(Self {
            cache: FileCache::new(),
            pool,
            inflight: Mutex::new(HashMap::new()),
            change_version: AtomicI32::new(1),
        })
    }

    // === 🗺️ Path translation ===

    /// Client-absolute → session-relative virtual path
    pub fn translate(session: &Session, absolute: &str) -> String {
        let root = session.project_root().trim_end_matches('/');
        if absolute == root {
            "/".to_string()
        } else if let Some(rest) = absolute.strip_prefix(root) {
            if rest.starts_with('/') {
                rest.to_string()
            } else {
                absolute.to_string()
            }
        } else {
            absolute.to_string()
        }
    }

    /// Virtual path → the absolute form this session's client understands
    pub fn untranslate(session: &Session, virtual_path: &str) -> String {
        let root = session.project_root().trim_end_matches('/');
        if virtual_path.starts_with(root) {
            virtual_path.to_string()
        } else {
            format!("{root}{virtual_path}")
        }
    }

    // === 📖 Operations ===

    /// Read bytes for a virtual path; cache first, then one coalesced RPC
    pub async fn read(&self, session: &Arc<Session>, virtual_path: &str) -> GatewayResult<String> {
        if let Some(entry) = self.cache.get(session.id(), virtual_path).await {
            log_debug!("fsbridge", "💾 Cache hit for {}:{virtual_path}", session.id());
            return Ok(entry.content);
        }

        let key = (session.id().to_string(), virtual_path.to_string());

        // Join an in-flight read if one exists, else become the leader
        let mut rx = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), tx);
                    None
                }
            }
        };

        if let Some(rx) = rx.as_mut() {
            log_debug!("fsbridge", "🤝 Coalescing read for {virtual_path}");
            return match rx.recv().await {
                Ok(outcome) => outcome.into_result(session.id(), virtual_path),
                Err(_) => Err(GatewayError::TransportClosed {
                    context: "coalesced read abandoned".to_string(),
                }),
            };
        }

        let outcome = self.fetch(session, virtual_path).await;

        // Populate the cache before waking the other readers
        if let ReadOutcome::Content(content, mtime) = &outcome {
            self.cache
                .insert(session.id(), virtual_path, content.clone(), *mtime)
                .await;
            session.note_open_path(virtual_path);
        }

        {
            let mut inflight = self.inflight.lock().await;
            if let Some(tx) = inflight.remove(&key) {
                let _ = tx.send(outcome.clone());
            }
        }

        outcome.into_result(session.id(), virtual_path)
    }

    /// One `client/readFile` round trip
    async fn fetch(&self, session: &Arc<Session>, virtual_path: &str) -> ReadOutcome {
        let client = match session.client().await {
            Ok(client) => client,
            Err(_) => return ReadOutcome::SessionGone,
        };
        let absolute = Self::untranslate(session, virtual_path);

        match client
            .request(
                "client/readFile",
                Some(json!({ "path": absolute })),
                CLIENT_RPC_TIMEOUT,
            )
            .await
        {
            Ok(value) => match value.get("content").and_then(Value::as_str) {
                Some(content) => {
                    let mtime = value.get("mtime").and_then(Value::as_i64);
                    ReadOutcome::Content(content.to_string(), mtime)
                }
                None => ReadOutcome::Failed("client response missing content".to_string()),
            },
            Err(GatewayError::TransportTimeout { timeout_ms, .. }) => {
                // No cache entry is created on timeout
                ReadOutcome::Timeout(timeout_ms)
            }
            Err(GatewayError::SessionGone { .. }) | Err(GatewayError::TransportClosed { .. }) => {
                ReadOutcome::SessionGone
            }
            Err(e) => ReadOutcome::Failed(e.to_string()),
        }
    }

    /// Write bytes through to the client, keeping the cache coherent for
    /// this session
    pub async fn write(
        &self,
        session: &Arc<Session>,
        virtual_path: &str,
        content: &str,
    ) -> GatewayResult<()> {
        let client = session.client().await?;
        let absolute = Self::untranslate(session, virtual_path);

        client
            .request(
                "client/writeFile",
                Some(json!({ "path": absolute, "content": content })),
                CLIENT_RPC_TIMEOUT,
            )
            .await
            .map_err(|e| match e {
                GatewayError::TransportTimeout { .. } => e,
                other => GatewayError::FsWriteFailed {
                    path: virtual_path.to_string(),
                    cause: other.to_string(),
                },
            })?;

        // A write followed by a read of the same (session, path) returns the
        // written bytes
        self.cache
            .insert(session.id(), virtual_path, content.to_string(), None)
            .await;
        Ok(())
    }

    /// Whether the path exists on the client's side
    pub async fn exists(&self, session: &Arc<Session>, virtual_path: &str) -> GatewayResult<bool> {
        if self.cache.get(session.id(), virtual_path).await.is_some() {
            return Ok(true);
        }
        let client = session.client().await?;
        let absolute = Self::untranslate(session, virtual_path);

        let value = client
            .request(
                "client/fileExists",
                Some(json!({ "path": absolute })),
                CLIENT_RPC_TIMEOUT,
            )
            .await?;
        Ok(value.get("exists").and_then(Value::as_bool).unwrap_or(false))
    }

    // === 🔔 Change notifications ===

    /// Handle a client-pushed `server/fileChanged`. Invalidation is
    /// synchronous; didChange forwarding to pool entries runs in the
    /// background (best-effort, queued for restarting entries).
    pub async fn file_changed(
        self: &Arc<Self>,
        session: &Arc<Session>,
        client_path: &str,
        _mtime: Option<i64>,
    ) {
        let virtual_path = Self::translate(session, client_path);
        let invalidated = self.cache.invalidate(session.id(), &virtual_path).await;
        log_debug!(
            "fsbridge",
            "🔔 fileChanged {virtual_path} (cache entry dropped: {invalidated})"
        );

        let bridge = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            bridge.forward_did_change(&session, &virtual_path).await;
        });
    }

    /// Re-read the fresh content and fan a full-text didChange out to every
    /// pool entry holding the path open
    async fn forward_did_change(self: &Arc<Self>, session: &Arc<Session>, virtual_path: &str) {
        let content = match self.read(session, virtual_path).await {
            Ok(content) => content,
            Err(e) => {
                log_warn!("fsbridge", "Re-read after fileChanged failed for {virtual_path}: {e}");
                return;
            }
        };

        let version = self.change_version.fetch_add(1, Ordering::SeqCst);
        let params = json!({
            "textDocument": {
                "uri": format!("file://{virtual_path}"),
                "version": version,
            },
            "contentChanges": [{ "text": content }],
        });
        self.pool.broadcast_did_change(virtual_path, params).await;
    }

    // === 🧹 Lifecycle hooks ===

    /// Session-cleanup hook: drop all cache entries for the session
    pub async fn purge_session(&self, session_id: &str) {
        let dropped = self.cache.purge_session(session_id).await;
        if dropped > 0 {
            log_debug!("fsbridge", "🧹 Purged {dropped} cache entries for session {session_id}");
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::lsp::languages::LanguageRegistry;
    use crate::rpc::message::{JsonRpcMessage, JsonRpcResponse};
    use crate::session::ClientRpc;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Stand-in client: answers readFile/writeFile/fileExists and counts reads
    fn fake_client(content: &'static str, reads: Arc<AtomicUsize>) -> Arc<ClientRpc> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let rpc = Arc::new(ClientRpc::new(tx));
        let rpc_clone = rpc.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Ok(JsonRpcMessage::Request(req)) = serde_json::from_str(&frame) else {
                    continue;
                };
                let result = match req.method.as_str() {
                    "client/readFile" => {
                        reads.fetch_add(1, Ordering::SeqCst);
                        json!({ "content": content, "mtime": 1000 })
                    }
                    "client/writeFile" => json!({}),
                    "client/fileExists" => json!({ "exists": true }),
                    _ => json!(null),
                };
                rpc_clone
                    .handle_response(JsonRpcResponse::success(req.id, result))
                    .await;
            }
        });
        rpc
    }

    fn test_bridge() -> Arc<FsBridge> {
        let pool = LspPool::new(LanguageRegistry::new(), PoolConfig::default());
        FsBridge::new(pool)
    }

    async fn connected_session() -> (Arc<Session>, Arc<AtomicUsize>) {
        let session = Session::new("P", "/u/P", None);
        let reads = Arc::new(AtomicUsize::new(0));
        session
            .attach_client(fake_client("export const foo = 1;\n", reads.clone()))
            .await;
        (session, reads)
    }

    #[test]
    fn test_translate_strips_project_root() {
        let session = Session::new("P", "/u/P", None);
        assert_eq!(FsBridge::translate(&session, "/u/P/src/x.ts"), "/src/x.ts");
        assert_eq!(FsBridge::translate(&session, "/u/P"), "/");
        // Paths outside the root pass through as opaque strings
        assert_eq!(FsBridge::translate(&session, "/etc/hosts"), "/etc/hosts");
        // Sibling directory sharing a name prefix is not under the root
        assert_eq!(FsBridge::translate(&session, "/u/Potato/x.ts"), "/u/Potato/x.ts");
    }

    #[test]
    fn test_untranslate_restores_absolute() {
        let session = Session::new("P", "/u/P/", None);
        assert_eq!(FsBridge::untranslate(&session, "/src/x.ts"), "/u/P/src/x.ts");
        assert_eq!(FsBridge::untranslate(&session, "/u/P/src/x.ts"), "/u/P/src/x.ts");
    }

    #[tokio::test]
    async fn test_read_caches_content() {
        let bridge = test_bridge();
        let (session, reads) = connected_session().await;

        let first = bridge.read(&session, "/src/x.ts").await.unwrap();
        assert_eq!(first, "export const foo = 1;\n");
        let second = bridge.read(&session, "/src/x.ts").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(reads.load(Ordering::SeqCst), 1, "second read served from cache");
    }

    #[tokio::test]
    async fn test_concurrent_reads_coalesce() {
        let bridge = test_bridge();
        let (session, reads) = connected_session().await;

        let results = futures::future::join_all(
            (0..16).map(|_| bridge.read(&session, "/src/big.ts")),
        )
        .await;
        for result in results {
            assert_eq!(result.unwrap(), "export const foo = 1;\n");
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1, "only one RPC for 16 readers");
    }

    #[tokio::test]
    async fn test_write_then_read_is_coherent() {
        let bridge = test_bridge();
        let (session, reads) = connected_session().await;

        bridge
            .write(&session, "/src/x.ts", "rewritten")
            .await
            .unwrap();
        let content = bridge.read(&session, "/src/x.ts").await.unwrap();
        assert_eq!(content, "rewritten");
        assert_eq!(reads.load(Ordering::SeqCst), 0, "read served by the write's cache fill");
    }

    #[tokio::test]
    async fn test_file_changed_invalidates() {
        let bridge = test_bridge();
        let (session, reads) = connected_session().await;

        bridge.read(&session, "/src/x.ts").await.unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        bridge.file_changed(&session, "/u/P/src/x.ts", None).await;
        bridge.read(&session, "/src/x.ts").await.unwrap();
        // The post-change read cannot be served from the stale entry
        assert!(reads.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_read_on_disconnected_session_fails() {
        let bridge = test_bridge();
        let session = Session::new("P", "/u/P", None);
        let err = bridge.read(&session, "/src/x.ts").await.unwrap_err();
        assert_eq!(err.kind(), "session_gone");
    }

    #[tokio::test]
    async fn test_exists() {
        let bridge = test_bridge();
        let (session, _) = connected_session().await;
        assert!(bridge.exists(&session, "/src/x.ts").await.unwrap());
    }
}
