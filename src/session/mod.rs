//! 👥 Session layer
//!
//! A session is the server-side identity of one remote client: its declared
//! project, project root, principal, and (while connected) the capability to
//! send frames back down its socket. The manager owns the active/disconnected
//! indexes and the reconnection grace window.

pub mod client_rpc;
pub mod manager;

pub use client_rpc::ClientRpc;
pub use manager::{SessionManager, SessionStats};

use crate::auth::Principal;
use crate::error::{GatewayError, GatewayResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::RwLock;

/// 🪪 One remote client's server-side identity
pub struct Session {
    /// Opaque server-assigned id
    id: String,
    /// Client-declared project id
    project: String,
    /// Client-declared absolute root; used only as an opaque namespace
    project_root: String,
    /// Authenticated principal, when auth is enabled
    principal: Option<Principal>,
    /// Frame-sending capability; None while disconnected
    client: RwLock<Option<Arc<ClientRpc>>>,
    initialized: AtomicBool,
    /// Virtual paths this session is authoritative for
    open_paths: StdMutex<HashSet<String>>,
    created_at: Instant,
}

impl Session {
    pub fn new(project: &str, project_root: &str, principal: Option<Principal>) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.to_string(),
            project_root: project_root.to_string(),
            principal,
            client: RwLock::new(None),
            initialized: AtomicBool::new(false),
            open_paths: StdMutex::new(HashSet::new()),
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn project_root(&self) -> &str {
        &self.project_root
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The live frame-sending capability, or `session_gone` when disconnected
    pub async fn client(&self) -> GatewayResult<Arc<ClientRpc>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::SessionGone {
                session_id: self.id.clone(),
            })
    }

    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    pub async fn attach_client(&self, client: Arc<ClientRpc>) {
        *self.client.write().await = Some(client);
    }

    /// Detach the socket capability and fail its pending server-originated
    /// RPCs; the session itself lives on in the grace table
    pub async fn detach_client(&self) {
        let detached = self.client.write().await.take();
        if let Some(client) = detached {
            client.close().await;
        }
    }

    pub fn note_open_path(&self, virtual_path: &str) {
        self.open_paths
            .lock()
            .unwrap()
            .insert(virtual_path.to_string());
    }

    pub fn open_paths(&self) -> Vec<String> {
        self.open_paths.lock().unwrap().iter().cloned().collect()
    }

    /// Whether a reconnecting handshake matches this session's binding
    pub fn matches(&self, project: &str, project_root: &str) -> bool {
        self.project == project && self.project_root == project_root
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("project_root", &self.project_root)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_identity() {
        let session = Session::new("P", "/u/P", None);
        assert_eq!(session.project(), "P");
        assert!(!session.is_initialized());
        session.mark_initialized();
        assert!(session.is_initialized());
        assert!(session.matches("P", "/u/P"));
        assert!(!session.matches("P", "/u/Q"));
    }

    #[tokio::test]
    async fn test_disconnected_session_has_no_client() {
        let session = Session::new("P", "/u/P", None);
        let err = session.client().await.unwrap_err();
        assert_eq!(err.kind(), "session_gone");
    }

    #[tokio::test]
    async fn test_open_path_tracking() {
        let session = Session::new("P", "/u/P", None);
        session.note_open_path("/src/x.ts");
        session.note_open_path("/src/x.ts");
        assert_eq!(session.open_paths().len(), 1);
    }
}
