//! 🗂️ Session Manager
//!
//! Owns the socket → session mapping: the active index, the project index,
//! and the timed reconnection grace table. Reconnect and expire are
//! linearizable through the disconnected table's write lock: exactly one of
//! them removes the record, so a session is never both revived and expired.

use crate::log_debug;
use crate::log_info;
use crate::session::{ClientRpc, Session};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Callback invoked exactly once when a disconnected session's grace expires
pub type ExpireCallback = Box<dyn FnOnce(Arc<Session>) + Send + Sync + 'static>;

struct DisconnectedRecord {
    session: Arc<Session>,
    since: Instant,
    expire_task: JoinHandle<()>,
    on_expire: Option<ExpireCallback>,
}

/// 📊 Session counters for the stats surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub disconnected: usize,
    pub projects: usize,
}

/// 🗂️ Active and disconnected session indexes
pub struct SessionManager {
    active: RwLock<HashMap<String, Arc<Session>>>,
    by_project: RwLock<HashMap<String, HashSet<String>>>,
    disconnected: RwLock<HashMap<String, DisconnectedRecord>>,
    grace: Duration,
}

impl SessionManager {
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            active: RwLock::new(HashMap::new()),
            by_project: RwLock::new(HashMap::new()),
            disconnected: RwLock::new(HashMap::new()),
            grace: Duration::max(grace, Duration::from_millis(1)),
        })
    }

    /// Register a freshly initialized session
    pub async fn add(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        let project = session.project().to_string();

        self.active.write().await.insert(id.clone(), session);
        self.by_project
            .write()
            .await
            .entry(project)
            .or_default()
            .insert(id);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.active.read().await.get(id).cloned()
    }

    pub async fn sessions_for_project(&self, project: &str) -> Vec<Arc<Session>> {
        let ids: Vec<String> = {
            let by_project = self.by_project.read().await;
            match by_project.get(project) {
                Some(set) => set.iter().cloned().collect(),
                None => return Vec::new(),
            }
        };
        let active = self.active.read().await;
        ids.iter().filter_map(|id| active.get(id).cloned()).collect()
    }

    /// 🔌 Move a session into the grace table and arm its expiry timer.
    /// The project index is left untouched until expiration.
    pub async fn disconnect(
        self: &Arc<Self>,
        id: &str,
        on_expire: ExpireCallback,
    ) -> Option<Arc<Session>> {
        let session = self.active.write().await.remove(id)?;
        session.detach_client().await;

        let manager = self.clone();
        let expire_id = id.to_string();
        let grace = self.grace;
        let expire_task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.expire(&expire_id).await;
        });

        self.disconnected.write().await.insert(
            id.to_string(),
            DisconnectedRecord {
                session: session.clone(),
                since: Instant::now(),
                expire_task,
                on_expire: Some(on_expire),
            },
        );

        log_info!(
            "session",
            "🔌 Session {id} disconnected; grace {}ms",
            grace.as_millis()
        );
        Some(session)
    }

    /// 🔁 Reclaim a disconnected session by id. Cancels the expiry timer,
    /// rebinds the socket capability, and restores the active index.
    pub async fn reconnect(&self, id: &str, client: Arc<ClientRpc>) -> Option<Arc<Session>> {
        let record = self.disconnected.write().await.remove(id)?;
        record.expire_task.abort();

        let session = record.session;
        session.attach_client(client).await;
        self.active
            .write()
            .await
            .insert(id.to_string(), session.clone());

        log_info!(
            "session",
            "🔁 Session {id} reconnected after {}ms",
            record.since.elapsed().as_millis()
        );
        Some(session)
    }

    /// Rebind a claimed session (from `find_reconnectable`) to a new socket
    /// and restore it to the active index
    pub async fn restore(&self, session: Arc<Session>, client: Arc<ClientRpc>) {
        session.attach_client(client).await;
        self.active
            .write()
            .await
            .insert(session.id().to_string(), session.clone());
        log_info!("session", "🔁 Session {} restored by (project, root) match", session.id());
    }

    /// Claim the first disconnected session matching (project, root).
    /// Under concurrency exactly one claimer gets it; the rest see None.
    pub async fn find_reconnectable(
        &self,
        project: &str,
        project_root: &str,
    ) -> Option<Arc<Session>> {
        let mut disconnected = self.disconnected.write().await;
        let id = disconnected
            .iter()
            .find(|(_, record)| record.session.matches(project, project_root))
            .map(|(id, _)| id.clone())?;

        let record = disconnected.remove(&id)?;
        record.expire_task.abort();
        Some(record.session)
    }

    /// ⏰ Grace expired: permanently remove the session and run the cleanup
    /// callback exactly once
    async fn expire(&self, id: &str) {
        let record = match self.disconnected.write().await.remove(id) {
            Some(record) => record,
            None => return, // reconnect won the race
        };

        self.unindex(&record.session).await;
        log_info!("session", "⏰ Session {id} expired after grace window");

        if let Some(callback) = record.on_expire {
            callback(record.session);
        }
    }

    /// Explicit teardown of a live session (protocol violation, admin kick)
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        if let Some(session) = self.active.write().await.remove(id) {
            session.detach_client().await;
            self.unindex(&session).await;
            return Some(session);
        }
        if let Some(record) = self.disconnected.write().await.remove(id) {
            record.expire_task.abort();
            self.unindex(&record.session).await;
            return Some(record.session);
        }
        None
    }

    async fn unindex(&self, session: &Arc<Session>) {
        let mut by_project = self.by_project.write().await;
        if let Some(set) = by_project.get_mut(session.project()) {
            set.remove(session.id());
            if set.is_empty() {
                by_project.remove(session.project());
            }
        }
    }

    pub async fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.active.read().await.len(),
            disconnected: self.disconnected.read().await.len(),
            projects: self.by_project.read().await.len(),
        }
    }

    /// Total sessions the manager knows about, either index
    pub async fn total(&self) -> usize {
        self.active.read().await.len() + self.disconnected.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_disconnected(&self, id: &str) -> bool {
        self.disconnected.read().await.contains_key(id)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        log_debug!("session", "🗑️ Session manager dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn test_client() -> Arc<ClientRpc> {
        let (tx, _rx) = mpsc::unbounded_channel();
        // Keep the receiver alive elsewhere in real code; tests only need
        // the capability object itself
        std::mem::forget(_rx);
        Arc::new(ClientRpc::new(tx))
    }

    #[tokio::test]
    async fn test_add_get_and_project_index() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let session = Session::new("P", "/u/P", None);
        let id = session.id().to_string();

        manager.add(session).await;
        assert!(manager.get(&id).await.is_some());
        assert_eq!(manager.sessions_for_project("P").await.len(), 1);
        assert_eq!(manager.sessions_for_project("Q").await.len(), 0);

        let stats = manager.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.projects, 1);
    }

    #[tokio::test]
    async fn test_session_in_exactly_one_index() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let session = Session::new("P", "/u/P", None);
        let id = session.id().to_string();
        manager.add(session).await;

        manager.disconnect(&id, Box::new(|_| {})).await.unwrap();
        assert!(manager.get(&id).await.is_none());
        assert!(manager.is_disconnected(&id).await);

        manager.reconnect(&id, test_client()).await.unwrap();
        assert!(manager.get(&id).await.is_some());
        assert!(!manager.is_disconnected(&id).await);
    }

    #[tokio::test]
    async fn test_reconnect_within_grace_keeps_identity() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let session = Session::new("P", "/u/P", None);
        let id = session.id().to_string();
        manager.add(session).await;

        manager.disconnect(&id, Box::new(|_| {})).await;
        let revived = manager.reconnect(&id, test_client()).await.unwrap();
        assert_eq!(revived.id(), id);
        assert_eq!(manager.sessions_for_project("P").await.len(), 1);
    }

    #[tokio::test]
    async fn test_expire_runs_callback_once() {
        let manager = SessionManager::new(Duration::from_millis(50));
        let session = Session::new("P", "/u/P", None);
        let id = session.id().to_string();
        manager.add(session).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        manager
            .disconnect(
                &id,
                Box::new(move |_| {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(manager.get(&id).await.is_none());
        assert!(!manager.is_disconnected(&id).await);
        assert_eq!(manager.stats().await.projects, 0);
        // Late reconnect after expiry must fail
        assert!(manager.reconnect(&id, test_client()).await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_cancels_expiry() {
        let manager = SessionManager::new(Duration::from_millis(50));
        let session = Session::new("P", "/u/P", None);
        let id = session.id().to_string();
        manager.add(session).await;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        manager
            .disconnect(
                &id,
                Box::new(move |_| {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        manager.reconnect(&id, test_client()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "expiry must not fire after reconnect");
        assert!(manager.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_find_reconnectable_single_claimer() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let session = Session::new("P", "/u/P", None);
        let id = session.id().to_string();
        manager.add(session).await;
        manager.disconnect(&id, Box::new(|_| {})).await;

        // Many concurrent claimers, exactly one wins
        let claims = futures::future::join_all(
            (0..8).map(|_| manager.find_reconnectable("P", "/u/P")),
        )
        .await;
        let winners = claims.iter().filter(|c| c.is_some()).count();
        assert_eq!(winners, 1);

        assert!(manager.find_reconnectable("P", "/u/Q").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_covers_both_indexes() {
        let manager = SessionManager::new(Duration::from_secs(60));

        let live = Session::new("P", "/u/P", None);
        let live_id = live.id().to_string();
        manager.add(live).await;
        assert!(manager.remove(&live_id).await.is_some());
        assert_eq!(manager.total().await, 0);

        let parked = Session::new("Q", "/u/Q", None);
        let parked_id = parked.id().to_string();
        manager.add(parked).await;
        manager.disconnect(&parked_id, Box::new(|_| {})).await;
        assert!(manager.remove(&parked_id).await.is_some());
        assert_eq!(manager.total().await, 0);
    }
}
