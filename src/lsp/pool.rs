//! 🏊 LSP Pool - shared language server children with crash recovery
//!
//! Entries are keyed by (project, language, workspace). An entry is created
//! lazily on first acquire, shared by refcount among concurrent tool calls,
//! restarted with bounded retries when its child dies, and reaped by the idle
//! sweeper once unused past the threshold.
//!
//! Invariants:
//! - while `restarting`, no request reaches the child; submissions queue and
//!   are replayed FIFO after the replacement is initialized
//! - a replacement child inherits no open-file state
//! - teardown kills and waits on the child under the entry's own lock; it
//!   never needs exclusive ownership of the entry handle

use crate::config::PoolConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::log_debug;
use crate::log_error;
use crate::log_info;
use crate::log_warn;
use crate::lsp::client::LspClient;
use crate::lsp::languages::LanguageRegistry;
use crate::lsp::reaper::Reaper;
use crate::lsp::types::{LspError, LspResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex as TokioMutex, RwLock};

/// How often the crash watcher polls the child when no faster signal fires
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Grace given to the LSP shutdown/exit handshake before force-kill
const GRACEFUL_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// 🔑 Pool entry identity: (project, language, workspace or default)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub project: String,
    pub language: String,
    pub workspace: Option<PathBuf>,
}

impl PoolKey {
    pub fn new(project: &str, language: &str, workspace: Option<PathBuf>) -> Self {
        Self {
            project: project.to_string(),
            language: language.to_string(),
            workspace,
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.workspace {
            Some(ws) => write!(f, "{}/{} ({})", self.project, self.language, ws.display()),
            None => write!(f, "{}/{}", self.project, self.language),
        }
    }
}

/// Lifecycle phase published on the entry's restart barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPhase {
    Ready,
    Restarting,
    Dead,
}

/// A request captured while the entry was restarting (or re-routed from an
/// in-flight crash), waiting for the replay stage
struct PendingRpc {
    method: String,
    params: Option<Value>,
    /// None for notifications
    responder: Option<oneshot::Sender<GatewayResult<Value>>>,
    retries: u32,
    enqueued_at: Instant,
}

struct EntryState {
    client: Option<Arc<LspClient>>,
    child: Option<Arc<TokioMutex<Child>>>,
    pid: Option<u32>,
    refcount: usize,
    last_used: Instant,
    crash_count: u32,
    restarting: bool,
    /// Bumped on every respawn and on eviction; a watcher whose epoch no
    /// longer matches must not run its restart path
    epoch: u64,
    pending: VecDeque<PendingRpc>,
    open_files: HashSet<String>,
}

/// 🏗️ One pooled language server child plus its bookkeeping
pub struct PoolEntry {
    key: PoolKey,
    state: StdMutex<EntryState>,
    /// Restart barrier: (phase, epoch). Every waiter shares this watch.
    phase_tx: watch::Sender<(EntryPhase, u64)>,
}

impl PoolEntry {
    fn new(key: PoolKey) -> Self {
        let (phase_tx, _) = watch::channel((EntryPhase::Restarting, 0));
        Self {
            key,
            state: StdMutex::new(EntryState {
                client: None,
                child: None,
                pid: None,
                refcount: 0,
                last_used: Instant::now(),
                crash_count: 0,
                restarting: true,
                epoch: 0,
                pending: VecDeque::new(),
                open_files: HashSet::new(),
            }),
            phase_tx,
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    fn phase_rx(&self) -> watch::Receiver<(EntryPhase, u64)> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: EntryPhase, epoch: u64) {
        let _ = self.phase_tx.send((phase, epoch));
    }

    pub fn refcount(&self) -> usize {
        self.state.lock().unwrap().refcount
    }

    pub fn crash_count(&self) -> u32 {
        self.state.lock().unwrap().crash_count
    }

    pub fn is_restarting(&self) -> bool {
        self.state.lock().unwrap().restarting
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.lock().unwrap().pid
    }

    /// Record a didOpen; returns true when the path was not open before
    pub fn mark_open(&self, virtual_path: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .open_files
            .insert(virtual_path.to_string())
    }

    pub fn holds_open(&self, virtual_path: &str) -> bool {
        self.state.lock().unwrap().open_files.contains(virtual_path)
    }
}

/// 🎫 Reference-counted acquisition of a pool entry
///
/// Dropping the guard decrements the refcount and stamps last-used.
pub struct PoolGuard {
    pool: Arc<LspPool>,
    entry: Arc<PoolEntry>,
}

impl PoolGuard {
    pub fn entry(&self) -> &Arc<PoolEntry> {
        &self.entry
    }

    pub fn key(&self) -> &PoolKey {
        self.entry.key()
    }

    /// Dispatch a request through this entry (queueing across restarts)
    pub async fn issue(
        &self,
        method: &str,
        params: Option<Value>,
        replayable: bool,
    ) -> GatewayResult<Value> {
        self.pool.issue(&self.entry, method, params, replayable).await
    }

    /// Send a notification through this entry (queueing across restarts)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> GatewayResult<()> {
        self.pool.notify_entry(&self.entry, method, params).await
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let mut state = self.entry.state.lock().unwrap();
        state.refcount = state.refcount.saturating_sub(1);
        state.last_used = Instant::now();
    }
}

/// 📊 Aggregate pool counters for the stats surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub projects: usize,
    pub languages: usize,
    pub restarting: usize,
    pub total_crashes: u64,
}

/// 🏊 The pool itself
pub struct LspPool {
    entries: RwLock<HashMap<PoolKey, Arc<PoolEntry>>>,
    registry: LanguageRegistry,
    config: PoolConfig,
    reaper: Reaper,
}

impl LspPool {
    pub fn new(registry: LanguageRegistry, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            registry,
            config,
            reaper: Reaper::spawn(),
        })
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// 🧹 Start the periodic idle sweeper
    pub fn start_sweeper(self: &Arc<Self>) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.sweep_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.sweep_idle().await;
            }
        });
    }

    /// 🎯 Acquire (or lazily create) the entry for the key
    pub async fn acquire(
        self: &Arc<Self>,
        project: &str,
        language: &str,
        workspace: Option<PathBuf>,
    ) -> GatewayResult<PoolGuard> {
        let key = PoolKey::new(project, language, workspace);

        loop {
            let existing = self.entries.read().await.get(&key).cloned();

            if let Some(entry) = existing {
                enum Verdict {
                    Acquired,
                    Wait(watch::Receiver<(EntryPhase, u64)>),
                    Stale,
                }

                let verdict = {
                    let mut state = entry.state.lock().unwrap();
                    if state.restarting {
                        Verdict::Wait(entry.phase_rx())
                    } else if state.client.is_some() {
                        state.refcount += 1;
                        state.last_used = Instant::now();
                        Verdict::Acquired
                    } else {
                        Verdict::Stale
                    }
                };

                match verdict {
                    Verdict::Acquired => {
                        return Ok(PoolGuard {
                            pool: self.clone(),
                            entry,
                        });
                    }
                    Verdict::Wait(mut rx) => {
                        // Shared restart barrier: all waiters watch the same
                        // channel; no thundering-herd respawn
                        loop {
                            let (phase, _) = *rx.borrow();
                            match phase {
                                EntryPhase::Ready => break,
                                EntryPhase::Dead => {
                                    return Err(GatewayError::LspUnrecoverable {
                                        project: key.project.clone(),
                                        language: key.language.clone(),
                                    });
                                }
                                EntryPhase::Restarting => {
                                    if rx.changed().await.is_err() {
                                        return Err(GatewayError::LspUnrecoverable {
                                            project: key.project.clone(),
                                            language: key.language.clone(),
                                        });
                                    }
                                }
                            }
                        }
                        continue; // retry the acquire from the top
                    }
                    Verdict::Stale => {
                        self.remove_entry(&key, &entry).await;
                        continue;
                    }
                }
            }

            // Spawn path: publish a restarting placeholder first so
            // concurrent acquirers wait on its barrier instead of racing us
            let entry = {
                let mut entries = self.entries.write().await;
                if entries.contains_key(&key) {
                    continue; // lost the race; retry the fast path
                }
                let entry = Arc::new(PoolEntry::new(key.clone()));
                entries.insert(key.clone(), entry.clone());
                entry
            };

            match self.spawn_into(&entry).await {
                Ok(()) => {
                    {
                        let mut state = entry.state.lock().unwrap();
                        state.refcount += 1;
                        state.last_used = Instant::now();
                    }
                    log_info!("pool", "🚀 Spawned LSP entry {}", entry.key());
                    return Ok(PoolGuard {
                        pool: self.clone(),
                        entry,
                    });
                }
                Err(e) => {
                    entry.set_phase(EntryPhase::Dead, 0);
                    self.remove_entry(&key, &entry).await;
                    log_error!("pool", "Failed to spawn LSP entry {}: {e}", key);
                    return Err(e);
                }
            }
        }
    }

    /// 📤 Dispatch a request on the entry; queues across restarts and
    /// re-routes in-flight requests that die with the child
    pub async fn issue(
        self: &Arc<Self>,
        entry: &Arc<PoolEntry>,
        method: &str,
        params: Option<Value>,
        replayable: bool,
    ) -> GatewayResult<Value> {
        let mut retries: u32 = 0;

        loop {
            enum Route {
                Client(Arc<LspClient>, u64),
                Queued(oneshot::Receiver<GatewayResult<Value>>),
            }

            let route = {
                let mut state = entry.state.lock().unwrap();
                if state.restarting {
                    let (tx, rx) = oneshot::channel();
                    state.pending.push_back(PendingRpc {
                        method: method.to_string(),
                        params: params.clone(),
                        responder: Some(tx),
                        retries,
                        enqueued_at: Instant::now(),
                    });
                    Route::Queued(rx)
                } else if let Some(client) = state.client.clone() {
                    state.last_used = Instant::now();
                    Route::Client(client, state.epoch)
                } else {
                    return Err(GatewayError::LspUnrecoverable {
                        project: entry.key.project.clone(),
                        language: entry.key.language.clone(),
                    });
                }
            };

            let (outcome, seen_epoch) = match route {
                Route::Client(client, epoch) => (
                    client.request(method, params.clone()).await,
                    Some(epoch),
                ),
                Route::Queued(rx) => {
                    // Resolved by the replay stage (or failed by teardown)
                    return rx.await.unwrap_or_else(|_| {
                        Err(GatewayError::LspUnrecoverable {
                            project: entry.key.project.clone(),
                            language: entry.key.language.clone(),
                        })
                    });
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport_failure() => {
                    // The child died under us. Mutating requests must not be
                    // replayed; everything else re-routes through the queue.
                    if !replayable {
                        return Err(GatewayError::RetriesExhausted {
                            method: method.to_string(),
                        });
                    }
                    retries += 1;
                    if retries > self.config.max_retries {
                        return Err(GatewayError::RetriesExhausted {
                            method: method.to_string(),
                        });
                    }
                    self.await_recovery(entry, seen_epoch.unwrap_or(0)).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// 📢 Send a notification on the entry; queued while restarting
    pub async fn notify_entry(
        self: &Arc<Self>,
        entry: &Arc<PoolEntry>,
        method: &str,
        params: Option<Value>,
    ) -> GatewayResult<()> {
        let client = {
            let mut state = entry.state.lock().unwrap();
            if state.restarting {
                state.pending.push_back(PendingRpc {
                    method: method.to_string(),
                    params,
                    responder: None,
                    retries: 0,
                    enqueued_at: Instant::now(),
                });
                return Ok(());
            }
            match state.client.clone() {
                Some(client) => client,
                None => {
                    return Err(GatewayError::LspUnrecoverable {
                        project: entry.key.project.clone(),
                        language: entry.key.language.clone(),
                    });
                }
            }
        };
        client.notify(method, params).await.map_err(GatewayError::from)
    }

    /// Wait until the crash watcher has moved the entry off the stale epoch
    /// (into Restarting, a fresh Ready epoch, or Dead)
    async fn await_recovery(&self, entry: &Arc<PoolEntry>, seen_epoch: u64) -> GatewayResult<()> {
        let deadline = self.config.restart_delay() + self.config.request_timeout();
        let mut rx = entry.phase_rx();

        let wait = async {
            loop {
                let (phase, epoch) = *rx.borrow();
                match phase {
                    EntryPhase::Dead => {
                        return Err(GatewayError::LspUnrecoverable {
                            project: entry.key.project.clone(),
                            language: entry.key.language.clone(),
                        });
                    }
                    EntryPhase::Restarting => return Ok(()),
                    EntryPhase::Ready if epoch != seen_epoch => return Ok(()),
                    EntryPhase::Ready => {
                        if rx.changed().await.is_err() {
                            return Err(GatewayError::LspUnrecoverable {
                                project: entry.key.project.clone(),
                                language: entry.key.language.clone(),
                            });
                        }
                    }
                }
            }
        };

        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| GatewayError::TransportClosed {
                context: format!("entry {} never recovered", entry.key),
            })?
    }

    /// 📣 Forward a didChange to every entry currently holding the path open
    pub async fn broadcast_did_change(self: &Arc<Self>, virtual_path: &str, params: Value) {
        let holders: Vec<Arc<PoolEntry>> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|e| e.holds_open(virtual_path))
                .cloned()
                .collect()
        };
        for entry in holders {
            // Best-effort per entry; a restarting entry queues the notification
            if let Err(e) = self
                .notify_entry(&entry, "textDocument/didChange", Some(params.clone()))
                .await
            {
                log_debug!("pool", "didChange to {} failed: {e}", entry.key());
            }
        }
    }

    /// 📊 Stats snapshot
    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.read().await;
        let mut projects = HashSet::new();
        let mut languages = HashSet::new();
        let mut restarting = 0;
        let mut total_crashes: u64 = 0;

        for entry in entries.values() {
            projects.insert(entry.key.project.clone());
            languages.insert(entry.key.language.clone());
            let state = entry.state.lock().unwrap();
            if state.restarting {
                restarting += 1;
            }
            total_crashes += state.crash_count as u64;
        }

        PoolStats {
            active: entries.len(),
            projects: projects.len(),
            languages: languages.len(),
            restarting,
            total_crashes,
        }
    }

    /// 🛑 Tear down everything (server shutdown)
    pub async fn shutdown_all(self: &Arc<Self>) {
        let drained: Vec<(PoolKey, Arc<PoolEntry>)> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };
        log_info!("pool", "🛑 Shutting down {} LSP entries", drained.len());
        for (_, entry) in drained {
            self.teardown_entry(&entry, "server shutdown").await;
        }
    }

    // === 🔩 Internals ===

    async fn remove_entry(&self, key: &PoolKey, entry: &Arc<PoolEntry>) {
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(key) {
            if Arc::ptr_eq(current, entry) {
                entries.remove(key);
            }
        }
    }

    /// Spawn the configured server command and initialize it into `entry`
    async fn spawn_into(self: &Arc<Self>, entry: &Arc<PoolEntry>) -> GatewayResult<()> {
        let key = entry.key().clone();
        let server = self
            .registry
            .server_for_language(&key.language)
            .ok_or_else(|| GatewayError::NoLanguageForExtension {
                extension: key.language.clone(),
            })?
            .clone();

        let (client, child, pid) = self.spawn_child(&key, &server).await.map_err(|e| {
            GatewayError::generic(format!("spawn {} failed: {e}", server.server_command))
        })?;

        client
            .initialize(server.init_options.clone())
            .await
            .map_err(|e| {
                // A child that failed its handshake must not linger
                let child = child.clone();
                tokio::spawn(async move {
                    let mut locked = child.lock().await;
                    let _ = locked.start_kill();
                    let _ = locked.wait().await;
                });
                GatewayError::from(LspError::InitializationError {
                    message: e.to_string(),
                })
            })?;

        // Surface child-pushed diagnostics into the log stream
        {
            let mut notifications = client.subscribe_notifications();
            let key = entry.key().clone();
            tokio::spawn(async move {
                while let Ok(notification) = notifications.recv().await {
                    if notification.method == "textDocument/publishDiagnostics" {
                        let count = notification
                            .params
                            .as_ref()
                            .and_then(|p| p.get("diagnostics"))
                            .and_then(|d| d.as_array())
                            .map(|a| a.len())
                            .unwrap_or(0);
                        log_debug!("pool", "🩺 {key}: {count} diagnostics published");
                    }
                }
            });
        }

        let epoch = {
            let mut state = entry.state.lock().unwrap();
            state.client = Some(client);
            state.child = Some(child.clone());
            state.pid = Some(pid);
            state.restarting = false;
            state.open_files.clear();
            state.epoch += 1;
            state.epoch
        };
        entry.set_phase(EntryPhase::Ready, epoch);
        self.start_watcher(entry.clone(), child, epoch);
        Ok(())
    }

    async fn spawn_child(
        &self,
        key: &PoolKey,
        server: &crate::lsp::languages::ServerConfig,
    ) -> LspResult<(Arc<LspClient>, Arc<TokioMutex<Child>>, u32)> {
        let workspace = match &key.workspace {
            Some(ws) => ws.clone(),
            None => std::env::temp_dir().join(format!("switchboard-{}-{}", key.project, key.language)),
        };
        if !workspace.exists() {
            tokio::fs::create_dir_all(&workspace).await.ok();
        }

        let mut command = Command::new(&server.server_command);
        command
            .args(&server.args)
            .current_dir(&workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| LspError::SpawnError {
            message: format!("{}: {e}", server.server_command),
        })?;

        let pid = child.id().ok_or_else(|| LspError::SpawnError {
            message: "child exited before pid was read".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| LspError::SpawnError {
            message: "missing stdin handle".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| LspError::SpawnError {
            message: "missing stdout handle".to_string(),
        })?;

        let client = Arc::new(LspClient::new(
            stdin,
            stdout,
            workspace,
            self.config.request_timeout(),
        ));

        Ok((client, Arc::new(TokioMutex::new(child)), pid))
    }

    /// Watch one child for exit; epoch mismatch cancels the restart path
    fn start_watcher(self: &Arc<Self>, entry: Arc<PoolEntry>, child: Arc<TokioMutex<Child>>, epoch: u64) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                {
                    let state = entry.state.lock().unwrap();
                    if state.epoch != epoch {
                        return; // evicted or already respawned; stand down
                    }
                }

                let exited = {
                    let mut locked = child.lock().await;
                    match locked.try_wait() {
                        Ok(Some(status)) => {
                            log_warn!("pool", "💥 LSP child for {} exited: {status}", entry.key());
                            true
                        }
                        Ok(None) => false,
                        Err(e) => {
                            log_warn!("pool", "💥 LSP child for {} unpollable: {e}", entry.key());
                            true
                        }
                    }
                };

                if exited {
                    pool.handle_crash(entry, child, epoch).await;
                    return;
                }
            }
        });
    }

    async fn handle_crash(self: &Arc<Self>, entry: Arc<PoolEntry>, dead: Arc<TokioMutex<Child>>, epoch: u64) {
        let crash_count = {
            let mut state = entry.state.lock().unwrap();
            if state.epoch != epoch {
                return; // teardown got here first
            }
            state.crash_count += 1;
            state.client = None;
            state.child = None;
            state.pid = None;
            state.restarting = true;
            state.crash_count
        };
        entry.set_phase(EntryPhase::Restarting, epoch);
        self.reaper.submit(dead);

        if crash_count > self.config.max_retries {
            log_error!(
                "pool",
                "☠️ LSP entry {} exceeded {} retries, giving up",
                entry.key(),
                self.config.max_retries
            );
            self.fail_entry(&entry).await;
            return;
        }

        log_info!(
            "pool",
            "🔁 Restarting LSP entry {} (crash {}/{}) after {:?}",
            entry.key(),
            crash_count,
            self.config.max_retries,
            self.config.restart_delay()
        );
        tokio::time::sleep(self.config.restart_delay()).await;

        // The sweeper or shutdown may have evicted the entry during the delay
        {
            let state = entry.state.lock().unwrap();
            if state.epoch != epoch {
                return;
            }
        }

        match self.spawn_into(&entry).await {
            Ok(()) => {
                let pending: Vec<PendingRpc> = {
                    let mut state = entry.state.lock().unwrap();
                    state.pending.drain(..).collect()
                };
                self.replay(&entry, pending).await;
            }
            Err(e) => {
                log_error!("pool", "Respawn of {} failed: {e}", entry.key());
                self.fail_entry(&entry).await;
            }
        }
    }

    /// Drain the pending queue with `lsp_unrecoverable`, mark Dead, and
    /// remove the entry from the map
    async fn fail_entry(self: &Arc<Self>, entry: &Arc<PoolEntry>) {
        let pending: Vec<PendingRpc> = {
            let mut state = entry.state.lock().unwrap();
            state.restarting = false;
            state.client = None;
            state.epoch += 1;
            state.pending.drain(..).collect()
        };
        entry.set_phase(EntryPhase::Dead, u64::MAX);

        for rpc in pending {
            if let Some(tx) = rpc.responder {
                let _ = tx.send(Err(GatewayError::LspUnrecoverable {
                    project: entry.key.project.clone(),
                    language: entry.key.language.clone(),
                }));
            }
        }
        self.remove_entry(&entry.key.clone(), entry).await;
    }

    /// Re-issue captured requests in FIFO order on the fresh child
    async fn replay(self: &Arc<Self>, entry: &Arc<PoolEntry>, pending: Vec<PendingRpc>) {
        if pending.is_empty() {
            return;
        }
        let oldest_wait = pending
            .first()
            .map(|rpc| rpc.enqueued_at.elapsed())
            .unwrap_or_default();
        log_info!(
            "pool",
            "▶️ Replaying {} requests on {} (oldest waited {:?})",
            pending.len(),
            entry.key(),
            oldest_wait
        );

        for mut rpc in pending {
            let client = {
                let state = entry.state.lock().unwrap();
                state.client.clone()
            };
            let Some(client) = client else {
                // Crashed again mid-replay; the rest re-queue for the next round
                self.requeue_or_fail(entry, rpc).await;
                continue;
            };

            match rpc.responder.take() {
                None => {
                    let _ = client.notify(&rpc.method, rpc.params.clone()).await;
                }
                Some(tx) => {
                    rpc.retries += 1;
                    if rpc.retries > self.config.max_retries {
                        let _ = tx.send(Err(GatewayError::RetriesExhausted {
                            method: rpc.method.clone(),
                        }));
                        continue;
                    }
                    let outcome = client.request(&rpc.method, rpc.params.clone()).await;
                    match outcome {
                        Ok(value) => {
                            let _ = tx.send(Ok(value));
                        }
                        Err(e) if e.is_transport_failure() => {
                            rpc.responder = Some(tx);
                            self.requeue_or_fail(entry, rpc).await;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.into()));
                        }
                    }
                }
            }
        }
    }

    async fn requeue_or_fail(&self, entry: &Arc<PoolEntry>, rpc: PendingRpc) {
        if rpc.retries > self.config.max_retries {
            if let Some(tx) = rpc.responder {
                let _ = tx.send(Err(GatewayError::RetriesExhausted {
                    method: rpc.method,
                }));
            }
            return;
        }
        let mut state = entry.state.lock().unwrap();
        if state.restarting {
            state.pending.push_back(rpc);
        } else if let Some(tx) = rpc.responder {
            let _ = tx.send(Err(GatewayError::LspUnrecoverable {
                project: entry.key.project.clone(),
                language: entry.key.language.clone(),
            }));
        }
    }

    /// 🧹 One idle sweep pass
    pub async fn sweep_idle(self: &Arc<Self>) {
        let idle_timeout = self.config.idle_timeout();
        let candidates: Vec<(PoolKey, Arc<PoolEntry>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, e)| {
                    let state = e.state.lock().unwrap();
                    state.refcount == 0
                        && !state.restarting
                        && state.last_used.elapsed() > idle_timeout
                })
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect()
        };

        for (key, entry) in candidates {
            // Re-check under the entry lock immediately before teardown: a
            // concurrent acquire may have claimed the entry since the scan
            let claim = {
                let mut state = entry.state.lock().unwrap();
                if state.refcount == 0
                    && !state.restarting
                    && state.last_used.elapsed() > idle_timeout
                {
                    state.epoch += 1; // cancels the watcher's restart path
                    true
                } else {
                    false
                }
            };
            if !claim {
                continue;
            }
            log_info!("pool", "⏰ Reaping idle LSP entry {}", key);
            self.remove_entry(&key, &entry).await;
            self.teardown_entry(&entry, "idle reap").await;
        }
    }

    /// Graceful-then-forceful teardown. Reaping happens whether or not the
    /// graceful handshake succeeds.
    async fn teardown_entry(self: &Arc<Self>, entry: &Arc<PoolEntry>, reason: &str) {
        let (client, child, pending) = {
            let mut state = entry.state.lock().unwrap();
            state.epoch += 1;
            state.restarting = false;
            (
                state.client.take(),
                state.child.take(),
                state.pending.drain(..).collect::<Vec<_>>(),
            )
        };
        entry.set_phase(EntryPhase::Dead, u64::MAX);

        for rpc in pending {
            if let Some(tx) = rpc.responder {
                let _ = tx.send(Err(GatewayError::LspUnrecoverable {
                    project: entry.key.project.clone(),
                    language: entry.key.language.clone(),
                }));
            }
        }

        if let Some(client) = client {
            let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_GRACE, client.shutdown(GRACEFUL_SHUTDOWN_GRACE)).await;
        }

        if let Some(child) = child {
            let reaped = {
                let mut locked = child.lock().await;
                let _ = locked.start_kill();
                tokio::time::timeout(GRACEFUL_SHUTDOWN_GRACE, locked.wait())
                    .await
                    .is_ok()
            };
            if !reaped {
                self.reaper.submit(child);
            }
        }
        log_debug!("pool", "🗑️ Tore down {} ({reason})", entry.key());
    }
}
