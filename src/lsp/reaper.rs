//! 🧟 Zombie Reaper - defense-in-depth child collection
//!
//! Pool teardown already kills and waits on children, but a `wait()` racing a
//! slow exit can miss the process. Every killed child is also handed to this
//! background task, which retries `try_wait()` until the OS has reaped the
//! process table entry or the retry budget runs out.

use crate::log_debug;
use crate::log_warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};

const REAP_INTERVAL: Duration = Duration::from_secs(2);
const MAX_REAP_ROUNDS: u32 = 30;

struct Pending {
    child: Arc<Mutex<Child>>,
    rounds: u32,
    /// After half the budget we re-issue the kill before waiting again
    rekilled: bool,
}

/// 🧟 Background reaper handle
#[derive(Clone)]
pub struct Reaper {
    tx: mpsc::UnboundedSender<Arc<Mutex<Child>>>,
}

impl Reaper {
    /// Spawn the reaper task and return its handle
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Mutex<Child>>>();

        tokio::spawn(async move {
            let mut pending: Vec<Pending> = Vec::new();
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    submitted = rx.recv() => {
                        match submitted {
                            Some(child) => pending.push(Pending { child, rounds: 0, rekilled: false }),
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let mut keep = Vec::new();
                        for mut entry in pending.drain(..) {
                            if Self::sweep_one(&mut entry).await {
                                keep.push(entry);
                            }
                        }
                        pending = keep;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Hand a killed child over for background collection
    pub fn submit(&self, child: Arc<Mutex<Child>>) {
        let _ = self.tx.send(child);
    }

    /// Returns true while the child still needs another round
    async fn sweep_one(entry: &mut Pending) -> bool {
        entry.rounds += 1;
        let mut child = entry.child.lock().await;

        match child.try_wait() {
            Ok(Some(status)) => {
                log_debug!("reaper", "🧹 Reaped child (status {status})");
                false
            }
            Ok(None) => {
                if entry.rounds >= MAX_REAP_ROUNDS {
                    log_warn!("reaper", "Giving up on unreapable child after {} rounds", entry.rounds);
                    return false;
                }
                if entry.rounds >= MAX_REAP_ROUNDS / 2 && !entry.rekilled {
                    entry.rekilled = true;
                    let _ = child.start_kill();
                }
                true
            }
            Err(e) => {
                // Already collected elsewhere or the pid is gone
                log_debug!("reaper", "try_wait failed, dropping child: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_reaper_collects_killed_child() {
        let reaper = Reaper::spawn();

        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        child.start_kill().expect("kill");

        let child = Arc::new(Mutex::new(child));
        reaper.submit(child.clone());

        // The reaper polls on a coarse interval; verify directly that the
        // child becomes collectable and that a subsequent try_wait on the
        // shared handle does not hang.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut locked = child.lock().await;
        let waited = tokio::time::timeout(Duration::from_secs(5), locked.wait()).await;
        assert!(waited.is_ok(), "killed child must be waitable");
    }
}
