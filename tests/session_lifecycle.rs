//! 🔬 Session lifecycle integration tests
//!
//! Disconnect → grace → reconnect/expire flows through the public API,
//! including the cache-cleanup hook and the exactly-one-claimer guarantee.

mod common;

use common::{connected_session, FakeClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::PoolConfig;
use switchboard::fsbridge::FsBridge;
use switchboard::lsp::languages::LanguageRegistry;
use switchboard::lsp::pool::LspPool;
use switchboard::session::SessionManager;

fn test_bridge() -> Arc<FsBridge> {
    let pool = LspPool::new(LanguageRegistry::new(), PoolConfig::default());
    FsBridge::new(pool)
}

#[tokio::test]
async fn test_disconnect_then_reconnect_keeps_session_id() {
    let manager = SessionManager::new(Duration::from_secs(60));
    let client = FakeClient::new(&[]);
    let session = connected_session(&client).await;
    let id = session.id().to_string();
    manager.add(session).await;

    manager.disconnect(&id, Box::new(|_| {})).await.unwrap();
    assert!(manager.get(&id).await.is_none());

    let replacement = FakeClient::new(&[]);
    let revived = manager.reconnect(&id, replacement.rpc.clone()).await.unwrap();
    assert_eq!(revived.id(), id, "same session id honored across reconnect");
    assert_eq!(revived.project(), "P");
    assert!(revived.is_connected().await);
    assert_eq!(
        manager.sessions_for_project("P").await.len(),
        1,
        "exactly one session for the project after reconnect"
    );
}

#[tokio::test]
async fn test_expiry_purges_session_cache() {
    let manager = SessionManager::new(Duration::from_millis(50));
    let bridge = test_bridge();

    let client = FakeClient::new(&[("/u/P/src/x.ts", "const x = 1;")]);
    let session = connected_session(&client).await;
    let id = session.id().to_string();
    manager.add(session.clone()).await;

    bridge.read(&session, "/src/x.ts").await.unwrap();
    assert_eq!(bridge.cache_stats().await.entries, 1);

    let purged = Arc::new(AtomicUsize::new(0));
    let purged_clone = purged.clone();
    let bridge_clone = bridge.clone();
    manager
        .disconnect(
            &id,
            Box::new(move |expired| {
                let bridge = bridge_clone.clone();
                let purged = purged_clone.clone();
                tokio::spawn(async move {
                    bridge.purge_session(expired.id()).await;
                    purged.fetch_add(1, Ordering::SeqCst);
                });
            }),
        )
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(purged.load(Ordering::SeqCst), 1, "cleanup hook ran exactly once");
    assert_eq!(
        bridge.cache_stats().await.entries,
        0,
        "session destruction implies cache destruction for that session"
    );

    // The next operation on the expired session is session_gone
    let err = bridge.read(&session, "/src/x.ts").await.unwrap_err();
    assert_eq!(err.kind(), "session_gone");
}

#[tokio::test]
async fn test_find_reconnectable_by_project_and_root() {
    let manager = SessionManager::new(Duration::from_secs(60));
    let client = FakeClient::new(&[]);
    let session = connected_session(&client).await;
    let id = session.id().to_string();
    manager.add(session).await;
    manager.disconnect(&id, Box::new(|_| {})).await;

    // The client lost its session id but rejoins by (project, root)
    let claimed = manager.find_reconnectable("P", "/u/P").await.unwrap();
    assert_eq!(claimed.id(), id);

    let replacement = FakeClient::new(&[]);
    manager.restore(claimed.clone(), replacement.rpc.clone()).await;
    assert!(manager.get(&id).await.is_some());
    assert!(claimed.is_connected().await);
}

#[tokio::test]
async fn test_reconnect_and_expire_are_exclusive() {
    // Race grace expiry against reconnect many times; exactly one side must
    // win each round and the loser must observe nothing
    for _ in 0..10 {
        let manager = SessionManager::new(Duration::from_millis(10));
        let client = FakeClient::new(&[]);
        let session = connected_session(&client).await;
        let id = session.id().to_string();
        manager.add(session).await;

        let expired = Arc::new(AtomicUsize::new(0));
        let expired_clone = expired.clone();
        manager
            .disconnect(
                &id,
                Box::new(move |_| {
                    expired_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let replacement = FakeClient::new(&[]);
        let reconnected = manager.reconnect(&id, replacement.rpc.clone()).await.is_some();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let expire_count = expired.load(Ordering::SeqCst);
        assert!(
            (reconnected && expire_count == 0) || (!reconnected && expire_count == 1),
            "exactly one of reconnect/expire succeeds (reconnected: {reconnected}, expired: {expire_count})"
        );
    }
}

#[tokio::test]
async fn test_disconnected_sessions_pending_rpcs_fail() {
    let client = FakeClient::new(&[]);
    let session = connected_session(&client).await;

    // Detach while nothing is pending, then observe session_gone on use
    session.detach_client().await;
    let err = session.client().await.unwrap_err();
    assert_eq!(err.kind(), "session_gone");
}
