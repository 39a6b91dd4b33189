//! 🔬 Dispatcher + FS bridge integration tests
//!
//! Tool calls flow through the real dispatcher against a fake client that
//! serves file content over the bridge's server-originated RPCs. LSP-backed
//! tools are exercised up to the pool-acquire boundary (no language servers
//! are installed in CI); file and batch tools run end to end.

mod common;

use common::{connected_session, FakeClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::PoolConfig;
use switchboard::fsbridge::FsBridge;
use switchboard::lsp::languages::LanguageRegistry;
use switchboard::lsp::pool::LspPool;
use switchboard::mcp::Dispatcher;
use switchboard::rpc::message::{JsonRpcRequest, RequestId};
use switchboard::session::Session;

fn test_stack() -> (Arc<LspPool>, Arc<FsBridge>, Arc<Dispatcher>) {
    let pool = LspPool::new(LanguageRegistry::new(), PoolConfig::default());
    let bridge = FsBridge::new(pool.clone());
    let dispatcher = Dispatcher::new(pool.clone(), bridge.clone(), Duration::from_secs(5));
    (pool, bridge, dispatcher)
}

#[tokio::test]
async fn test_read_file_tool_roundtrip() {
    let (_pool, _bridge, dispatcher) = test_stack();
    let client = FakeClient::new(&[("/u/P/src/x.ts", "export const foo = 1;\n")]);
    let session = connected_session(&client).await;

    let result = dispatcher
        .invoke_tool(
            &session,
            "read_file",
            json!({ "file_path": "/u/P/src/x.ts" }),
        )
        .await
        .unwrap();

    // The dispatcher rewrote the path to its virtual form
    assert_eq!(result["path"], json!("/src/x.ts"));
    assert_eq!(result["content"], json!("export const foo = 1;\n"));
    assert_eq!(client.reads(), 1);
}

#[tokio::test]
async fn test_write_then_read_coherency() {
    let (_pool, _bridge, dispatcher) = test_stack();
    let client = FakeClient::new(&[]);
    let session = connected_session(&client).await;

    dispatcher
        .invoke_tool(
            &session,
            "write_file",
            json!({ "file_path": "/u/P/src/new.ts", "content": "let y = 2;" }),
        )
        .await
        .unwrap();
    assert_eq!(client.writes(), 1);

    let result = dispatcher
        .invoke_tool(
            &session,
            "read_file",
            json!({ "file_path": "/u/P/src/new.ts" }),
        )
        .await
        .unwrap();
    assert_eq!(result["content"], json!("let y = 2;"));
    assert_eq!(client.reads(), 0, "read served from the write-through cache");
}

#[tokio::test]
async fn test_cache_invalidation_forces_fresh_read() {
    let (_pool, bridge, dispatcher) = test_stack();
    let client = FakeClient::new(&[("/u/P/src/x.ts", "before")]);
    let session = connected_session(&client).await;

    let first = dispatcher
        .invoke_tool(&session, "read_file", json!({ "file_path": "/u/P/src/x.ts" }))
        .await
        .unwrap();
    assert_eq!(first["content"], json!("before"));

    // External edit + fileChanged notification
    client.set_file("/u/P/src/x.ts", "after");
    bridge.file_changed(&session, "/u/P/src/x.ts", Some(1_700_000_001)).await;

    let second = dispatcher
        .invoke_tool(&session, "read_file", json!({ "file_path": "/u/P/src/x.ts" }))
        .await
        .unwrap();
    assert_eq!(
        second["content"],
        json!("after"),
        "a read after fileChanged must not return the previously cached bytes"
    );
}

#[tokio::test]
async fn test_batch_tool_runs_subcalls_in_order() {
    let (_pool, _bridge, dispatcher) = test_stack();
    let client = FakeClient::new(&[("/u/P/a.txt", "alpha")]);
    let session = connected_session(&client).await;

    let result = dispatcher
        .invoke_tool(
            &session,
            "batch",
            json!({
                "calls": [
                    { "method": "write_file", "params": { "file_path": "/u/P/b.txt", "content": "beta" } },
                    { "method": "read_file", "params": { "file_path": "/u/P/b.txt" } },
                    { "method": "no_such_tool", "params": {} },
                ]
            }),
        )
        .await
        .unwrap();

    let results = result["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["method"], json!("write_file"));
    assert_eq!(results[1]["result"]["content"], json!("beta"));
    assert_eq!(results[2]["error"]["kind"], json!("method_not_found"));
}

#[tokio::test]
async fn test_symbol_tool_with_unspawnable_server_fails_cleanly() {
    use switchboard::lsp::languages::ServerConfig;

    // A language whose server binary does not exist anywhere
    let mut registry = LanguageRegistry::new();
    registry.register_server(ServerConfig {
        language: "ghostlang".to_string(),
        server_command: "switchboard-test-missing-server".to_string(),
        args: vec![],
        file_extensions: vec!["ghost".to_string()],
        init_options: None,
    });
    let pool = LspPool::new(registry, PoolConfig::default());
    let bridge = FsBridge::new(pool.clone());
    let dispatcher = Dispatcher::new(pool.clone(), bridge, Duration::from_secs(5));

    let client = FakeClient::new(&[("/u/P/src/x.ghost", "spooky\n")]);
    let session = connected_session(&client).await;

    let err = dispatcher
        .invoke_tool(
            &session,
            "find_definition",
            json!({ "file_path": "/u/P/src/x.ghost", "line": 0, "character": 0 }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "internal_error");
    assert_eq!(pool.stats().await.active, 0, "no pool entry leaked");
}

#[tokio::test]
async fn test_dispatch_envelope_for_errors() {
    let (_pool, _bridge, dispatcher) = test_stack();
    let client = FakeClient::new(&[]);
    let session = connected_session(&client).await;

    let response = dispatcher
        .dispatch(
            &session,
            JsonRpcRequest::new(RequestId::from("t9"), "read_file", Some(json!({}))),
        )
        .await;
    assert_eq!(response.id, RequestId::from("t9"));
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert_eq!(error.data.unwrap()["kind"], json!("invalid_params"));
}

#[tokio::test]
async fn test_concurrent_tool_calls_share_one_read() {
    let (_pool, _bridge, dispatcher) = test_stack();
    let client = FakeClient::new(&[("/u/P/src/big.ts", "bulk content")]);
    let session = connected_session(&client).await;

    let calls = (0..8).map(|_| {
        dispatcher.invoke_tool(
            &session,
            "read_file",
            json!({ "file_path": "/u/P/src/big.ts" }),
        )
    });
    let results = futures::future::join_all(calls).await;
    for result in results {
        assert_eq!(result.unwrap()["content"], json!("bulk content"));
    }
    assert_eq!(client.reads(), 1, "concurrent reads coalesce into one RPC");
}

#[tokio::test]
async fn test_session_gone_after_detach() {
    let (_pool, _bridge, dispatcher) = test_stack();
    let session = Session::new("P", "/u/P", None);
    session.mark_initialized();

    let err = dispatcher
        .invoke_tool(&session, "read_file", json!({ "file_path": "/u/P/x.ts" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "session_gone");
}
