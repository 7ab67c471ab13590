//! Catalog discovery and tool invocation through `McpService`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use toolrelay_core::{
    ChannelEmitter, McpError, McpErrorCategory, NoopEmitter, PoolSettings, RelayEvent,
    StaticConfigSource, ToolCall, ToolInvoker,
};
use toolrelay_mcp::{ConnectionPool, McpService};

use common::{FakeConnector, FakeServer, server_config};

fn drain(events: &mut UnboundedReceiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn two_server_service() -> (McpService, UnboundedReceiver<RelayEvent>) {
    let connector = FakeConnector::new(FakeServer::default())
        .with_server("Files", FakeServer::with_tools(&["echo", "search"]))
        .with_server("Docs", FakeServer::with_tools(&["search", "fail"]));

    let (emitter, events) = ChannelEmitter::new();
    let emitter = Arc::new(emitter);
    let pool = ConnectionPool::with_connector(
        PoolSettings::default(),
        Arc::new(connector),
        emitter.clone(),
    );
    let source = StaticConfigSource::new(vec![server_config(1, "Files"), server_config(2, "Docs")]);

    let service = McpService::new(Arc::new(source), Arc::new(pool), emitter);
    (service, events)
}

// ── Discovery ────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_builds_merged_catalog() {
    let (service, mut events) = two_server_service();

    let catalog = service.initialize().await.unwrap();

    assert_eq!(catalog.len(), 4);
    // Duplicate names resolve to the first server
    assert_eq!(catalog.server_for("search"), Some(1));
    assert_eq!(catalog.server_for("docs__search"), Some(2));
    assert_eq!(catalog.server_for("fail"), Some(2));
    assert_eq!(service.server_tools(2).await.len(), 2);

    let connected = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, RelayEvent::ServerConnected { .. }))
        .count();
    assert_eq!(connected, 2);
}

#[tokio::test]
async fn disconnect_server_drops_its_tools() {
    let (service, _events) = two_server_service();
    service.initialize().await.unwrap();

    assert!(service.disconnect_server(2).await);

    let catalog = service.catalog().await;
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.server_for("fail"), None);
}

#[tokio::test]
async fn announced_tool_changes_survive_later_refreshes() {
    let connector = FakeConnector::new(FakeServer::default())
        .with_server("Files", FakeServer::with_tools(&["read"]).then_tools(&["read", "write"]));
    let pool = ConnectionPool::with_connector(
        PoolSettings::default(),
        Arc::new(connector),
        Arc::new(NoopEmitter),
    );
    let config = server_config(1, "Files");
    let service = McpService::new(
        Arc::new(StaticConfigSource::new(vec![config.clone()])),
        Arc::new(pool),
        Arc::new(NoopEmitter),
    );

    assert_eq!(service.initialize().await.unwrap().len(), 1);

    let connection = service.pool().get(&config.fingerprint()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while !connection.client().unwrap().tools_stale() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server never announced a change");

    let sizes = [
        service.refresh_catalog().await.unwrap().len(),
        service.refresh_catalog().await.unwrap().len(),
        service.refresh_catalog().await.unwrap().len(),
    ];
    assert_eq!(sizes, [2, 2, 2]);
    assert_eq!(connection.tools().len(), 2);
    assert_eq!(service.catalog().await.server_for("write"), Some(1));
}

// ── Invocation ───────────────────────────────────────────────────

#[tokio::test]
async fn invoke_routes_namespaced_names_to_owning_server() {
    let (service, _events) = two_server_service();
    let catalog = service.initialize().await.unwrap();

    let call = ToolCall::new("call_1", "files__echo", json!({"path": "/tmp"}))
        .with_server(catalog.server_for("files__echo").unwrap());
    let result = service.invoke(&call).await.unwrap();

    assert_eq!(result["content"][0]["text"], r#"{"path":"/tmp"}"#);
}

#[tokio::test]
async fn tool_failure_emits_server_error() {
    let (service, mut events) = two_server_service();
    service.initialize().await.unwrap();
    drain(&mut events);

    let call = ToolCall::new("call_2", "fail", json!({})).with_server(2);
    let err = service.invoke(&call).await.unwrap_err();
    assert_eq!(err, McpError::ToolExecution("boom".into()));

    match drain(&mut events).as_slice() {
        [RelayEvent::ServerError { error }] => {
            assert_eq!(error.server_id, Some(2));
            assert_eq!(error.category, McpErrorCategory::Tool);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_closes_everything() {
    let (service, _events) = two_server_service();
    service.initialize().await.unwrap();

    service.shutdown().await;

    assert!(service.pool().is_empty());
    assert!(service.catalog().await.is_empty());
}
