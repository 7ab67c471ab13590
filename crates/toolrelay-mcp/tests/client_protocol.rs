//! Protocol client behaviour against an in-process fake server.

mod common;

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use toolrelay_core::{ClientTimeouts, McpError};
use toolrelay_mcp::{ClientState, McpClient};

use common::{FakeServer, connect};

// ── Handshake ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn handshake_sends_initialize_then_initialized_and_settles() {
    let started = Instant::now();
    let (client, server) = connect(FakeServer::with_tools(&["echo"])).await;

    assert!(client.is_connected());
    assert_eq!(client.state(), ClientState::Connected);
    assert!(started.elapsed() >= Duration::from_millis(100));

    let received = server.received();
    assert_eq!(received[0]["method"], "initialize");
    assert_eq!(received[0]["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(received[0]["params"]["clientInfo"]["name"], "toolrelay");
    assert_eq!(received[1]["method"], "notifications/initialized");
    assert!(received[1].get("id").is_none());

    let info = client.server_info().unwrap();
    assert_eq!(info.server_info.as_ref().unwrap().name, "fake");
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_during_handshake() {
    let server = FakeServer {
        answer_initialize: false,
        ..FakeServer::default()
    };
    let (reader, writer, _handle) = server.spawn();

    let started = Instant::now();
    let result =
        McpClient::connect_streams(1, "mute", reader, writer, ClientTimeouts::default()).await;

    match result {
        Err(McpError::Timeout { operation, after }) => {
            assert_eq!(operation, "initialize");
            assert_eq!(after, Duration::from_secs(10));
        }
        other => panic!("expected handshake timeout, got {other:?}"),
    }
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

// ── Discovery ────────────────────────────────────────────────────

#[tokio::test]
async fn list_tools_follows_pagination() {
    let server = FakeServer {
        page_size: Some(2),
        ..FakeServer::with_tools(&["a", "b", "c", "d", "e"])
    };
    let (client, handle) = connect(server).await;

    let tools = client.list_tools().await.unwrap();

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c", "d", "e"]);
    assert!(tools.iter().all(|t| t.server_id == 1 && t.server_name == "fake"));
    assert_eq!(tools[0].description.as_deref(), Some("The a tool"));

    let pages = handle
        .methods()
        .iter()
        .filter(|m| *m == "tools/list")
        .count();
    assert_eq!(pages, 3);
}

#[tokio::test]
async fn server_without_tools_capability_lists_nothing() {
    let server = FakeServer {
        advertise_tools: false,
        ..FakeServer::with_tools(&["hidden"])
    };
    let (client, handle) = connect(server).await;

    assert!(client.list_tools().await.unwrap().is_empty());
    assert!(!handle.methods().iter().any(|m| m == "tools/list"));
}

#[tokio::test]
async fn list_changed_notification_marks_tools_stale() {
    let server = FakeServer {
        announce_list_changed: true,
        ..FakeServer::with_tools(&["echo"])
    };
    let (client, _handle) = connect(server).await;

    // Notification arrives right after initialized; the settle pause covers it
    assert!(client.tools_stale());
    client.list_tools().await.unwrap();
    assert!(!client.tools_stale());
}

#[tokio::test]
async fn list_changed_right_after_listing_stays_pending() {
    let server = FakeServer::with_tools(&["read"]).then_tools(&["read", "write"]);
    let (client, _handle) = connect(server).await;

    assert_eq!(client.list_tools().await.unwrap().len(), 1);

    // The server announces the change straight after its reply
    tokio::time::timeout(Duration::from_secs(1), async {
        while !client.tools_stale() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("list_changed was dropped");

    let names: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, ["read", "write"]);
    assert!(!client.tools_stale());
}

#[tokio::test]
async fn failed_listing_keeps_tools_stale() {
    let server = FakeServer {
        announce_list_changed: true,
        ..FakeServer::with_tools(&["echo"])
    };
    let (client, handle) = connect(server).await;
    assert!(client.tools_stale());

    handle.crash();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(client.list_tools().await.is_err());
    assert!(client.tools_stale());
}

// ── Invocation ───────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_calls_resolve_by_id() {
    let (client, _handle) = connect(FakeServer::default()).await;

    let (slow, fast) = tokio::join!(
        client.call_tool("slow", json!({"delay_ms": 200})),
        client.call_tool("echo", json!({"q": 1})),
    );

    assert_eq!(slow.unwrap()["content"][0]["text"], "slow done");
    assert_eq!(fast.unwrap()["content"][0]["text"], r#"{"q":1}"#);
}

#[tokio::test]
async fn tool_errors_map_to_tool_execution() {
    let (client, _handle) = connect(FakeServer::default()).await;

    assert_eq!(
        client.call_tool("fail", json!({})).await,
        Err(McpError::ToolExecution("boom".into()))
    );
    assert_eq!(
        client.call_tool("explode", json!({})).await,
        Err(McpError::ToolExecution("upstream exploded".into()))
    );
}

#[tokio::test]
async fn non_object_arguments_are_rejected_locally() {
    let (client, handle) = connect(FakeServer::default()).await;

    let err = client.call_tool("echo", json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, McpError::ToolExecution(_)));
    assert!(!handle.methods().iter().any(|m| m == "tools/call"));

    // Null becomes an empty object
    let ok = client.call_tool("echo", Value::Null).await.unwrap();
    assert_eq!(ok["content"][0]["text"], "{}");
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_does_not_poison_later_calls() {
    let (client, _handle) = connect(FakeServer::default()).await;

    let started = Instant::now();
    let err = client.call_tool("hang", json!({})).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(started.elapsed(), Duration::from_secs(30));

    assert!(client.call_tool("echo", json!({})).await.is_ok());
}

// ── Server-initiated traffic ─────────────────────────────────────

#[tokio::test]
async fn ping_from_server_is_answered() {
    let server = FakeServer {
        ping_after_initialized: true,
        ..FakeServer::default()
    };
    let (client, handle) = connect(server).await;

    // A round trip after the ping guarantees the reply was written first
    client.call_tool("echo", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let pong = handle
        .received()
        .into_iter()
        .find(|m| m["id"] == "srv-ping")
        .expect("ping reply");
    assert_eq!(pong["result"], json!({}));
}

// ── Disconnection ────────────────────────────────────────────────

#[tokio::test]
async fn server_exit_fails_pending_requests() {
    let (client, handle) = connect(FakeServer::default()).await;

    let pending = client.call_tool("hang", json!({}));
    let crash = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.crash();
    };
    let (result, ()) = tokio::join!(pending, crash);

    assert!(matches!(result, Err(McpError::Connection(_))));
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(matches!(
        client.call_tool("echo", json!({})).await,
        Err(McpError::Connection(_))
    ));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (client, _handle) = connect(FakeServer::default()).await;

    client.disconnect().await;
    client.disconnect().await;

    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(!client.is_connected());
    assert!(matches!(
        client.call_tool("echo", json!({})).await,
        Err(McpError::Connection(_))
    ));
}

// ── Real processes ───────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn process_that_never_answers_is_stopped_after_handshake_timeout() {
    use toolrelay_core::ServerConfig;

    let config = ServerConfig::new(1, "sleeper", "sleep", vec!["30".into()]);
    let timeouts = ClientTimeouts {
        handshake_ms: 200,
        shutdown_grace_ms: 500,
        ..ClientTimeouts::default()
    };

    let started = std::time::Instant::now();
    let result = McpClient::connect(&config, timeouts).await;

    assert!(result.as_ref().is_err_and(McpError::is_timeout));
    // Process was terminated rather than waited out
    assert!(started.elapsed() < Duration::from_secs(5));
}
