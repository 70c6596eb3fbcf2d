//! Capability, backchannel, and log-level gating from handler contexts.

mod support;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use duplexmcp_protocol::LogLevel;
use duplexmcp_protocol::capabilities::{ResourcesCapabilities, ToolsCapabilities};
use duplexmcp_session::{DeclaredCapabilities, EngineOptions, HandlerRegistry, RequestOptions};
use duplexmcp_transport::TransportCapabilities;

use support::{
    drain_frames, engine_with_raw_peer, engine_with_raw_peer_caps, recv_json, send_json, settle,
};

/// Handler that reports the outcome of a gated context operation in its
/// result, so a test can observe both the error and the wire.
fn gate_probe_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_request("probe/tool-list-changed", |_: Value, ctx| async move {
        match ctx.send_tool_list_changed().await {
            Ok(()) => Ok(json!({ "sent": true })),
            Err(e) => Ok(json!({ "sent": false, "code": e.code() })),
        }
    });
    registry.register_request("probe/resource-updated", |_: Value, ctx| async move {
        match ctx.send_resource_updated("file:///watched").await {
            Ok(()) => Ok(json!({ "sent": true })),
            Err(e) => Ok(json!({ "sent": false, "code": e.code() })),
        }
    });
    registry.register_request("probe/backchannel", |_: Value, ctx| async move {
        match ctx
            .send_request("sampling/createMessage", Some(json!({})), RequestOptions::default())
            .await
        {
            Ok(_) => Ok(json!({ "sent": true })),
            Err(e) => Ok(json!({ "sent": false, "code": e.code() })),
        }
    });
    registry
}

#[tokio::test]
async fn test_undeclared_tools_capability_blocks_list_changed() {
    let (engine, peer) =
        engine_with_raw_peer(gate_probe_registry(), EngineOptions::default()).await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/tool-list-changed" }),
    )
    .await;

    let response = recv_json(&peer).await;
    assert_eq!(response["result"]["sent"], false);
    assert_eq!(response["result"]["code"], -32603);

    // No notification frame leaked out.
    settle().await;
    assert!(drain_frames(&peer).await.is_empty());
    engine.stop().await;
}

#[tokio::test]
async fn test_declared_tools_capability_allows_list_changed() {
    let options = EngineOptions {
        capabilities: DeclaredCapabilities {
            tools: Some(ToolsCapabilities {
                list_changed: Some(true),
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    let (engine, peer) = engine_with_raw_peer(gate_probe_registry(), options).await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/tool-list-changed" }),
    )
    .await;
    settle().await;

    let frames = drain_frames(&peer).await;
    let notification = frames
        .iter()
        .find(|f| f["method"] == "notifications/tools/list_changed")
        .expect("list-changed frame");
    assert!(notification.get("id").is_none());
    let response = frames
        .iter()
        .find(|f| f["id"] == 1)
        .expect("response frame");
    assert_eq!(response["result"]["sent"], true);
    engine.stop().await;
}

#[tokio::test]
async fn test_resource_updated_requires_subscribe_capability() {
    // Resources declared without subscribe support still gates updates.
    let options = EngineOptions {
        capabilities: DeclaredCapabilities {
            resources: Some(ResourcesCapabilities {
                subscribe: None,
                list_changed: Some(true),
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    let (engine, peer) = engine_with_raw_peer(gate_probe_registry(), options).await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/resource-updated" }),
    )
    .await;
    let response = recv_json(&peer).await;
    assert_eq!(response["result"]["sent"], false);
    assert_eq!(response["result"]["code"], -32603);
    engine.stop().await;
}

#[tokio::test]
async fn test_resource_updated_with_subscribe_capability() {
    let options = EngineOptions {
        capabilities: DeclaredCapabilities {
            resources: Some(ResourcesCapabilities {
                subscribe: Some(true),
                list_changed: Some(true),
            }),
            ..Default::default()
        },
        ..Default::default()
    };
    let (engine, peer) = engine_with_raw_peer(gate_probe_registry(), options).await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/resource-updated" }),
    )
    .await;
    settle().await;

    let frames = drain_frames(&peer).await;
    let notification = frames
        .iter()
        .find(|f| f["method"] == "notifications/resources/updated")
        .expect("updated frame");
    assert_eq!(notification["params"]["uri"], "file:///watched");
    engine.stop().await;
}

#[tokio::test]
async fn test_backchannel_refused_without_transport_support() {
    let engine_caps = TransportCapabilities {
        supports_server_requests: false,
        stateful: false,
    };
    let (engine, peer) =
        engine_with_raw_peer_caps(gate_probe_registry(), EngineOptions::default(), engine_caps)
            .await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/backchannel" }),
    )
    .await;

    let response = recv_json(&peer).await;
    assert_eq!(response["result"]["sent"], false);
    assert_eq!(response["result"]["code"], -32603);

    // The failed backchannel request never touched the transport: the
    // response is the only frame.
    settle().await;
    assert!(drain_frames(&peer).await.is_empty());
    engine.stop().await;
}

#[tokio::test]
async fn test_backchannel_request_reaches_peer_when_supported() {
    let (engine, peer) =
        engine_with_raw_peer(gate_probe_registry(), EngineOptions::default()).await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/backchannel" }),
    )
    .await;

    // The peer sees the engine-initiated sampling request and answers it.
    let backchannel = recv_json(&peer).await;
    assert_eq!(backchannel["method"], "sampling/createMessage");
    send_json(
        &peer,
        &json!({
            "jsonrpc": "2.0",
            "id": backchannel["id"],
            "result": { "role": "assistant" }
        }),
    )
    .await;

    let response = recv_json(&peer).await;
    assert_eq!(response["result"]["sent"], true);
    engine.stop().await;
}

#[tokio::test]
async fn test_log_gate_honors_peer_minimum_level() {
    let mut registry = HandlerRegistry::new();
    registry.register_request("probe/logs", |_: Value, ctx| async move {
        ctx.send_log(LogLevel::Debug, None, json!("noise")).await?;
        ctx.send_log(
            LogLevel::Error,
            Some("engine".to_string()),
            json!("signal"),
        )
        .await?;
        Ok(json!({}))
    });
    let (engine, peer) = engine_with_raw_peer(registry, EngineOptions::default()).await;

    // Peer configures its minimum level first.
    send_json(
        &peer,
        &json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logging/setLevel",
            "params": { "level": "warning" }
        }),
    )
    .await;
    let response = recv_json(&peer).await;
    assert_eq!(response["result"], json!({}));

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 2, "method": "probe/logs" }),
    )
    .await;
    settle().await;

    let frames = drain_frames(&peer).await;
    let logs: Vec<&Value> = frames
        .iter()
        .filter(|f| f["method"] == "notifications/message")
        .collect();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["params"]["level"], "error");
    assert_eq!(logs[0]["params"]["data"], "signal");
    engine.stop().await;
}

#[tokio::test]
async fn test_logs_flow_before_any_minimum_is_set() {
    let mut registry = HandlerRegistry::new();
    registry.register_request("probe/logs", |_: Value, ctx| async move {
        ctx.send_log(LogLevel::Debug, None, json!("early")).await?;
        Ok(json!({}))
    });
    let (engine, peer) = engine_with_raw_peer(registry, EngineOptions::default()).await;

    send_json(
        &peer,
        &json!({ "jsonrpc": "2.0", "id": 1, "method": "probe/logs" }),
    )
    .await;
    settle().await;

    let frames = drain_frames(&peer).await;
    assert!(
        frames
            .iter()
            .any(|f| f["method"] == "notifications/message")
    );
    engine.stop().await;
}
