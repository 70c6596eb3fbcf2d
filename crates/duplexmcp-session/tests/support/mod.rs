//! Shared harness for the integration suite.
//!
//! Tests drive engines in two ways: two fully wired engines over an
//! in-process duplex, or one engine with the raw peer endpoint held by the
//! test so wire frames can be asserted byte-for-byte.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use duplexmcp_session::{EngineOptions, HandlerRegistry, ProtocolEngine, RequestContext};
use duplexmcp_transport::memory::{self, InMemoryTransport};
use duplexmcp_transport::{Frame, SendOptions, Transport, TransportCapabilities};
use duplexmcp_protocol::McpError;

/// Install the test log subscriber once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry with the canonical echo tool handler.
pub fn echo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_request("tools/call", echo_tool);
    registry
}

async fn echo_tool(params: Value, _ctx: RequestContext) -> Result<Value, McpError> {
    Ok(json!({
        "content": [{ "type": "text", "text": params["arguments"]["text"] }]
    }))
}

/// A connected engine plus the raw peer endpoint, for wire-level tests.
pub async fn engine_with_raw_peer(
    registry: HandlerRegistry,
    options: EngineOptions,
) -> (Arc<ProtocolEngine>, InMemoryTransport) {
    engine_with_raw_peer_caps(registry, options, TransportCapabilities::default()).await
}

/// Same as [`engine_with_raw_peer`] with explicit engine-side transport
/// capabilities.
pub async fn engine_with_raw_peer_caps(
    registry: HandlerRegistry,
    options: EngineOptions,
    engine_caps: TransportCapabilities,
) -> (Arc<ProtocolEngine>, InMemoryTransport) {
    init_tracing();
    let (engine_side, peer_side) = memory::pair_with(engine_caps, TransportCapabilities::default());
    peer_side.connect().await.expect("peer connect");

    let engine = Arc::new(ProtocolEngine::new(Arc::new(engine_side), registry, options));
    engine.connect().await.expect("engine connect");
    (engine, peer_side)
}

/// Two connected engines: a client (empty registry) and a server.
pub async fn engine_pair(
    server_registry: HandlerRegistry,
    server_options: EngineOptions,
    client_options: EngineOptions,
) -> (Arc<ProtocolEngine>, Arc<ProtocolEngine>) {
    engine_pair_with_client_registry(
        server_registry,
        server_options,
        HandlerRegistry::new(),
        client_options,
    )
    .await
}

/// Two connected engines with explicit registries on both sides.
pub async fn engine_pair_with_client_registry(
    server_registry: HandlerRegistry,
    server_options: EngineOptions,
    client_registry: HandlerRegistry,
    client_options: EngineOptions,
) -> (Arc<ProtocolEngine>, Arc<ProtocolEngine>) {
    init_tracing();
    let (client_side, server_side) = memory::pair();

    let server = Arc::new(ProtocolEngine::new(
        Arc::new(server_side),
        server_registry,
        server_options,
    ));
    server.connect().await.expect("server connect");

    let client = Arc::new(ProtocolEngine::new(
        Arc::new(client_side),
        client_registry,
        client_options,
    ));
    client.connect().await.expect("client connect");

    (client, server)
}

/// Send a JSON value as one frame from the raw peer.
pub async fn send_json(peer: &InMemoryTransport, value: &Value) {
    let bytes = serde_json::to_vec(value).expect("serialize frame");
    peer.send(Frame::new(bytes), SendOptions::default())
        .await
        .expect("peer send");
}

/// Receive the next frame from the raw peer and parse it.
pub async fn recv_json(peer: &InMemoryTransport) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), peer.receive())
        .await
        .expect("timed out waiting for frame")
        .expect("peer receive")
        .expect("stream ended");
    serde_json::from_slice(&frame.payload).expect("frame is JSON")
}

/// Receive a frame if one arrives within a short grace window.
pub async fn try_recv_json(peer: &InMemoryTransport) -> Option<Value> {
    match tokio::time::timeout(Duration::from_millis(50), peer.receive()).await {
        Ok(Ok(Some(frame))) => Some(serde_json::from_slice(&frame.payload).expect("frame is JSON")),
        _ => None,
    }
}

/// Drain every frame already queued at the raw peer.
pub async fn drain_frames(peer: &InMemoryTransport) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(frame) = try_recv_json(peer).await {
        frames.push(frame);
    }
    frames
}

/// Run the full handshake from the raw peer's side: send `initialize`,
/// consume the result, send `notifications/initialized`.
pub async fn raw_handshake(peer: &InMemoryTransport) -> Value {
    send_json(
        peer,
        &json!({
            "jsonrpc": "2.0",
            "id": "init",
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "raw-peer", "version": "0.0.0" }
            }
        }),
    )
    .await;
    let response = recv_json(peer).await;
    send_json(
        peer,
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    response
}

/// Yield a few times so spawned engine tasks (dispatch, debounce flush)
/// get to run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
