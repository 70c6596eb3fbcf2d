//! # duplexmcp-session
//!
//! The duplexmcp protocol engine: a transport-agnostic, bidirectional
//! JSON-RPC 2.0 dispatcher for the Model Context Protocol. Either peer may
//! initiate requests and notifications concurrently; the engine correlates
//! responses through a pending request table, enforces progress-aware
//! timeouts with a hard ceiling, coalesces high-rate list-changed
//! notifications, and hands each request handler a [`RequestContext`] with
//! backchannel sends and cooperative cancellation.
//!
//! One engine owns one connection. For fan-in transports, a
//! [`SessionMultiplexer`] shares a handler registry across many engines.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use duplexmcp_session::{EngineOptions, HandlerRegistry, ProtocolEngine};
//! use duplexmcp_transport::memory;
//! use serde_json::{Value, json};
//!
//! # async fn example() -> Result<(), duplexmcp_protocol::McpError> {
//! let (client_side, server_side) = memory::pair();
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_request("tools/call", |params: Value, _ctx| async move {
//!     Ok(json!({ "content": [{ "type": "text", "text": params["arguments"]["text"] }] }))
//! });
//!
//! let server = ProtocolEngine::new(Arc::new(server_side), registry, EngineOptions::default());
//! server.connect().await?;
//!
//! let client = ProtocolEngine::new(
//!     Arc::new(client_side),
//!     HandlerRegistry::new(),
//!     EngineOptions::default(),
//! );
//! client.connect().await?;
//! client.initialize().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod debounce;
pub mod engine;
pub mod handlers;
pub mod pending;
pub mod progress;
pub mod timeout;

mod multiplex;

pub use config::{DeclaredCapabilities, EngineOptions, RequestOptions};
pub use context::RequestContext;
pub use engine::{
    CloseListener, ConnectionState, ErrorCallback, FramePreprocessor, PeerInfo, ProtocolEngine,
    ResponseRouter, UnknownMessageHandler,
};
pub use handlers::{HandlerRegistry, NotificationHandler, RequestHandler};
pub use multiplex::SessionMultiplexer;
pub use progress::{ProgressCallback, ProgressUpdate};
pub use timeout::{ProgressSignal, TimeoutController, TimeoutPolicy};
