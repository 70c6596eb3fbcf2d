//! # duplexmcp-protocol
//!
//! Wire-level foundation for the duplexmcp protocol engine: JSON-RPC 2.0
//! envelopes, frame classification, the error taxonomy, capability types,
//! and protocol-version negotiation.
//!
//! Payload semantics (tool execution, resource fetching, prompt templating)
//! live above this crate; everything here treats method payloads as opaque
//! typed JSON.

pub mod capabilities;
pub mod codec;
pub mod error;
pub mod jsonrpc;
pub mod types;
pub mod version;

pub use capabilities::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
};
pub use codec::{BatchItem, DecodedFrame, decode_frame, encode_canonical, encode_message};
pub use error::{McpError, Result};
pub use jsonrpc::{
    JsonRpcBatch, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcVersion,
};
pub use types::{
    CancelledParams, LogLevel, LoggingMessageParams, ProgressParams, ProgressToken, RequestId,
    RequestMeta, SetLevelParams,
};
pub use version::{
    DEFAULT_NEGOTIATED_VERSION, LATEST_PROTOCOL_VERSION, ProtocolVersion,
    SUPPORTED_PROTOCOL_VERSIONS, negotiate,
};
