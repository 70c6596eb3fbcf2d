//! Core wire-level identifier and parameter types.
//!
//! Request ids and progress tokens are tagged sums of string-or-integer per
//! JSON-RPC 2.0 and MCP. Both serialize untagged so the wire variant is
//! preserved exactly across a decode/encode round trip.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request identifier - can be string or number.
///
/// Unique among in-flight requests from the same sender. Null ids are a
/// protocol violation on the request path and are rejected by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        Self::Number(i64::from(n))
    }
}

/// Progress token correlating `notifications/progress` to an originating
/// request or long-lived task.
///
/// Carried in `_meta.progressToken`. Distinct from the request id so a
/// progress stream can outlive the request that opened it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String token
    String(String),
    /// Numeric token
    Number(i64),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for ProgressToken {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for ProgressToken {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for ProgressToken {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// Request metadata carried under the reserved `_meta` params key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Token identifying the progress stream for this request, if any
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,

    /// Unrecognized `_meta` fields, preserved for forward compatibility
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl RequestMeta {
    /// Create metadata carrying only a progress token.
    #[must_use]
    pub fn with_progress_token(token: impl Into<ProgressToken>) -> Self {
        Self {
            progress_token: Some(token.into()),
            extra: HashMap::new(),
        }
    }

    /// Returns `true` if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.progress_token.is_none() && self.extra.is_empty()
    }
}

/// Parameters of a `notifications/progress` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// Token identifying the progress stream
    #[serde(rename = "progressToken")]
    pub progress_token: ProgressToken,
    /// Progress made so far; must increase for each notification on a token
    pub progress: f64,
    /// Total expected, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable progress message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parameters of a `notifications/cancelled` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledParams {
    /// Id of the request being cancelled
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    /// Optional reason, suitable for logging or display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters of a `notifications/message` log notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    /// Severity of the message
    pub level: LogLevel,
    /// Optional logger name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary structured payload
    pub data: Value,
}

/// Parameters of a `logging/setLevel` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetLevelParams {
    /// Minimum level the peer wants to receive
    pub level: LogLevel,
}

/// Syslog-style severity levels used by MCP log notifications.
///
/// Ordered from least to most severe, so `level >= minimum` is the
/// delivery gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed debugging information
    Debug,
    /// Normal operational messages
    Info,
    /// Normal but significant events
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System is unusable
    Emergency,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

/// Well-known MCP method names.
///
/// The engine is method-agnostic beyond the lifecycle methods it
/// intercepts; everything else routes to user handlers by string.
pub mod methods {
    /// Mandatory first request of a session
    pub const INITIALIZE: &str = "initialize";
    /// Utility liveness request, answered with an empty result
    pub const PING: &str = "ping";
    /// Peer's minimum log level configuration
    pub const SET_LOG_LEVEL: &str = "logging/setLevel";

    /// Client signals the handshake is complete
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Advisory request cancellation
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress update on a token
    pub const PROGRESS: &str = "notifications/progress";
    /// Log message notification
    pub const LOG_MESSAGE: &str = "notifications/message";

    /// Server's tool list changed
    pub const TOOL_LIST_CHANGED: &str = "notifications/tools/list_changed";
    /// Server's resource list changed
    pub const RESOURCE_LIST_CHANGED: &str = "notifications/resources/list_changed";
    /// Server's prompt list changed
    pub const PROMPT_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    /// A subscribed resource changed
    pub const RESOURCE_UPDATED: &str = "notifications/resources/updated";
    /// Client's roots list changed
    pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
    /// Long-running task status update
    pub const TASK_STATUS: &str = "notifications/task/status";
    /// URL elicitation flow completed out of band
    pub const ELICITATION_COMPLETE: &str = "notifications/elicitation/complete";

    /// Server asks the client for user input
    pub const ELICITATION_CREATE: &str = "elicitation/create";
    /// Server asks the client to sample its LLM
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
}

/// JSON-RPC and MCP error codes used on the wire.
pub mod error_codes {
    /// Parse error - invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - the JSON is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    /// MCP: requested resource does not exist
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
    /// MCP: operation requires completing a URL elicitation first
    pub const URL_ELICITATION_REQUIRED: i32 = -32042;

    /// SDK: the connection closed before a response arrived
    pub const CONNECTION_CLOSED: i32 = -32000;
    /// SDK: the request deadline expired
    pub const REQUEST_TIMEOUT: i32 = -32001;
    /// SDK: the transport failed
    pub const TRANSPORT_ERROR: i32 = -32003;
    /// SDK: the request was cancelled locally
    pub const REQUEST_CANCELLED: i32 = -32004;
}
