//! The protocol error taxonomy.
//!
//! Every public engine operation either returns its typed result or one of
//! these kinds. Wire conversion is bit-exact: `from_wire(to_wire(e)) == e`
//! for every kind, with structured fields (timeout duration, cancellation
//! reason) riding in the error `data`.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;
use crate::types::error_codes;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Protocol and SDK error kinds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum McpError {
    /// Invalid JSON was received (-32700)
    #[error("{0}")]
    Parse(String),

    /// The frame is not a valid request object (-32600)
    #[error("{0}")]
    InvalidRequest(String),

    /// No handler is registered for the method (-32601)
    #[error("{0}")]
    MethodNotFound(String),

    /// Method parameters failed to decode or validate (-32602)
    #[error("{0}")]
    InvalidParams(String),

    /// Internal error (-32603)
    #[error("{0}")]
    Internal(String),

    /// The requested resource does not exist (-32002)
    #[error("{message}")]
    ResourceNotFound {
        /// Error message
        message: String,
        /// Structured detail, typically the URI
        data: Option<Value>,
    },

    /// The operation requires completing a URL elicitation first (-32042)
    #[error("{message}")]
    UrlElicitationRequired {
        /// Error message
        message: String,
        /// Structured elicitation detail
        data: Option<Value>,
    },

    /// A peer-reported error outside the reserved code space
    #[error("server error {code}: {message}")]
    Server {
        /// Wire error code
        code: i32,
        /// Error message
        message: String,
        /// Structured detail
        data: Option<Value>,
    },

    /// The connection closed before the operation completed (-32000)
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport failed (-32003)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request deadline expired (-32001)
    #[error("Request timed out after {timeout:?}")]
    Timeout {
        /// The deadline that expired: the base timeout, or the hard
        /// ceiling when `max_total` is set
        timeout: Duration,
        /// Whether the hard ceiling expired rather than the base deadline
        max_total: bool,
    },

    /// The request was cancelled (-32004)
    #[error("Request cancelled")]
    Cancelled {
        /// Optional reason supplied by the canceller
        reason: Option<String>,
    },
}

impl McpError {
    /// Method-not-found error with the conventional message shape.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::MethodNotFound(format!("Method not found: {method}"))
    }

    /// Resource-not-found error without structured data.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            message: message.into(),
            data: None,
        }
    }

    /// The wire code this kind maps to.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
            Self::ResourceNotFound { .. } => error_codes::RESOURCE_NOT_FOUND,
            Self::UrlElicitationRequired { .. } => error_codes::URL_ELICITATION_REQUIRED,
            Self::Server { code, .. } => *code,
            Self::ConnectionClosed => error_codes::CONNECTION_CLOSED,
            Self::Transport(_) => error_codes::TRANSPORT_ERROR,
            Self::Timeout { .. } => error_codes::REQUEST_TIMEOUT,
            Self::Cancelled { .. } => error_codes::REQUEST_CANCELLED,
        }
    }

    /// Convert to the wire error object.
    #[must_use]
    pub fn to_wire(&self) -> JsonRpcError {
        match self {
            Self::Parse(m)
            | Self::InvalidRequest(m)
            | Self::MethodNotFound(m)
            | Self::InvalidParams(m)
            | Self::Internal(m) => JsonRpcError::new(self.code(), m.clone()),
            Self::ResourceNotFound { message, data }
            | Self::UrlElicitationRequired { message, data } => JsonRpcError {
                code: self.code(),
                message: message.clone(),
                data: data.clone(),
            },
            Self::Server {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            Self::ConnectionClosed => JsonRpcError::new(self.code(), "Connection closed"),
            Self::Transport(m) => JsonRpcError::new(self.code(), format!("Transport error: {m}")),
            Self::Timeout { timeout, max_total } => JsonRpcError::with_data(
                self.code(),
                "Request timed out",
                json!({
                    "timeoutMs": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "maxTotal": max_total,
                }),
            ),
            Self::Cancelled { reason } => JsonRpcError {
                code: self.code(),
                message: "Request cancelled".to_string(),
                data: reason.as_ref().map(|r| json!({ "reason": r })),
            },
        }
    }

    /// Reconstruct an error kind from the wire error object.
    #[must_use]
    pub fn from_wire(error: JsonRpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            data,
        } = error;
        match code {
            error_codes::PARSE_ERROR => Self::Parse(message),
            error_codes::INVALID_REQUEST => Self::InvalidRequest(message),
            error_codes::METHOD_NOT_FOUND => Self::MethodNotFound(message),
            error_codes::INVALID_PARAMS => Self::InvalidParams(message),
            error_codes::INTERNAL_ERROR => Self::Internal(message),
            error_codes::RESOURCE_NOT_FOUND => Self::ResourceNotFound { message, data },
            error_codes::URL_ELICITATION_REQUIRED => {
                Self::UrlElicitationRequired { message, data }
            }
            error_codes::CONNECTION_CLOSED => Self::ConnectionClosed,
            error_codes::TRANSPORT_ERROR => Self::Transport(
                message
                    .strip_prefix("Transport error: ")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            error_codes::REQUEST_TIMEOUT => {
                let millis = data
                    .as_ref()
                    .and_then(|d| d.get("timeoutMs"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let max_total = data
                    .as_ref()
                    .and_then(|d| d.get("maxTotal"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Self::Timeout {
                    timeout: Duration::from_millis(millis),
                    max_total,
                }
            }
            error_codes::REQUEST_CANCELLED => Self::Cancelled {
                reason: data
                    .as_ref()
                    .and_then(|d| d.get("reason"))
                    .and_then(Value::as_str)
                    .map(String::from),
            },
            other => Self::Server {
                code: other,
                message,
                data,
            },
        }
    }

    /// Remap non-domain failures before transmission so internals never
    /// leak over the wire.
    #[must_use]
    pub fn internal_sanitized() -> Self {
        Self::Internal("An internal error occurred".to_string())
    }

    /// Returns `true` for kinds that terminate the session.
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}
