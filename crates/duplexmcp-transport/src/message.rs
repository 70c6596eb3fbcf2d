//! Frame and per-frame metadata types.
//!
//! The engine treats a transport as an ordered byte-frame channel; the
//! transport owns framing. Metadata rides alongside frames on transports
//! that have it (HTTP headers, authenticated identity); simple transports
//! pass `None`.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use duplexmcp_protocol::RequestId;

/// A single length-framed message crossing a transport.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The raw JSON payload
    pub payload: Bytes,
    /// Auxiliary context for transports that carry it
    pub metadata: Option<FrameMetadata>,
}

impl Frame {
    /// Create a frame with no metadata.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: None,
        }
    }

    /// Create a frame carrying metadata.
    #[must_use]
    pub fn with_metadata(payload: impl Into<Bytes>, metadata: FrameMetadata) -> Self {
        Self {
            payload: payload.into(),
            metadata: Some(metadata),
        }
    }

    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-frame auxiliary context.
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    /// Authenticated identity, when the transport authenticates
    pub auth: Option<AuthInfo>,
    /// Inbound HTTP request context, for HTTP-style transports
    pub request: Option<RequestInfo>,
    /// Session the frame belongs to, for multi-session transports
    pub session_id: Option<String>,
}

/// Authenticated identity attached to an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Stable subject identifier
    pub subject: String,
    /// Granted scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Raw claims from the credential
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub claims: HashMap<String, Value>,
}

/// Inbound HTTP request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request headers, lowercased keys
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Per-send options the engine passes to the transport.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// The request this outbound frame relates to, so HTTP-style
    /// transports can route it onto the matching response stream
    pub related_request_id: Option<RequestId>,
}

impl SendOptions {
    /// Options routing the frame to a specific request's stream.
    #[must_use]
    pub fn related_to(id: RequestId) -> Self {
        Self {
            related_request_id: Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_len() {
        let frame = Frame::new(&b"{\"jsonrpc\":\"2.0\"}"[..]);
        assert_eq!(frame.len(), 17);
        assert!(!frame.is_empty());
        assert!(frame.metadata.is_none());
    }

    #[test]
    fn test_send_options_related() {
        let options = SendOptions::related_to(RequestId::Number(4));
        assert_eq!(options.related_request_id, Some(RequestId::Number(4)));
        assert!(SendOptions::default().related_request_id.is_none());
    }
}
