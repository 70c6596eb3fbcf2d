//! The core transport trait.

use std::fmt;

use async_trait::async_trait;

use duplexmcp_protocol::ProtocolVersion;

use crate::error::TransportResult;
use crate::message::{Frame, SendOptions};

/// Declares what a transport can do; the engine consults this before
/// issuing operations the transport cannot honor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Whether the server side may initiate requests to the client over
    /// this transport. Stateless HTTP cannot.
    pub supports_server_requests: bool,
    /// Whether the transport maintains per-connection state across frames.
    pub stateful: bool,
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            supports_server_requests: true,
            stateful: true,
        }
    }
}

/// An async, bidirectional, ordered byte-frame channel.
///
/// The transport owns framing; the engine owns everything above it. A
/// `receive` returning `Ok(None)` signals an orderly end of stream and
/// triggers the engine's close path.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// What this transport supports.
    fn capabilities(&self) -> &TransportCapabilities;

    /// Establish the connection to the remote endpoint.
    async fn connect(&self) -> TransportResult<()>;

    /// Close the connection to the remote endpoint.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Send a single frame.
    async fn send(&self, frame: Frame, options: SendOptions) -> TransportResult<()>;

    /// Receive the next frame, or `None` at end of stream.
    async fn receive(&self) -> TransportResult<Option<Frame>>;

    /// Called once after a successful handshake so transports that embed
    /// the protocol version in headers can update themselves.
    fn set_protocol_version(&self, version: &ProtocolVersion) {
        let _ = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The trait must stay object-safe; the engine stores `Arc<dyn Transport>`.
    fn _assert_object_safe(_t: &dyn Transport) {}

    #[test]
    fn test_default_capabilities() {
        let caps = TransportCapabilities::default();
        assert!(caps.supports_server_requests);
        assert!(caps.stateful);
    }
}
