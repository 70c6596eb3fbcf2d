//! In-process duplex transport.
//!
//! Two connected endpoints backed by bounded channels. This is the
//! reference transport: the integration suite drives both engine roles
//! with it, and embedders can use it to wire a client and server living
//! in the same process.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use duplexmcp_protocol::ProtocolVersion;

use crate::error::{TransportError, TransportResult};
use crate::message::{Frame, SendOptions};
use crate::traits::{Transport, TransportCapabilities};

/// Frames buffered per direction before `send` applies backpressure.
const CHANNEL_CAPACITY: usize = 64;

/// One endpoint of an in-process duplex pair.
pub struct InMemoryTransport {
    capabilities: TransportCapabilities,
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Frame>>,
    connected: Mutex<bool>,
    negotiated_version: Mutex<Option<ProtocolVersion>>,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("connected", &*self.connected.lock())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Create a connected pair of endpoints with default capabilities.
#[must_use]
pub fn pair() -> (InMemoryTransport, InMemoryTransport) {
    pair_with(
        TransportCapabilities::default(),
        TransportCapabilities::default(),
    )
}

/// Create a connected pair with explicit capabilities per endpoint.
#[must_use]
pub fn pair_with(
    left: TransportCapabilities,
    right: TransportCapabilities,
) -> (InMemoryTransport, InMemoryTransport) {
    let (left_tx, right_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (right_tx, left_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        InMemoryTransport::new(left, left_tx, left_rx),
        InMemoryTransport::new(right, right_tx, right_rx),
    )
}

impl InMemoryTransport {
    fn new(
        capabilities: TransportCapabilities,
        tx: mpsc::Sender<Frame>,
        rx: mpsc::Receiver<Frame>,
    ) -> Self {
        Self {
            capabilities,
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            connected: Mutex::new(false),
            negotiated_version: Mutex::new(None),
        }
    }

    /// The protocol version recorded by [`Transport::set_protocol_version`],
    /// if the handshake has completed.
    #[must_use]
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.negotiated_version.lock().clone()
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    fn capabilities(&self) -> &TransportCapabilities {
        &self.capabilities
    }

    async fn connect(&self) -> TransportResult<()> {
        let mut connected = self.connected.lock();
        if self.tx.lock().is_none() {
            return Err(TransportError::ConnectionFailed(
                "endpoint already closed".to_string(),
            ));
        }
        *connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        *self.connected.lock() = false;
        // Dropping the sender ends the peer's receive stream after it
        // drains frames already in flight.
        self.tx.lock().take();
        Ok(())
    }

    async fn send(&self, frame: Frame, _options: SendOptions) -> TransportResult<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }
        let sender = self
            .tx
            .lock()
            .clone()
            .ok_or(TransportError::Closed)?;
        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> TransportResult<Option<Frame>> {
        Ok(self.rx.lock().await.recv().await)
    }

    fn set_protocol_version(&self, version: &ProtocolVersion) {
        *self.negotiated_version.lock() = Some(version.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_frames_cross_the_pair_in_order() {
        let (a, b) = pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        for i in 0..3 {
            a.send(Frame::new(format!("frame-{i}")), SendOptions::default())
                .await
                .unwrap();
        }
        for i in 0..3 {
            let frame = b.receive().await.unwrap().unwrap();
            assert_eq!(frame.payload, format!("frame-{i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (a, _b) = pair();
        let result = a.send(Frame::new("x"), SendOptions::default()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_ends_peer_stream() {
        let (a, b) = pair();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        a.send(Frame::new("last"), SendOptions::default())
            .await
            .unwrap();
        a.disconnect().await.unwrap();

        // In-flight frame still drains, then the stream ends.
        assert!(b.receive().await.unwrap().is_some());
        assert!(b.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_peer_close_is_closed_error() {
        let (a, b) = pair();
        a.connect().await.unwrap();
        drop(b);

        let result = a.send(Frame::new("x"), SendOptions::default()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_protocol_version_recorded() {
        let (a, _b) = pair();
        assert!(a.negotiated_version().is_none());
        a.set_protocol_version(&ProtocolVersion::from("2025-06-18"));
        assert_eq!(
            a.negotiated_version(),
            Some(ProtocolVersion::from("2025-06-18"))
        );
    }
}
