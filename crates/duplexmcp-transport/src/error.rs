//! Transport error types.

use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport is not connected.
    #[error("Not connected")]
    NotConnected,

    /// The connection has been closed.
    #[error("Connection closed")]
    Closed,

    /// Failed to send a frame.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a frame.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The requested operation is not supported by this transport.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
