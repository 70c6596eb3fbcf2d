//! # duplexmcp-transport
//!
//! The transport seam of the duplexmcp engine: an async bidirectional
//! byte-frame channel with per-frame metadata and per-send routing hints.
//! Concrete network transports implement [`Transport`]; this crate ships
//! only the in-process [`memory`] duplex used for same-process wiring and
//! the test suite.

pub mod error;
pub mod memory;
pub mod message;
pub mod traits;

pub use error::{TransportError, TransportResult};
pub use message::{AuthInfo, Frame, FrameMetadata, RequestInfo, SendOptions};
pub use traits::{Transport, TransportCapabilities};
