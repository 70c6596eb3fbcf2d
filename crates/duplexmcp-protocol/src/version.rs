//! Protocol version identifiers and negotiation.
//!
//! MCP protocol versions are ISO-style date strings. The recognized values
//! form a fixed set; negotiation picks the client's requested version when
//! supported and falls back to the server's latest otherwise.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An MCP protocol revision, identified by its `YYYY-MM-DD` release date.
///
/// Date strings order lexicographically, so the derived ordering is
/// chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub String);

impl ProtocolVersion {
    /// Returns `true` if this revision is one the engine implements.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        SUPPORTED_PROTOCOL_VERSIONS.contains(&self.0.as_str())
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProtocolVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Protocol revisions this engine implements, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// The most recent supported revision; offered when the peer requests an
/// unknown version.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// The revision assumed when a transport carries no version header: the
/// oldest stable release.
pub const DEFAULT_NEGOTIATED_VERSION: &str = "2024-11-05";

/// Negotiate a protocol version against the peer's request.
///
/// Returns the requested version if supported, else the latest this engine
/// implements.
#[must_use]
pub fn negotiate(requested: &ProtocolVersion) -> ProtocolVersion {
    if requested.is_supported() {
        requested.clone()
    } else {
        ProtocolVersion::from(LATEST_PROTOCOL_VERSION)
    }
}
