//! Capability declarations exchanged at `initialize` time.
//!
//! A declared capability authorizes the matching notifications for the rest
//! of the session; the engine refuses to emit list-changed or
//! resource-updated frames for undeclared capabilities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::ProtocolVersion;

/// Identifying information about a protocol implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Machine-readable implementation name
    pub name: String,
    /// Human-readable display name, when it differs from `name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Implementation version string
    pub version: String,
}

impl Implementation {
    /// Create an implementation descriptor from name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            version: version.into(),
        }
    }
}

/// Capabilities a client declares at `initialize` time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,

    /// Present if the client can answer `sampling/createMessage`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapabilities>,

    /// Present if the client can answer `elicitation/create`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapabilities>,

    /// Present if the client exposes filesystem roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapabilities>,
}

/// Capabilities a server declares at `initialize` time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Experimental, non-standard capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,

    /// Present if the server sends log messages to the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapabilities>,

    /// Present if the server offers prompt templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapabilities>,

    /// Present if the server offers resources to read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapabilities>,

    /// Present if the server offers tools to call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapabilities>,
}

/// Sampling capabilities (presence-only marker)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingCapabilities {}

/// Elicitation capabilities (presence-only marker)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElicitationCapabilities {}

/// Logging capabilities (presence-only marker)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingCapabilities {}

/// Roots capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootsCapabilities {
    /// Whether the client emits `notifications/roots/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompts capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptsCapabilities {
    /// Whether the server emits `notifications/prompts/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resources capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesCapabilities {
    /// Whether the server supports `resources/subscribe`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Whether the server emits `notifications/resources/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Tools capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsCapabilities {
    /// Whether the server emits `notifications/tools/list_changed`
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Parameters of an `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol revision the client wants to speak
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,
    /// The client's declared capabilities
    pub capabilities: ClientCapabilities,
    /// Identifying information about the client
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

/// Result of an `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// The negotiated protocol revision
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,
    /// The server's declared capabilities
    pub capabilities: ServerCapabilities,
    /// Identifying information about the server
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    /// Optional usage instructions for the client's model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}
