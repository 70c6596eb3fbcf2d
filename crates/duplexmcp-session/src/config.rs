//! Engine and per-request configuration.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use duplexmcp_protocol::capabilities::{
    ClientCapabilities, ElicitationCapabilities, LoggingCapabilities, PromptsCapabilities,
    ResourcesCapabilities, RootsCapabilities, SamplingCapabilities, ServerCapabilities,
    ToolsCapabilities,
};
use duplexmcp_protocol::types::methods;
use duplexmcp_protocol::{Implementation, ProgressToken, RequestId};

use crate::progress::ProgressCallback;

/// Capabilities this engine declares at `initialize` time.
///
/// Declaration authorizes emission: a handler may only send list-changed or
/// resource-updated notifications for capabilities declared here.
#[derive(Debug, Clone, Default)]
pub struct DeclaredCapabilities {
    /// Tools offered (server role)
    pub tools: Option<ToolsCapabilities>,
    /// Resources offered (server role)
    pub resources: Option<ResourcesCapabilities>,
    /// Prompt templates offered (server role)
    pub prompts: Option<PromptsCapabilities>,
    /// Log messages sent to the peer (server role)
    pub logging: Option<LoggingCapabilities>,
    /// Sampling requests answered (client role)
    pub sampling: Option<SamplingCapabilities>,
    /// Elicitation requests answered (client role)
    pub elicitation: Option<ElicitationCapabilities>,
    /// Filesystem roots exposed (client role)
    pub roots: Option<RootsCapabilities>,
}

impl DeclaredCapabilities {
    /// The server-role capability view sent in an `InitializeResult`.
    #[must_use]
    pub fn as_server(&self) -> ServerCapabilities {
        ServerCapabilities {
            experimental: None,
            logging: self.logging.clone(),
            prompts: self.prompts.clone(),
            resources: self.resources.clone(),
            tools: self.tools.clone(),
        }
    }

    /// The client-role capability view sent in an `initialize` request.
    #[must_use]
    pub fn as_client(&self) -> ClientCapabilities {
        ClientCapabilities {
            experimental: None,
            sampling: self.sampling.clone(),
            elicitation: self.elicitation.clone(),
            roots: self.roots.clone(),
        }
    }
}

/// Static configuration for one protocol engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Identifying information exchanged during the handshake
    pub implementation: Implementation,
    /// Capabilities this side declares
    pub capabilities: DeclaredCapabilities,
    /// Refuse non-`initialize` requests until the peer has sent
    /// `notifications/initialized`
    pub strict_lifecycle: bool,
    /// Methods whose outbound notifications are coalesced per tick
    pub debounced_methods: HashSet<String>,
    /// Usage instructions included in the `InitializeResult`
    pub instructions: Option<String>,
    /// Session identifier, set by the multiplexer for fan-in transports
    pub session_id: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            implementation: Implementation::new("duplexmcp", env!("CARGO_PKG_VERSION")),
            capabilities: DeclaredCapabilities::default(),
            strict_lifecycle: false,
            debounced_methods: HashSet::new(),
            instructions: None,
            session_id: None,
        }
    }
}

impl EngineOptions {
    /// The conventional debounce set: the three list-changed methods.
    #[must_use]
    pub fn default_debounced_methods() -> HashSet<String> {
        [
            methods::TOOL_LIST_CHANGED,
            methods::RESOURCE_LIST_CHANGED,
            methods::PROMPT_LIST_CHANGED,
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }
}

/// Per-request options for outbound requests.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Explicit request id; the engine generates a monotonic integer id
    /// when absent
    pub request_id: Option<RequestId>,
    /// Base deadline for the response
    pub timeout: Option<Duration>,
    /// Refresh the deadline whenever progress arrives for this request
    pub reset_timeout_on_progress: bool,
    /// Hard ceiling on total elapsed time, regardless of progress
    pub max_total_timeout: Option<Duration>,
    /// Token identifying this request's progress stream
    pub progress_token: Option<ProgressToken>,
    /// Callback invoked for each progress notification on the token
    pub on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("request_id", &self.request_id)
            .field("timeout", &self.timeout)
            .field("reset_timeout_on_progress", &self.reset_timeout_on_progress)
            .field("max_total_timeout", &self.max_total_timeout)
            .field("progress_token", &self.progress_token)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl RequestOptions {
    /// Set the base timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable deadline refresh on progress.
    #[must_use]
    pub fn with_reset_on_progress(mut self) -> Self {
        self.reset_timeout_on_progress = true;
        self
    }

    /// Set the hard elapsed-time ceiling.
    #[must_use]
    pub fn with_max_total_timeout(mut self, max_total: Duration) -> Self {
        self.max_total_timeout = Some(max_total);
        self
    }

    /// Set the progress token carried in `_meta.progressToken`.
    #[must_use]
    pub fn with_progress_token(mut self, token: impl Into<ProgressToken>) -> Self {
        self.progress_token = Some(token.into());
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Set an explicit request id.
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Convenience for a closure callback.
    #[must_use]
    pub fn on_progress_fn(
        self,
        f: impl Fn(crate::progress::ProgressUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.with_on_progress(Arc::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_lenient() {
        let options = EngineOptions::default();
        assert!(!options.strict_lifecycle);
        assert!(options.debounced_methods.is_empty());
        assert!(options.session_id.is_none());
    }

    #[test]
    fn test_default_debounce_set() {
        let set = EngineOptions::default_debounced_methods();
        assert!(set.contains(methods::TOOL_LIST_CHANGED));
        assert!(set.contains(methods::RESOURCE_LIST_CHANGED));
        assert!(set.contains(methods::PROMPT_LIST_CHANGED));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_declared_capability_views() {
        let declared = DeclaredCapabilities {
            tools: Some(ToolsCapabilities {
                list_changed: Some(true),
            }),
            sampling: Some(SamplingCapabilities {}),
            ..Default::default()
        };
        assert!(declared.as_server().tools.is_some());
        assert!(declared.as_server().resources.is_none());
        assert!(declared.as_client().sampling.is_some());
        assert!(declared.as_client().roots.is_none());
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::default()
            .with_timeout(Duration::from_secs(2))
            .with_reset_on_progress()
            .with_max_total_timeout(Duration::from_secs(5))
            .with_progress_token("p1");
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
        assert!(options.reset_timeout_on_progress);
        assert_eq!(options.max_total_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.progress_token, Some(ProgressToken::from("p1")));
    }
}
