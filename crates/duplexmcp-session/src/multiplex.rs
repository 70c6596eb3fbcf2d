//! Multi-session dispatch over one handler registry.
//!
//! HTTP-style transports fan many concurrent connections into one logical
//! server. The multiplexer holds the authoritative handler registry and a
//! shared capability view; each accepted connection gets its own engine
//! with a snapshot of the registry, and a close listener removes the
//! session from the active set. Registrations after a session exists take
//! effect only for subsequently created sessions.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use duplexmcp_protocol::McpError;
use duplexmcp_protocol::types::methods;
use duplexmcp_transport::Transport;

use crate::config::EngineOptions;
use crate::engine::ProtocolEngine;
use crate::handlers::HandlerRegistry;

/// Shared handler registry plus the set of live per-connection engines.
pub struct SessionMultiplexer {
    options: EngineOptions,
    registry: parking_lot::Mutex<HandlerRegistry>,
    sessions: Arc<DashMap<String, Arc<ProtocolEngine>>>,
}

impl std::fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("sessions", &self.sessions.len())
            .field("registry", &*self.registry.lock())
            .finish_non_exhaustive()
    }
}

impl SessionMultiplexer {
    /// Create a multiplexer whose sessions share the given options.
    ///
    /// Any `session_id` in the options is ignored; each session gets its
    /// own generated id.
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            registry: parking_lot::Mutex::new(HandlerRegistry::new()),
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Mutate the authoritative registry. Changes affect only sessions
    /// created afterwards; live sessions keep their snapshot.
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut HandlerRegistry) -> R) -> R {
        f(&mut self.registry.lock())
    }

    /// Bind a new transport connection to a fresh engine sharing the
    /// registered handlers, connect it, and track it until it closes.
    ///
    /// # Errors
    ///
    /// Returns the engine's connect error; the session is not tracked on
    /// failure.
    pub async fn create_session(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<ProtocolEngine>, McpError> {
        let session_id = Uuid::new_v4().to_string();
        let mut options = self.options.clone();
        options.session_id = Some(session_id.clone());

        let registry = self.registry.lock().clone();
        let engine = Arc::new(ProtocolEngine::new(transport, registry, options));
        engine.connect().await?;

        let sessions = Arc::clone(&self.sessions);
        let closing_id = session_id.clone();
        engine.add_close_listener(Box::new(move || {
            debug!(session_id = %closing_id, "session closed, removing from active set");
            sessions.remove(&closing_id);
        }));

        self.sessions.insert(session_id, Arc::clone(&engine));
        Ok(engine)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a live session by id.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<Arc<ProtocolEngine>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(&entry))
    }

    /// Snapshot of the live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<ProtocolEngine>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Broadcast a notification to every live session. Per-session send
    /// failures are logged and skipped, not propagated.
    pub async fn broadcast_notification(&self, method: &str, params: Option<Value>) {
        for engine in self.sessions() {
            if let Err(e) = engine.send_notification(method, params.clone()).await {
                warn!(
                    session_id = ?engine.session_id(),
                    method = %method,
                    error = %e,
                    "broadcast send failed"
                );
            }
        }
    }

    /// Tell every connected client the tool list changed.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the tools capability was not
    /// declared; nothing is sent.
    pub async fn send_tool_list_changed(&self) -> Result<(), McpError> {
        if self.options.capabilities.tools.is_none() {
            return Err(McpError::Internal(
                "Tools capability was not declared".to_string(),
            ));
        }
        self.broadcast_notification(methods::TOOL_LIST_CHANGED, None)
            .await;
        Ok(())
    }

    /// Tell every connected client the resource list changed.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the resources capability was not
    /// declared; nothing is sent.
    pub async fn send_resource_list_changed(&self) -> Result<(), McpError> {
        if self.options.capabilities.resources.is_none() {
            return Err(McpError::Internal(
                "Resources capability was not declared".to_string(),
            ));
        }
        self.broadcast_notification(methods::RESOURCE_LIST_CHANGED, None)
            .await;
        Ok(())
    }

    /// Tell every connected client the prompt list changed.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the prompts capability was not
    /// declared; nothing is sent.
    pub async fn send_prompt_list_changed(&self) -> Result<(), McpError> {
        if self.options.capabilities.prompts.is_none() {
            return Err(McpError::Internal(
                "Prompts capability was not declared".to_string(),
            ));
        }
        self.broadcast_notification(methods::PROMPT_LIST_CHANGED, None)
            .await;
        Ok(())
    }

    /// Stop every live session.
    pub async fn shutdown(&self) {
        for engine in self.sessions() {
            engine.stop().await;
        }
    }
}
