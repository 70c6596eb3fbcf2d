//! Per-request handler context.
//!
//! Every dispatched request handler receives an immutable [`RequestContext`]
//! carrying the request's identity and the backchannel operations: sends,
//! progress, gated logging, and cooperative cancellation. The context holds
//! only a weak link back to the engine, so handler code can run on any
//! executor without creating an ownership cycle; operations on a stopped
//! engine fail with `ConnectionClosed`.

use std::sync::{Arc, Weak};

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use duplexmcp_protocol::types::{CancelledParams, LoggingMessageParams, ProgressParams, methods};
use duplexmcp_protocol::{LogLevel, McpError, ProgressToken, RequestId, RequestMeta};
use duplexmcp_transport::{AuthInfo, RequestInfo};

use crate::config::RequestOptions;
use crate::engine::EngineShared;

/// Weak handle from a context back into its engine.
#[derive(Clone)]
pub(crate) struct SessionLink {
    shared: Weak<EngineShared>,
}

impl SessionLink {
    pub(crate) fn new(shared: Weak<EngineShared>) -> Self {
        Self { shared }
    }

    fn upgrade(&self) -> Result<Arc<EngineShared>, McpError> {
        self.shared.upgrade().ok_or(McpError::ConnectionClosed)
    }
}

struct ContextInner {
    session_id: Option<String>,
    request_id: RequestId,
    meta: Option<RequestMeta>,
    task_id: Option<String>,
    auth: Option<AuthInfo>,
    request_info: Option<RequestInfo>,
    cancellation: CancellationToken,
    link: SessionLink,
}

/// The capability bundle passed to each request handler invocation.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.inner.session_id)
            .field("request_id", &self.inner.request_id)
            .field("task_id", &self.inner.task_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: Option<String>,
        request_id: RequestId,
        meta: Option<RequestMeta>,
        task_id: Option<String>,
        auth: Option<AuthInfo>,
        request_info: Option<RequestInfo>,
        cancellation: CancellationToken,
        link: SessionLink,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                session_id,
                request_id,
                meta,
                task_id,
                auth,
                request_info,
                cancellation,
                link,
            }),
        }
    }

    /// A context with no live engine behind it; every send fails with
    /// `ConnectionClosed`. Used by handler unit tests.
    #[must_use]
    pub fn detached(request_id: RequestId) -> Self {
        Self::new(
            None,
            request_id,
            None,
            None,
            None,
            None,
            CancellationToken::new(),
            SessionLink::new(Weak::new()),
        )
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The session this request arrived on; `None` for single-connection
    /// transports.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.inner.session_id.as_deref()
    }

    /// The id of the request being handled.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.inner.request_id
    }

    /// The request's `_meta`, when present.
    #[must_use]
    pub fn meta(&self) -> Option<&RequestMeta> {
        self.inner.meta.as_ref()
    }

    /// The progress token from `_meta.progressToken`, when present.
    #[must_use]
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.inner.meta.as_ref()?.progress_token.as_ref()
    }

    /// The task this request is part of, when any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.inner.task_id.as_deref()
    }

    /// Authenticated identity, for transports that authenticate.
    #[must_use]
    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.inner.auth.as_ref()
    }

    /// Inbound HTTP request context, for HTTP transports.
    #[must_use]
    pub fn request_info(&self) -> Option<&RequestInfo> {
        self.inner.request_info.as_ref()
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Returns `true` once the peer has cancelled this request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Cooperative cancellation check for long-running handlers.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Cancelled`] once the request has been cancelled.
    pub fn check_cancellation(&self) -> Result<(), McpError> {
        if self.is_cancelled() {
            Err(McpError::Cancelled { reason: None })
        } else {
            Ok(())
        }
    }

    /// Resolves when this request is cancelled; usable in `select!`.
    pub async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await;
    }

    // ------------------------------------------------------------------
    // Backchannel sends
    // ------------------------------------------------------------------

    /// Send a notification tied to this request's stream.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` once the session has stopped, or with
    /// a transport error if the frame cannot be sent.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        shared
            .notify(method, params, Some(self.inner.request_id.clone()))
            .await
    }

    /// Send a request to the peer and await its response result.
    ///
    /// # Errors
    ///
    /// Fails fast with `InternalError` when the transport declares no
    /// support for engine-initiated requests, without touching the
    /// transport.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, McpError> {
        let shared = self.inner.link.upgrade()?;
        if !shared.supports_server_requests() {
            return Err(McpError::Internal(
                "Transport does not support requests to the peer".to_string(),
            ));
        }
        shared.request(method, params, options).await
    }

    /// Send a progress notification on a token.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` once the session has stopped.
    pub async fn send_progress(
        &self,
        token: ProgressToken,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<(), McpError> {
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        };
        self.send_notification(methods::PROGRESS, Some(serialize_params(&params)?))
            .await
    }

    /// Send a log message, gated by the peer's configured minimum level.
    ///
    /// Messages below the minimum are silently skipped.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` once the session has stopped.
    pub async fn send_log(
        &self,
        level: LogLevel,
        logger: Option<String>,
        data: Value,
    ) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        if let Some(minimum) = shared.peer_log_minimum()
            && level < minimum
        {
            return Ok(());
        }
        let params = LoggingMessageParams {
            level,
            logger,
            data,
        };
        shared
            .notify(
                methods::LOG_MESSAGE,
                Some(serialize_params(&params)?),
                Some(self.inner.request_id.clone()),
            )
            .await
    }

    /// Notify the peer that a subscribed resource changed.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the resources subscribe capability
    /// was not declared; no frame is emitted.
    pub async fn send_resource_updated(&self, uri: &str) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        let subscribable = shared
            .declared_capabilities()
            .resources
            .as_ref()
            .is_some_and(|r| r.subscribe.unwrap_or(false));
        if !subscribable {
            return Err(McpError::Internal(
                "Resource subscriptions capability was not declared".to_string(),
            ));
        }
        shared
            .notify(
                methods::RESOURCE_UPDATED,
                Some(json!({ "uri": uri })),
                None,
            )
            .await
    }

    /// Notify all interest in the tool list changing. Coalesced when the
    /// method is in the engine's debounce set.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the tools capability was not
    /// declared; no frame is emitted.
    pub async fn send_tool_list_changed(&self) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        if shared.declared_capabilities().tools.is_none() {
            return Err(McpError::Internal(
                "Tools capability was not declared".to_string(),
            ));
        }
        shared.notify(methods::TOOL_LIST_CHANGED, None, None).await
    }

    /// Notify that the prompt list changed.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the prompts capability was not
    /// declared; no frame is emitted.
    pub async fn send_prompt_list_changed(&self) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        if shared.declared_capabilities().prompts.is_none() {
            return Err(McpError::Internal(
                "Prompts capability was not declared".to_string(),
            ));
        }
        shared
            .notify(methods::PROMPT_LIST_CHANGED, None, None)
            .await
    }

    /// Notify that the resource list changed.
    ///
    /// # Errors
    ///
    /// Fails with `InternalError` when the resources capability was not
    /// declared; no frame is emitted.
    pub async fn send_resource_list_changed(&self) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        if shared.declared_capabilities().resources.is_none() {
            return Err(McpError::Internal(
                "Resources capability was not declared".to_string(),
            ));
        }
        shared
            .notify(methods::RESOURCE_LIST_CHANGED, None, None)
            .await
    }

    /// Send an advisory cancellation for a request; defaults to this one.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` once the session has stopped.
    pub async fn send_cancelled(
        &self,
        request_id: Option<RequestId>,
        reason: Option<String>,
    ) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        let params = CancelledParams {
            request_id: request_id.unwrap_or_else(|| self.inner.request_id.clone()),
            reason,
        };
        shared
            .notify(methods::CANCELLED, Some(serialize_params(&params)?), None)
            .await
    }

    /// Send a long-running task status update.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` once the session has stopped.
    pub async fn send_task_status(&self, task: Value) -> Result<(), McpError> {
        let shared = self.inner.link.upgrade()?;
        shared.notify(methods::TASK_STATUS, Some(task), None).await
    }

    /// Ask the peer's user for input via a form; awaits the response.
    ///
    /// # Errors
    ///
    /// Same contract as [`RequestContext::send_request`].
    pub async fn elicit(&self, form: Value) -> Result<Value, McpError> {
        self.send_request(
            methods::ELICITATION_CREATE,
            Some(form),
            RequestOptions::default(),
        )
        .await
    }

    /// Ask the peer's user to complete an action at a URL; awaits the
    /// response.
    ///
    /// # Errors
    ///
    /// Same contract as [`RequestContext::send_request`].
    pub async fn elicit_url(
        &self,
        message: &str,
        url: &str,
        elicitation_id: &str,
    ) -> Result<Value, McpError> {
        self.send_request(
            methods::ELICITATION_CREATE,
            Some(json!({
                "mode": "url",
                "message": message,
                "url": url,
                "elicitationId": elicitation_id,
            })),
            RequestOptions::default(),
        )
        .await
    }
}

fn serialize_params<T: serde::Serialize>(params: &T) -> Result<Value, McpError> {
    serde_json::to_value(params).map_err(|e| McpError::Internal(e.to_string()))
}
