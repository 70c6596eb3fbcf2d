//! The protocol engine: one session's message loop and routing state.
//!
//! An engine owns exactly one connection: its pending request table,
//! progress subscriptions, debouncer, and request-id counter. Incoming
//! frames decode in overlap-safe order (batch of responses, response,
//! request, notification, unrecognized); requests dispatch as independent
//! tasks; responses resume pending callers. All engine state lives behind
//! short-lived locks mutated only from engine entry points, never from
//! handler code directly.
//!
//! An engine covers a single connect→close cycle. `stop()` and an
//! unexpected end of stream share one cleanup path: fail every pending
//! request with `ConnectionClosed`, cancel in-flight handlers and
//! scheduled flushes, disconnect the transport, and fire the close
//! listeners exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use duplexmcp_protocol::capabilities::{Implementation, InitializeParams, InitializeResult};
use duplexmcp_protocol::codec::{self, BatchItem, DecodedFrame};
use duplexmcp_protocol::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload,
};
use duplexmcp_protocol::types::{CancelledParams, ProgressParams, SetLevelParams, methods};
use duplexmcp_protocol::version::{LATEST_PROTOCOL_VERSION, ProtocolVersion, negotiate};
use duplexmcp_protocol::{LogLevel, McpError, ProgressToken, RequestId, RequestMeta};
use duplexmcp_transport::{Frame, SendOptions, Transport};

use crate::config::{DeclaredCapabilities, EngineOptions, RequestOptions};
use crate::context::{RequestContext, SessionLink};
use crate::debounce::{DebounceDecision, NotificationDebouncer};
use crate::handlers::HandlerRegistry;
use crate::pending::PendingRequests;
use crate::progress::{ProgressEntry, ProgressRouter};
use crate::timeout::{TimeoutController, TimeoutPolicy};

/// Connection lifecycle of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; the engine's initial and terminal state
    Disconnected,
    /// Transport connection in progress
    Connecting,
    /// Connected and processing frames
    Connected,
    /// Cleanup in progress
    Disconnecting,
}

/// Listener invoked exactly once when the session closes.
pub type CloseListener = Box<dyn FnOnce() + Send>;

/// Callback invoked when the transport fails; the unexpected-close path
/// follows.
pub type ErrorCallback = Arc<dyn Fn(&McpError) + Send + Sync>;

/// Hook that may fully handle a raw frame before decoding; return `true`
/// to absorb the frame.
pub type FramePreprocessor = Arc<dyn Fn(&Frame) -> bool + Send + Sync>;

/// Hook receiving frames that fit no JSON-RPC envelope shape.
pub type UnknownMessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// External claim on incoming responses, consulted before the pending
/// table. Task plug-ins use this to re-route results after a
/// request-to-task handoff.
pub trait ResponseRouter: Send + Sync {
    /// Return `true` to claim the response; it then bypasses the pending
    /// table.
    fn route(&self, response: &JsonRpcResponse) -> bool;
}

/// What the engine learned about its peer during the handshake.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Negotiated protocol revision
    pub protocol_version: ProtocolVersion,
    /// The peer's implementation info
    pub implementation: Implementation,
    /// The peer's declared capabilities, role-agnostic
    pub capabilities: Value,
}

pub(crate) struct EngineShared {
    pub(crate) options: EngineOptions,
    registry: HandlerRegistry,
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    pending: PendingRequests,
    progress: ProgressRouter,
    debouncer: NotificationDebouncer,
    next_request_id: AtomicI64,
    peer_initialized: AtomicBool,
    handshake: Mutex<Option<PeerInfo>>,
    peer_log_minimum: Mutex<Option<LogLevel>>,
    inflight: Mutex<HashMap<RequestId, CancellationToken>>,
    shutdown: CancellationToken,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    close_listeners: Mutex<Vec<CloseListener>>,
    on_error: Mutex<Option<ErrorCallback>>,
    preprocessor: Mutex<Option<FramePreprocessor>>,
    unknown_handler: Mutex<Option<UnknownMessageHandler>>,
    response_routers: Mutex<Vec<Arc<dyn ResponseRouter>>>,
}

/// One session's protocol engine.
pub struct ProtocolEngine {
    shared: Arc<EngineShared>,
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("state", &self.state())
            .field("session_id", &self.shared.options.session_id)
            .field("pending", &self.shared.pending.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    /// Create an engine bound to a transport, with a snapshot of the given
    /// handler registry.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        options: EngineOptions,
    ) -> Self {
        let debouncer = NotificationDebouncer::new(options.debounced_methods.clone());
        Self {
            shared: Arc::new(EngineShared {
                options,
                registry,
                transport,
                state: Mutex::new(ConnectionState::Disconnected),
                pending: PendingRequests::new(),
                progress: ProgressRouter::new(),
                debouncer,
                next_request_id: AtomicI64::new(0),
                peer_initialized: AtomicBool::new(false),
                handshake: Mutex::new(None),
                peer_log_minimum: Mutex::new(None),
                inflight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                receive_task: Mutex::new(None),
                close_listeners: Mutex::new(Vec::new()),
                on_error: Mutex::new(None),
                preprocessor: Mutex::new(None),
                unknown_handler: Mutex::new(None),
                response_routers: Mutex::new(Vec::new()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect the transport and start the receive loop.
    ///
    /// An engine covers one connect→close cycle; create a new engine for a
    /// new connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when already connected, or a transport
    /// error when the connection fails.
    pub async fn connect(&self) -> Result<(), McpError> {
        {
            let mut state = self.shared.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(McpError::InvalidRequest(
                    "engine is already connected".to_string(),
                ));
            }
            *state = ConnectionState::Connecting;
        }

        if let Err(e) = self.shared.transport.connect().await {
            *self.shared.state.lock() = ConnectionState::Disconnected;
            return Err(McpError::Transport(e.to_string()));
        }

        *self.shared.state.lock() = ConnectionState::Connected;
        let handle = self.shared.spawn_receive_loop();
        *self.shared.receive_task.lock() = Some(handle);
        Ok(())
    }

    /// Perform the client-side handshake: send `initialize`, validate the
    /// negotiated version, emit `notifications/initialized`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the server answers with an
    /// unsupported protocol version, or any request-path error.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = InitializeParams {
            protocol_version: ProtocolVersion::from(LATEST_PROTOCOL_VERSION),
            capabilities: self.shared.options.capabilities.as_client(),
            client_info: self.shared.options.implementation.clone(),
        };
        let params_value =
            serde_json::to_value(&params).map_err(|e| McpError::Internal(e.to_string()))?;
        let result_value = self
            .shared
            .request(
                methods::INITIALIZE,
                Some(params_value),
                RequestOptions::default(),
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(result_value)
            .map_err(|e| McpError::InvalidParams(format!("Invalid initialize result: {e}")))?;

        if !result.protocol_version.is_supported() {
            return Err(McpError::InvalidRequest(format!(
                "Server's protocol version is not supported: {}",
                result.protocol_version
            )));
        }

        let capabilities = serde_json::to_value(&result.capabilities)
            .map_err(|e| McpError::Internal(e.to_string()))?;
        *self.shared.handshake.lock() = Some(PeerInfo {
            protocol_version: result.protocol_version.clone(),
            implementation: result.server_info.clone(),
            capabilities,
        });
        self.shared
            .transport
            .set_protocol_version(&result.protocol_version);
        self.shared.notify(methods::INITIALIZED, None, None).await?;
        Ok(result)
    }

    /// Stop the session: cancel the receive loop (awaiting its
    /// termination), fail all pending requests with `ConnectionClosed`,
    /// disconnect the transport, and fire close listeners.
    ///
    /// A no-op when the session already closed.
    pub async fn stop(&self) {
        if !self.shared.begin_disconnect() {
            return;
        }
        self.shared.shutdown.cancel();
        let handle = self.shared.receive_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.teardown().await;
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns `true` once the peer has sent `notifications/initialized`.
    #[must_use]
    pub fn peer_is_initialized(&self) -> bool {
        self.shared.peer_initialized.load(Ordering::Acquire)
    }

    /// Handshake outcome, once `initialize` has completed in either role.
    #[must_use]
    pub fn peer_info(&self) -> Option<PeerInfo> {
        self.shared.handshake.lock().clone()
    }

    /// Negotiated protocol version, once the handshake completed.
    #[must_use]
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.shared
            .handshake
            .lock()
            .as_ref()
            .map(|p| p.protocol_version.clone())
    }

    /// This engine's session id, when created by a multiplexer.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.shared.options.session_id.as_deref()
    }

    /// Number of requests currently awaiting responses.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    // ------------------------------------------------------------------
    // Callbacks and hooks
    // ------------------------------------------------------------------

    /// Add a listener fired exactly once when the session closes, whether
    /// gracefully or unexpectedly.
    pub fn add_close_listener(&self, listener: CloseListener) {
        self.shared.close_listeners.lock().push(listener);
    }

    /// Set the callback invoked when the transport fails.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.shared.on_error.lock() = Some(callback);
    }

    /// Install a hook that may fully handle raw frames before decoding.
    pub fn set_frame_preprocessor(&self, preprocessor: FramePreprocessor) {
        *self.shared.preprocessor.lock() = Some(preprocessor);
    }

    /// Install the handler for frames that fit no envelope shape.
    pub fn set_unknown_message_handler(&self, handler: UnknownMessageHandler) {
        *self.shared.unknown_handler.lock() = Some(handler);
    }

    /// Register an external response router, consulted before the pending
    /// table.
    pub fn add_response_router(&self, router: Arc<dyn ResponseRouter>) {
        self.shared.response_routers.lock().push(router);
    }

    // ------------------------------------------------------------------
    // Outbound operations
    // ------------------------------------------------------------------

    /// Allocate the next monotonic request id. Ids are never reused within
    /// a session.
    #[must_use]
    pub fn generate_request_id(&self) -> RequestId {
        self.shared.generate_request_id()
    }

    /// Send a request and await its result.
    ///
    /// # Errors
    ///
    /// Returns the peer's error, `RequestTimeout` when a configured
    /// deadline expires, `RequestCancelled` after [`ProtocolEngine::cancel`],
    /// or `ConnectionClosed` when the session ends first.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, McpError> {
        self.shared.request(method, params, options).await
    }

    /// Send a notification, coalescing methods in the debounce set.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` when not connected, or a transport error.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        self.shared.notify(method, params, None).await
    }

    /// Send a notification routed to a specific request's stream; never
    /// debounced.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` when not connected, or a transport error.
    pub async fn send_notification_related(
        &self,
        method: &str,
        params: Option<Value>,
        related_request_id: RequestId,
    ) -> Result<(), McpError> {
        self.shared
            .notify(method, params, Some(related_request_id))
            .await
    }

    /// Cancel an outbound request: the awaiting caller observes
    /// `RequestCancelled` and a `notifications/cancelled` goes to the peer.
    ///
    /// A no-op when the request already completed.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the cancellation notification cannot
    /// be sent.
    pub async fn cancel(&self, id: &RequestId, reason: Option<String>) -> Result<(), McpError> {
        let removed = self.shared.pending.cancel(
            id,
            McpError::Cancelled {
                reason: reason.clone(),
            },
        );
        if !removed {
            return Ok(());
        }
        self.shared.progress.finish_request(id);
        let params = CancelledParams {
            request_id: id.clone(),
            reason,
        };
        let params_value =
            serde_json::to_value(&params).map_err(|e| McpError::Internal(e.to_string()))?;
        self.shared
            .notify(methods::CANCELLED, Some(params_value), None)
            .await
    }

    /// Rebind a progress subscription to a long-lived task so it survives
    /// its originating request. Returns `false` for unknown tokens.
    pub fn rebind_progress_to_task(&self, token: &ProgressToken, task_id: &str) -> bool {
        self.shared.progress.rebind_to_task(token, task_id)
    }

    /// Drop progress subscriptions for a task that reached terminal
    /// status.
    pub fn finish_task(&self, task_id: &str) {
        self.shared.progress.finish_task(task_id);
    }
}

impl EngineShared {
    // ------------------------------------------------------------------
    // State helpers
    // ------------------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), McpError> {
        if *self.state.lock() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(McpError::ConnectionClosed)
        }
    }

    fn generate_request_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn declared_capabilities(&self) -> &DeclaredCapabilities {
        &self.options.capabilities
    }

    pub(crate) fn peer_log_minimum(&self) -> Option<LogLevel> {
        *self.peer_log_minimum.lock()
    }

    pub(crate) fn supports_server_requests(&self) -> bool {
        self.transport.capabilities().supports_server_requests
    }

    fn begin_disconnect(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                *state = ConnectionState::Disconnecting;
                true
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => false,
        }
    }

    /// The one cleanup path, shared by `stop()` and the unexpected-close
    /// route. Every pending caller observes `ConnectionClosed` before the
    /// state becomes `Disconnected`.
    async fn teardown(&self) {
        self.shutdown.cancel();
        self.pending.fail_all(&McpError::ConnectionClosed);
        self.progress.clear();
        self.debouncer.clear();
        let inflight: Vec<(RequestId, CancellationToken)> =
            self.inflight.lock().drain().collect();
        for (_, token) in inflight {
            token.cancel();
        }
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "transport disconnect during teardown failed");
        }
        *self.state.lock() = ConnectionState::Disconnected;
        let listeners: Vec<CloseListener> = {
            let mut slot = self.close_listeners.lock();
            slot.drain(..).collect()
        };
        for listener in listeners {
            listener();
        }
    }

    async fn close_from_loop(self: &Arc<Self>) {
        if self.begin_disconnect() {
            self.teardown().await;
        }
    }

    // ------------------------------------------------------------------
    // Receive loop
    // ------------------------------------------------------------------

    fn spawn_receive_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            trace!("receive loop started");
            loop {
                tokio::select! {
                    () = shared.shutdown.cancelled() => break,
                    received = shared.transport.receive() => match received {
                        Ok(Some(frame)) => shared.handle_frame(frame).await,
                        Ok(None) => {
                            debug!("transport stream ended");
                            shared.close_from_loop().await;
                            break;
                        }
                        Err(e) => {
                            let transport_error = McpError::Transport(e.to_string());
                            error!(error = %transport_error, "transport receive failed");
                            let callback = shared.on_error.lock().clone();
                            if let Some(callback) = callback {
                                callback(&transport_error);
                            }
                            shared.close_from_loop().await;
                            break;
                        }
                    }
                }
            }
            trace!("receive loop terminated");
        })
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let preprocessor = self.preprocessor.lock().clone();
        if let Some(preprocessor) = preprocessor
            && preprocessor(&frame)
        {
            trace!("frame absorbed by preprocessor");
            return;
        }

        let metadata = frame.metadata.clone();
        match codec::decode_frame(&frame.payload) {
            Ok(DecodedFrame::ResponseBatch(responses)) => {
                for response in responses {
                    self.handle_response(response);
                }
            }
            Ok(DecodedFrame::Response(response)) => self.handle_response(response),
            Ok(DecodedFrame::Request(request)) => self.handle_request(request, metadata),
            Ok(DecodedFrame::Notification(notification)) => {
                self.handle_notification(notification).await;
            }
            Ok(DecodedFrame::MixedBatch(items)) => {
                for item in items {
                    match item {
                        BatchItem::Message(JsonRpcMessage::Request(request)) => {
                            self.handle_request(request, metadata.clone());
                        }
                        BatchItem::Message(JsonRpcMessage::Notification(notification)) => {
                            self.handle_notification(notification).await;
                        }
                        BatchItem::Message(JsonRpcMessage::Response(response)) => {
                            self.handle_response(response);
                        }
                        BatchItem::Malformed(value) => {
                            self.reject_malformed(
                                &value,
                                McpError::InvalidRequest("malformed batch entry".to_string()),
                            )
                            .await;
                        }
                    }
                }
            }
            Ok(DecodedFrame::Unrecognized(value)) => {
                let handler = self.unknown_handler.lock().clone();
                if let Some(handler) = handler {
                    handler(&value);
                } else {
                    warn!("unrecognized message dropped");
                }
            }
            Err(error) => self.handle_decode_error(&frame, error).await,
        }
    }

    /// An error response goes out only when the offending frame can be
    /// identified as a request, i.e. we have its id.
    async fn handle_decode_error(&self, frame: &Frame, error: McpError) {
        match serde_json::from_slice::<Value>(&frame.payload) {
            Ok(value) => self.reject_malformed(&value, error).await,
            Err(_) => warn!(error = %error, "undecodable frame dropped"),
        }
    }

    async fn reject_malformed(&self, value: &Value, error: McpError) {
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
        match id {
            Some(id) if value.get("method").is_some() => {
                warn!(%id, error = %error, "rejecting malformed request");
                self.respond_error(id, &error).await;
            }
            _ => warn!(error = %error, "malformed frame dropped"),
        }
    }

    // ------------------------------------------------------------------
    // Inbound requests
    // ------------------------------------------------------------------

    fn handle_request(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        metadata: Option<duplexmcp_transport::FrameMetadata>,
    ) {
        // Each request runs in its own task so handling pipelines.
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.dispatch_request(request, metadata).await;
        });
    }

    async fn dispatch_request(
        self: Arc<Self>,
        request: JsonRpcRequest,
        metadata: Option<duplexmcp_transport::FrameMetadata>,
    ) {
        let method = request.method.clone();
        let id = request.id.clone();

        if method == methods::INITIALIZE {
            self.handle_initialize(request).await;
            return;
        }

        if self.options.strict_lifecycle && !self.peer_initialized.load(Ordering::Acquire) {
            self.respond_error(
                id,
                &McpError::InvalidRequest(
                    "Received request before initialization was complete".to_string(),
                ),
            )
            .await;
            return;
        }

        if method == methods::PING {
            self.respond_success(id, Value::Object(serde_json::Map::new()))
                .await;
            return;
        }

        if method == methods::SET_LOG_LEVEL {
            match serde_json::from_value::<SetLevelParams>(
                request.params.unwrap_or(Value::Null),
            ) {
                Ok(params) => {
                    *self.peer_log_minimum.lock() = Some(params.level);
                    self.respond_success(id, Value::Object(serde_json::Map::new()))
                        .await;
                }
                Err(e) => {
                    self.respond_error(id, &McpError::InvalidParams(format!("Invalid params: {e}")))
                        .await;
                }
            }
            return;
        }

        let Some(handler) = self.registry.request_handler(&method) else {
            self.respond_error(id, &McpError::method_not_found(&method))
                .await;
            return;
        };

        let cancel = CancellationToken::new();
        self.inflight.lock().insert(id.clone(), cancel.clone());

        let meta = request.meta();
        let ctx = self.build_context(&id, meta, metadata, cancel.clone());

        let outcome = tokio::select! {
            () = cancel.cancelled() => None,
            result = handler.handle(&method, request.params, ctx) => Some(result),
        };

        self.inflight.lock().remove(&id);

        match outcome {
            // A cancelled request gets no response; the peer stopped
            // listening for one.
            None => debug!(%id, %method, "request handler cancelled"),
            Some(Ok(result)) => self.respond_success(id, result).await,
            Some(Err(error)) => {
                debug!(%id, %method, error = %error, "request handler failed");
                self.respond_error(id, &error).await;
            }
        }
    }

    async fn handle_initialize(&self, request: JsonRpcRequest) {
        let id = request.id.clone();
        let params: InitializeParams =
            match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(e) => {
                    self.respond_error(id, &McpError::InvalidParams(format!("Invalid params: {e}")))
                        .await;
                    return;
                }
            };

        let version = negotiate(&params.protocol_version);
        debug!(
            requested = %params.protocol_version,
            negotiated = %version,
            client = %params.client_info.name,
            "initialize handshake"
        );

        let capabilities = serde_json::to_value(&params.capabilities).unwrap_or(Value::Null);
        *self.handshake.lock() = Some(PeerInfo {
            protocol_version: version.clone(),
            implementation: params.client_info,
            capabilities,
        });

        let result = InitializeResult {
            protocol_version: version.clone(),
            capabilities: self.options.capabilities.as_server(),
            server_info: self.options.implementation.clone(),
            instructions: self.options.instructions.clone(),
        };
        match serde_json::to_value(&result) {
            Ok(value) => self.respond_success(id, value).await,
            Err(e) => {
                error!(error = %e, "failed to serialize initialize result");
                self.respond_error(id, &McpError::internal_sanitized()).await;
                return;
            }
        }
        self.transport.set_protocol_version(&version);
    }

    fn build_context(
        self: &Arc<Self>,
        id: &RequestId,
        meta: Option<RequestMeta>,
        metadata: Option<duplexmcp_transport::FrameMetadata>,
        cancel: CancellationToken,
    ) -> RequestContext {
        let task_id = meta.as_ref().and_then(|m| {
            m.extra
                .get("taskId")
                .and_then(Value::as_str)
                .map(String::from)
        });
        let session_id = self
            .options
            .session_id
            .clone()
            .or_else(|| metadata.as_ref().and_then(|m| m.session_id.clone()));
        let (auth, request_info) = match metadata {
            Some(m) => (m.auth, m.request),
            None => (None, None),
        };
        RequestContext::new(
            session_id,
            id.clone(),
            meta,
            task_id,
            auth,
            request_info,
            cancel,
            SessionLink::new(Arc::downgrade(self)),
        )
    }

    // ------------------------------------------------------------------
    // Inbound responses and notifications
    // ------------------------------------------------------------------

    fn handle_response(&self, response: JsonRpcResponse) {
        let routers = self.response_routers.lock().clone();
        for router in routers {
            if router.route(&response) {
                trace!("response claimed by external router");
                return;
            }
        }

        let Some(id) = response.request_id().cloned() else {
            warn!("response with null id dropped");
            return;
        };
        if !self.pending.complete(&id, response) {
            debug!(%id, "response for unknown request dropped");
        }
    }

    async fn handle_notification(self: &Arc<Self>, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => {
                self.peer_initialized.store(true, Ordering::Release);
                debug!("peer completed initialization");
            }
            methods::CANCELLED => {
                let params: CancelledParams = match serde_json::from_value(
                    notification.params.clone().unwrap_or(Value::Null),
                ) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(error = %e, "malformed cancellation dropped");
                        return;
                    }
                };
                let token = self.inflight.lock().get(&params.request_id).cloned();
                match token {
                    Some(token) => {
                        debug!(id = %params.request_id, reason = ?params.reason, "cancelling in-flight handler");
                        token.cancel();
                    }
                    // The handler may have finished already; cancellation
                    // is advisory and lossy.
                    None => trace!(id = %params.request_id, "cancellation for unknown request"),
                }
            }
            methods::PROGRESS => {
                let params: ProgressParams = match serde_json::from_value(
                    notification.params.clone().unwrap_or(Value::Null),
                ) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(error = %e, "malformed progress dropped");
                        return;
                    }
                };
                if !self.progress.deliver(&params) {
                    trace!(token = %params.progress_token, "progress for unknown token dropped");
                }
            }
            _ => {}
        }

        // Every notification, engine-intercepted or not, still reaches the
        // user handler for its method.
        if let Some(handler) = self.registry.notification_handler(&notification.method) {
            handler
                .handle(&notification.method, notification.params)
                .await;
        } else {
            trace!(method = %notification.method, "no handler for notification");
        }
    }

    // ------------------------------------------------------------------
    // Outbound paths
    // ------------------------------------------------------------------

    async fn send_payload<T: serde::Serialize>(
        &self,
        payload: &T,
        related_request_id: Option<RequestId>,
    ) -> Result<(), McpError> {
        let bytes = codec::encode_message(payload)?;
        let options = SendOptions {
            related_request_id,
        };
        self.transport
            .send(Frame::new(bytes), options)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    async fn respond_success(&self, id: RequestId, result: Value) {
        let response = JsonRpcResponse::success(result, id.clone());
        if let Err(e) = self.send_payload(&response, Some(id)).await {
            warn!(error = %e, "failed to send response");
        }
    }

    async fn respond_error(&self, id: RequestId, error: &McpError) {
        let response = JsonRpcResponse::error_response(error.to_wire(), id.clone());
        if let Err(e) = self.send_payload(&response, Some(id)).await {
            warn!(error = %e, "failed to send error response");
        }
    }

    pub(crate) async fn notify(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        related_request_id: Option<RequestId>,
    ) -> Result<(), McpError> {
        self.ensure_connected()?;
        let notification = JsonRpcNotification::new(method, params);
        match self
            .debouncer
            .offer(notification, related_request_id.is_some())
        {
            DebounceDecision::PassThrough(notification) => {
                self.send_payload(&notification, related_request_id).await
            }
            DebounceDecision::Coalesced => Ok(()),
            DebounceDecision::Scheduled => {
                self.spawn_flush(method.to_string());
                Ok(())
            }
        }
    }

    /// Flush after a cooperative yield so every send within the current
    /// tick coalesces into one frame carrying the latest payload.
    fn spawn_flush(self: &Arc<Self>, method: String) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if shared.shutdown.is_cancelled() {
                return;
            }
            if let Some(notification) = shared.debouncer.take(&method)
                && let Err(e) = shared.send_payload(&notification, None).await
            {
                warn!(method = %method, error = %e, "failed to flush debounced notification");
            }
        });
    }

    pub(crate) async fn request(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, McpError> {
        self.ensure_connected()?;
        let id = options
            .request_id
            .clone()
            .unwrap_or_else(|| self.generate_request_id());

        let wants_progress = options.progress_token.is_some() || options.on_progress.is_some();
        let token = wants_progress.then(|| {
            options
                .progress_token
                .clone()
                .unwrap_or_else(|| match &id {
                    RequestId::Number(n) => ProgressToken::Number(*n),
                    RequestId::String(s) => ProgressToken::String(s.clone()),
                })
        });

        let controller = options.timeout.map(|timeout| {
            TimeoutController::new(TimeoutPolicy {
                timeout,
                reset_on_progress: options.reset_timeout_on_progress,
                max_total: options.max_total_timeout,
            })
        });
        let (controller, signal) = match controller {
            Some((controller, signal)) => (Some(controller), Some(signal)),
            None => (None, None),
        };

        if let Some(token) = &token {
            self.progress.register(
                token.clone(),
                ProgressEntry {
                    callback: options.on_progress.clone(),
                    signal: signal.clone(),
                    request_id: Some(id.clone()),
                    task_id: None,
                },
            );
        }

        let mut request = JsonRpcRequest::new(method, params, id.clone());
        if let Some(token) = &token {
            request = request.with_meta(&RequestMeta::with_progress_token(token.clone()));
        }

        let receiver = match self.pending.insert(id.clone()) {
            Ok(receiver) => receiver,
            Err(e) => {
                self.progress.finish_request(&id);
                return Err(e);
            }
        };

        if let Err(e) = self.send_payload(&request, None).await {
            // Transport failure cancels the pending entry synchronously.
            self.pending.cancel(&id, e.clone());
            self.progress.finish_request(&id);
            return Err(e);
        }

        let outcome = match controller {
            Some(controller) => {
                tokio::select! {
                    completion = receiver => {
                        completion.unwrap_or(Err(McpError::ConnectionClosed))
                    }
                    expired = controller.run() => {
                        let timeout_error =
                            expired.unwrap_or_else(|| McpError::Internal(
                                "timeout controller terminated unexpectedly".to_string(),
                            ));
                        self.pending.cancel(&id, timeout_error.clone());
                        Err(timeout_error)
                    }
                }
            }
            None => receiver
                .await
                .unwrap_or(Err(McpError::ConnectionClosed)),
        };

        // Progress state for this request goes away unless the token was
        // handed off to a task.
        self.progress.finish_request(&id);

        let response = outcome?;
        match response.payload {
            JsonRpcResponsePayload::Success { result } => Ok(result),
            JsonRpcResponsePayload::Error { error } => Err(McpError::from_wire(error)),
        }
    }
}
