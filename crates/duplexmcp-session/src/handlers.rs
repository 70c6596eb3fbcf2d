//! Handler registration and dispatch by method name.
//!
//! The registry maps method names to handler variants: typed request
//! handlers own their params/result conversion, notification handlers
//! receive raw params, and per-kind fallbacks catch everything unlisted.
//! Registries clone cheaply (handlers are shared by reference), which is
//! how the multiplexer snapshots one registry into many sessions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use duplexmcp_protocol::McpError;

use crate::context::RequestContext;

/// A handler for incoming requests.
///
/// `method` is passed so fallback handlers can discriminate; typed
/// handlers registered for a single method may ignore it.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request and produce the result value for the response.
    async fn handle(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, McpError>;
}

/// A handler for incoming notifications. Failures are logged, never
/// answered on the wire.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle a notification.
    async fn handle(&self, method: &str, params: Option<Value>);
}

struct FnRequestHandler {
    f: Box<dyn Fn(Option<Value>, RequestContext) -> BoxFuture<'static, Result<Value, McpError>> + Send + Sync>,
}

#[async_trait]
impl RequestHandler for FnRequestHandler {
    async fn handle(
        &self,
        _method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, McpError> {
        (self.f)(params, ctx).await
    }
}

struct FnNotificationHandler {
    f: Box<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>,
}

#[async_trait]
impl NotificationHandler for FnNotificationHandler {
    async fn handle(&self, _method: &str, params: Option<Value>) {
        (self.f)(params).await;
    }
}

/// Method-name keyed handler registry for one or more sessions.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    fallback_request: Option<Arc<dyn RequestHandler>>,
    fallback_notification: Option<Arc<dyn NotificationHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("requests", &self.requests.keys().collect::<Vec<_>>())
            .field("notifications", &self.notifications.keys().collect::<Vec<_>>())
            .field("fallback_request", &self.fallback_request.is_some())
            .field("fallback_notification", &self.fallback_notification.is_some())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed request handler for a method.
    ///
    /// Params decode into `P` (missing params decode from `{}`); decode
    /// failures answer with `InvalidParams`. The returned `R` is serialized
    /// into the response result.
    pub fn register_request<P, R, Fut>(
        &mut self,
        method: impl Into<String>,
        handler: impl Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
    ) where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R, McpError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let f = move |params: Option<Value>, ctx: RequestContext| -> BoxFuture<'static, Result<Value, McpError>> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let params = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                let typed: P = serde_json::from_value(params)
                    .map_err(|e| McpError::InvalidParams(format!("Invalid params: {e}")))?;
                let result = handler(typed, ctx).await?;
                serde_json::to_value(result).map_err(|e| {
                    tracing::error!(error = %e, "failed to serialize handler result");
                    McpError::internal_sanitized()
                })
            })
        };
        self.requests.insert(
            method.into(),
            Arc::new(FnRequestHandler { f: Box::new(f) }),
        );
    }

    /// Register a raw request handler for a method.
    pub fn register_raw_request(
        &mut self,
        method: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) {
        self.requests.insert(method.into(), handler);
    }

    /// Register a typed notification handler for a method.
    ///
    /// Params that fail to decode are dropped with a log.
    pub fn register_notification<P, Fut>(
        &mut self,
        method: impl Into<String>,
        handler: impl Fn(P) -> Fut + Send + Sync + 'static,
    ) where
        P: DeserializeOwned + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let method = method.into();
        let handler = Arc::new(handler);
        let log_method = method.clone();
        let f = move |params: Option<Value>| -> BoxFuture<'static, ()> {
            let handler = Arc::clone(&handler);
            let log_method = log_method.clone();
            Box::pin(async move {
                let params = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                match serde_json::from_value::<P>(params) {
                    Ok(typed) => handler(typed).await,
                    Err(e) => {
                        tracing::warn!(method = %log_method, error = %e, "notification params failed to decode; dropped");
                    }
                }
            })
        };
        self.notifications
            .insert(method, Arc::new(FnNotificationHandler { f: Box::new(f) }));
    }

    /// Register a raw notification handler for a method.
    pub fn register_raw_notification(
        &mut self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        self.notifications.insert(method.into(), handler);
    }

    /// Install the fallback handler for requests with no typed handler.
    pub fn set_fallback_request(&mut self, handler: Arc<dyn RequestHandler>) {
        self.fallback_request = Some(handler);
    }

    /// Install the fallback handler for unmatched notifications.
    pub fn set_fallback_notification(&mut self, handler: Arc<dyn NotificationHandler>) {
        self.fallback_notification = Some(handler);
    }

    /// Remove a request handler. Existing sessions holding a snapshot are
    /// unaffected.
    pub fn remove_request(&mut self, method: &str) -> bool {
        self.requests.remove(method).is_some()
    }

    /// Resolve the handler for a request: typed first, then the fallback.
    #[must_use]
    pub fn request_handler(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests
            .get(method)
            .cloned()
            .or_else(|| self.fallback_request.clone())
    }

    /// Resolve the handler for a notification: typed first, then the
    /// fallback.
    #[must_use]
    pub fn notification_handler(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications
            .get(method)
            .cloned()
            .or_else(|| self.fallback_notification.clone())
    }

    /// Registered request method names.
    pub fn request_methods(&self) -> impl Iterator<Item = &str> {
        self.requests.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct EchoParams {
        text: String,
    }

    #[derive(Serialize)]
    struct EchoResult {
        text: String,
    }

    fn registry_with_echo() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_request("echo", |params: EchoParams, _ctx| async move {
            Ok(EchoResult { text: params.text })
        });
        registry
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_and_encodes() {
        let registry = registry_with_echo();
        let handler = registry.request_handler("echo").unwrap();
        let result = handler
            .handle(
                "echo",
                Some(json!({"text": "hi"})),
                RequestContext::detached(1.into()),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_bad_params_become_invalid_params() {
        let registry = registry_with_echo();
        let handler = registry.request_handler("echo").unwrap();
        let error = handler
            .handle(
                "echo",
                Some(json!({"wrong": 1})),
                RequestContext::detached(1.into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, McpError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_fallback_sees_unmatched_methods() {
        struct Recorder;

        #[async_trait]
        impl RequestHandler for Recorder {
            async fn handle(
                &self,
                method: &str,
                _params: Option<Value>,
                _ctx: RequestContext,
            ) -> Result<Value, McpError> {
                Ok(json!({ "method": method }))
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.set_fallback_request(Arc::new(Recorder));

        let handler = registry.request_handler("anything/else").unwrap();
        let result = handler
            .handle("anything/else", None, RequestContext::detached(1.into()))
            .await
            .unwrap();
        assert_eq!(result["method"], "anything/else");
    }

    #[test]
    fn test_no_handler_resolves_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.request_handler("missing").is_none());
        assert!(registry.notification_handler("missing").is_none());
    }

    #[test]
    fn test_clone_shares_handlers_by_reference() {
        let registry = registry_with_echo();
        let snapshot = registry.clone();
        let original = registry.request_handler("echo").unwrap();
        let cloned = snapshot.request_handler("echo").unwrap();
        assert!(Arc::ptr_eq(&original, &cloned));
    }

    #[tokio::test]
    async fn test_notification_handler_receives_params() {
        use parking_lot::Mutex;

        #[derive(Deserialize)]
        struct Changed {
            uri: String,
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = HandlerRegistry::new();
        registry.register_notification("notifications/resources/updated", move |p: Changed| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(p.uri);
            }
        });

        let handler = registry
            .notification_handler("notifications/resources/updated")
            .unwrap();
        handler
            .handle(
                "notifications/resources/updated",
                Some(json!({"uri": "file:///a"})),
            )
            .await;
        assert_eq!(*seen.lock(), vec!["file:///a".to_string()]);
    }
}
