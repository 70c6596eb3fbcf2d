//! JSON-RPC 2.0 envelope types.
//!
//! Requests, responses, notifications, and batches as they appear on the
//! wire. Result payloads stay as raw [`Value`]s so unknown top-level fields
//! survive a decode/encode round trip; the awaiter owns the typed decode.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::{RequestId, RequestMeta, error_codes};

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC version marker (always `"2.0"`).
///
/// Decoding any other version string fails, which is what makes the
/// envelope types reject non-2.0 traffic at the serde layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// JSON-RPC request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Request method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Create a request without parameters.
    #[must_use]
    pub fn without_params(method: impl Into<String>, id: impl Into<RequestId>) -> Self {
        Self::new(method, None, id)
    }

    /// Create a request, serializing the given parameter value.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if `params` cannot be serialized.
    pub fn with_params<P: Serialize>(
        method: impl Into<String>,
        params: P,
        id: impl Into<RequestId>,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(params)?;
        Ok(Self::new(method, Some(value), id))
    }

    /// Extract the `_meta` object from the params, if present and well formed.
    #[must_use]
    pub fn meta(&self) -> Option<RequestMeta> {
        let meta = self.params.as_ref()?.get("_meta")?;
        serde_json::from_value(meta.clone()).ok()
    }

    /// Set or merge the `_meta` object into the params.
    #[must_use]
    pub fn with_meta(mut self, meta: &RequestMeta) -> Self {
        if meta.is_empty() {
            return self;
        }
        let meta_value = serde_json::to_value(meta).unwrap_or(Value::Null);
        match &mut self.params {
            Some(Value::Object(map)) => {
                map.insert("_meta".to_string(), meta_value);
            }
            _ => {
                self.params = Some(serde_json::json!({ "_meta": meta_value }));
            }
        }
        self
    }
}

/// JSON-RPC notification message (no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Notification method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }

    /// Create a notification without parameters.
    #[must_use]
    pub fn without_params(method: impl Into<String>) -> Self {
        Self::new(method, None)
    }

    /// Create a notification, serializing the given parameter value.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error if `params` cannot be serialized.
    pub fn with_params<P: Serialize>(
        method: impl Into<String>,
        params: P,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(params)?;
        Ok(Self::new(method, Some(value)))
    }
}

/// Response payload - mutually exclusive result or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful response
    Success {
        /// Response result; unknown fields are preserved verbatim
        result: Value,
    },
    /// Error response
    Error {
        /// Response error
        error: JsonRpcError,
    },
}

/// Response identifier - null only for parse-error responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<RequestId>);

impl ResponseId {
    /// Response id echoing a request id.
    #[must_use]
    pub fn from_request(id: RequestId) -> Self {
        Self(Some(id))
    }

    /// Null id, used when answering an unparseable frame.
    #[must_use]
    pub fn null() -> Self {
        Self(None)
    }

    /// The request id, when present.
    #[must_use]
    pub fn as_request_id(&self) -> Option<&RequestId> {
        self.0.as_ref()
    }
}

/// JSON-RPC response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: JsonRpcVersion,
    /// Result or error, never both
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Echoed request identifier
    pub id: ResponseId,
}

impl JsonRpcResponse {
    /// Create a successful response.
    #[must_use]
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: ResponseId::from_request(id),
        }
    }

    /// Create an error response for a known request id.
    #[must_use]
    pub fn error_response(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId::from_request(id),
        }
    }

    /// Create a parse-error response with a null id.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error {
                error: JsonRpcError::new(error_codes::PARSE_ERROR, message),
            },
            id: ResponseId::null(),
        }
    }

    /// Returns `true` for a success response.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.payload, JsonRpcResponsePayload::Success { .. })
    }

    /// The result value, for a success response.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            JsonRpcResponsePayload::Success { result } => Some(result),
            JsonRpcResponsePayload::Error { .. } => None,
        }
    }

    /// The error, for an error response.
    #[must_use]
    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            JsonRpcResponsePayload::Success { .. } => None,
            JsonRpcResponsePayload::Error { error } => Some(error),
        }
    }

    /// The echoed request id, unless this is a parse-error response.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.id.as_request_id()
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Short error description
    pub message: String,
    /// Additional structured error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error without data.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error carrying structured data.
    #[must_use]
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// A batch of JSON-RPC items (serializes as a bare array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonRpcBatch<T> {
    /// Batch items
    pub items: Vec<T>,
}

impl<T> JsonRpcBatch<T> {
    /// Create a batch from items.
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the batch holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> IntoIterator for JsonRpcBatch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Any single JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// A request expecting a response
    Request(JsonRpcRequest),
    /// A response to an earlier request
    Response(JsonRpcResponse),
    /// A fire-and-forget notification
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

impl Serialize for JsonRpcMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Request(r) => r.serialize(serializer),
            Self::Response(r) => r.serialize(serializer),
            Self::Notification(n) => n.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_version_rejects_non_2_0() {
        assert!(serde_json::from_str::<JsonRpcVersion>("\"2.0\"").is_ok());
        assert!(serde_json::from_str::<JsonRpcVersion>("\"1.0\"").is_err());
        assert!(serde_json::from_str::<JsonRpcVersion>("\"2.1\"").is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = JsonRpcRequest::with_params(
            "tools/call",
            json!({"name": "echo", "arguments": {"text": "hi"}}),
            1,
        )
        .unwrap();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "echo");
    }

    #[test]
    fn test_response_result_xor_error() {
        let ok = JsonRpcResponse::success(json!({"ok": true}), RequestId::Number(1));
        assert!(ok.is_success());
        assert!(ok.error().is_none());
        let value = serde_json::to_value(&ok).unwrap();
        assert!(value.get("error").is_none());

        let err = JsonRpcResponse::error_response(
            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found: nope"),
            RequestId::from("x"),
        );
        assert!(!err.is_success());
        let value = serde_json::to_value(&err).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
    }

    #[test]
    fn test_result_preserves_unknown_fields() {
        let wire = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"content": [], "somethingNewer": {"nested": true}}
        });
        let response: JsonRpcResponse = serde_json::from_value(wire.clone()).unwrap();
        let reencoded = serde_json::to_value(&response).unwrap();
        assert_eq!(reencoded, wire);
    }

    #[test]
    fn test_meta_merge_into_params() {
        let meta = RequestMeta::with_progress_token("p1");
        let request = JsonRpcRequest::with_params("resources/read", json!({"uri": "file:///x"}), 9)
            .unwrap()
            .with_meta(&meta);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["params"]["_meta"]["progressToken"], "p1");
        assert_eq!(value["params"]["uri"], "file:///x");
        assert_eq!(request.meta().unwrap().progress_token, meta.progress_token);
    }

    #[test]
    fn test_meta_on_paramless_request() {
        use crate::types::ProgressToken;

        let meta = RequestMeta::with_progress_token(7i64);
        let request = JsonRpcRequest::without_params("ping", 1).with_meta(&meta);
        assert_eq!(
            request.meta().unwrap().progress_token,
            Some(ProgressToken::Number(7))
        );
    }

    #[test]
    fn test_batch_transparent() {
        let batch = JsonRpcBatch::new(vec![
            JsonRpcResponse::success(json!(1), RequestId::Number(1)),
            JsonRpcResponse::success(json!(2), RequestId::Number(2)),
        ]);
        let value = serde_json::to_value(&batch).unwrap();
        assert!(value.is_array());
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_error_display() {
        let error = JsonRpcError::new(-32601, "Method not found: does/not/exist");
        assert_eq!(error.to_string(), "Method not found: does/not/exist (-32601)");
    }
}
