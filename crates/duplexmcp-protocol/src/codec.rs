//! Frame decoding and encoding for the protocol engine.
//!
//! The envelope shapes overlap under lenient decoders, so classification is
//! ordered: batch-of-responses, then single response, request, notification,
//! and finally "unrecognized". A frame that is valid JSON but fits no shape
//! is surfaced as [`DecodedFrame::Unrecognized`] rather than an error so the
//! engine can apply its unknown-message policy.

use serde_json::{Map, Value};

use crate::error::McpError;
use crate::jsonrpc::{
    JSONRPC_VERSION, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// One element of a mixed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    /// A well-formed message
    Message(JsonRpcMessage),
    /// An element that fits no envelope shape, kept for logging
    Malformed(Value),
}

/// A decoded incoming frame, in classification order.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// A batch where every element is a response
    ResponseBatch(Vec<JsonRpcResponse>),
    /// A single response
    Response(JsonRpcResponse),
    /// A single request
    Request(JsonRpcRequest),
    /// A single notification
    Notification(JsonRpcNotification),
    /// A batch mixing requests, notifications, and/or responses
    MixedBatch(Vec<BatchItem>),
    /// Valid JSON that fits no JSON-RPC envelope shape
    Unrecognized(Value),
}

/// Decode a raw byte frame into its JSON-RPC classification.
///
/// # Errors
///
/// Returns [`McpError::Parse`] when the bytes are not valid JSON, and
/// [`McpError::InvalidRequest`] for protocol violations that can be pinned
/// to a request shape (wrong version on a request, `"id": null` on the
/// request path).
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame, McpError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| McpError::Parse(e.to_string()))?;
    decode_value(value)
}

/// Decode an already-parsed JSON value into its classification.
///
/// # Errors
///
/// Same contract as [`decode_frame`].
pub fn decode_value(value: Value) -> Result<DecodedFrame, McpError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(McpError::InvalidRequest("empty batch".to_string()));
            }
            Ok(decode_batch(items))
        }
        value => match classify_single(&value)? {
            Some(JsonRpcMessage::Response(r)) => Ok(DecodedFrame::Response(r)),
            Some(JsonRpcMessage::Request(r)) => Ok(DecodedFrame::Request(r)),
            Some(JsonRpcMessage::Notification(n)) => Ok(DecodedFrame::Notification(n)),
            None => Ok(DecodedFrame::Unrecognized(value)),
        },
    }
}

fn decode_batch(items: Vec<Value>) -> DecodedFrame {
    let mut decoded = Vec::with_capacity(items.len());
    let mut all_responses = true;
    for item in items {
        match classify_single(&item) {
            Ok(Some(message)) => {
                if !matches!(message, JsonRpcMessage::Response(_)) {
                    all_responses = false;
                }
                decoded.push(BatchItem::Message(message));
            }
            Ok(None) | Err(_) => {
                tracing::trace!("batch entry fits no envelope shape");
                all_responses = false;
                decoded.push(BatchItem::Malformed(item));
            }
        }
    }

    if all_responses {
        let responses = decoded
            .into_iter()
            .filter_map(|item| match item {
                BatchItem::Message(JsonRpcMessage::Response(r)) => Some(r),
                _ => None,
            })
            .collect();
        DecodedFrame::ResponseBatch(responses)
    } else {
        DecodedFrame::MixedBatch(decoded)
    }
}

/// Classify one JSON value as a single message.
///
/// Returns `Ok(None)` for values that fit no envelope shape.
fn classify_single(value: &Value) -> Result<Option<JsonRpcMessage>, McpError> {
    let Value::Object(object) = value else {
        return Ok(None);
    };

    let has_method = object.contains_key("method");
    let version_ok = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .is_some_and(|v| v == JSONRPC_VERSION);

    if has_method {
        if !version_ok {
            return Err(McpError::InvalidRequest(
                "missing or invalid jsonrpc version".to_string(),
            ));
        }
        return match object.get("id") {
            // Null request ids are a protocol violation, not a usable id.
            Some(Value::Null) => Err(McpError::InvalidRequest(
                "request id must not be null".to_string(),
            )),
            Some(_) => {
                let request: JsonRpcRequest = serde_json::from_value(value.clone())
                    .map_err(|e| McpError::InvalidRequest(e.to_string()))?;
                Ok(Some(JsonRpcMessage::Request(request)))
            }
            None => {
                let notification: JsonRpcNotification = serde_json::from_value(value.clone())
                    .map_err(|e| McpError::InvalidRequest(e.to_string()))?;
                Ok(Some(JsonRpcMessage::Notification(notification)))
            }
        };
    }

    let has_result = object.contains_key("result");
    let has_error = object.contains_key("error");
    if version_ok && (has_result ^ has_error) && object.contains_key("id") {
        let response: JsonRpcResponse = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        return Ok(Some(JsonRpcMessage::Response(response)));
    }

    Ok(None)
}

/// Encode a message as compact JSON in serde field order.
///
/// # Errors
///
/// Returns [`McpError::Internal`] if the value cannot be serialized.
pub fn encode_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>, McpError> {
    serde_json::to_vec(message).map_err(|e| McpError::Internal(e.to_string()))
}

/// Encode a message as canonical JSON: object keys sorted recursively,
/// compact separators, no slash escaping.
///
/// Used where bit-exactness matters, e.g. signature-bearing payloads.
///
/// # Errors
///
/// Returns [`McpError::Internal`] if the value cannot be serialized.
pub fn encode_canonical<T: serde::Serialize>(message: &T) -> Result<Vec<u8>, McpError> {
    let value = serde_json::to_value(message).map_err(|e| McpError::Internal(e.to_string()))?;
    let sorted = sort_keys(value);
    serde_json::to_vec(&sorted).map_err(|e| McpError::Internal(e.to_string()))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
