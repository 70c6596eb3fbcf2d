//! The pending request table.
//!
//! Maps in-flight request ids to single-shot completion sinks. The table is
//! the sole owner of the senders; callers hold only the awaitable receiver.
//! An entry leaves the table exactly once: on response arrival, on
//! cancellation, or when the whole table is failed at disconnect.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use duplexmcp_protocol::jsonrpc::JsonRpcResponse;
use duplexmcp_protocol::{McpError, RequestId};

/// Outcome delivered through a completion sink.
pub type Completion = Result<JsonRpcResponse, McpError>;

/// Awaitable handle for one pending request.
pub type CompletionReceiver = oneshot::Receiver<Completion>;

/// Table of in-flight outbound requests for one session.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<RequestId, oneshot::Sender<Completion>>>,
}

impl PendingRequests {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return its completion handle.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Internal`] if the id is already in flight; ids
    /// must be unique among pending requests from the same sender.
    pub fn insert(&self, id: RequestId) -> Result<CompletionReceiver, McpError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(McpError::Internal(format!(
                "request id already in flight: {id}"
            )));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id, tx);
        Ok(rx)
    }

    /// Complete a pending request with a response.
    ///
    /// Returns `false` when no entry exists for the id, which the engine
    /// logs as an unknown response.
    pub fn complete(&self, id: &RequestId, response: JsonRpcResponse) -> bool {
        match self.entries.lock().remove(id) {
            Some(tx) => {
                // A dropped receiver means the caller gave up (timeout);
                // the response is then discarded.
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Fail a single pending request, removing its entry.
    ///
    /// Returns `false` when no entry exists for the id.
    pub fn cancel(&self, id: &RequestId, error: McpError) -> bool {
        match self.entries.lock().remove(id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every pending request with the same error and empty the table.
    pub fn fail_all(&self, error: &McpError) {
        let entries: Vec<_> = {
            let mut map = self.entries.lock();
            map.drain().collect()
        };
        for (_, tx) in entries {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Returns `true` if the id is in flight.
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of in-flight requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
