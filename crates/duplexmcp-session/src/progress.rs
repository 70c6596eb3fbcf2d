//! Progress subscription routing.
//!
//! Subscriptions are keyed by progress token, not request id, so a stream
//! can be rebound from its originating request to a long-lived task and
//! keep delivering after the request completes. Unknown tokens are dropped
//! silently; a peer may legally send progress for work we gave up on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use duplexmcp_protocol::types::ProgressParams;
use duplexmcp_protocol::{ProgressToken, RequestId};

use crate::timeout::ProgressSignal;

/// One progress notification, as seen by a user callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Progress made so far
    pub progress: f64,
    /// Total expected, when known
    pub total: Option<f64>,
    /// Human-readable message
    pub message: Option<String>,
}

/// User callback invoked for each progress notification on a token.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

pub(crate) struct ProgressEntry {
    pub callback: Option<ProgressCallback>,
    pub signal: Option<ProgressSignal>,
    pub request_id: Option<RequestId>,
    pub task_id: Option<String>,
}

/// Token-keyed progress subscriptions for one session.
#[derive(Default)]
pub(crate) struct ProgressRouter {
    entries: Mutex<HashMap<ProgressToken, ProgressEntry>>,
}

impl ProgressRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: ProgressToken, entry: ProgressEntry) {
        self.entries.lock().insert(token, entry);
    }

    /// Deliver a progress notification to its subscription.
    ///
    /// The timeout signal fires before the user callback so a slow callback
    /// cannot eat into the refreshed deadline. Returns `false` for unknown
    /// tokens, which the engine logs at trace level and drops.
    pub fn deliver(&self, params: &ProgressParams) -> bool {
        let (signal, callback) = {
            let entries = self.entries.lock();
            let Some(entry) = entries.get(&params.progress_token) else {
                return false;
            };
            (entry.signal.clone(), entry.callback.clone())
        };

        if let Some(signal) = signal {
            signal.signal();
        }
        if let Some(callback) = callback {
            callback(ProgressUpdate {
                progress: params.progress,
                total: params.total,
                message: params.message.clone(),
            });
        }
        true
    }

    /// Drop subscriptions opened by a completed request, unless they were
    /// handed off to a task.
    pub fn finish_request(&self, request_id: &RequestId) {
        self.entries.lock().retain(|_, entry| {
            entry.task_id.is_some() || entry.request_id.as_ref() != Some(request_id)
        });
    }

    /// Rebind a subscription from its originating request to a task so it
    /// survives the request's completion.
    ///
    /// Returns `false` when the token has no live subscription.
    pub fn rebind_to_task(&self, token: &ProgressToken, task_id: impl Into<String>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(token) {
            Some(entry) => {
                entry.task_id = Some(task_id.into());
                true
            }
            None => false,
        }
    }

    /// Drop subscriptions bound to a task that reached terminal status.
    pub fn finish_task(&self, task_id: &str) {
        self.entries
            .lock()
            .retain(|_, entry| entry.task_id.as_deref() != Some(task_id));
    }

    pub fn contains(&self, token: &ProgressToken) -> bool {
        self.entries.lock().contains_key(token)
    }

    /// Drop every subscription; used on disconnect.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    fn params(token: &ProgressToken, progress: f64) -> ProgressParams {
        ProgressParams {
            progress_token: token.clone(),
            progress,
            total: Some(10.0),
            message: None,
        }
    }

    fn recording_callback() -> (ProgressCallback, Arc<SyncMutex<Vec<f64>>>) {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |update| sink.lock().push(update.progress));
        (callback, seen)
    }

    #[test]
    fn test_deliver_in_order() {
        let router = ProgressRouter::new();
        let token = ProgressToken::from("p1");
        let (callback, seen) = recording_callback();
        router.register(
            token.clone(),
            ProgressEntry {
                callback: Some(callback),
                signal: None,
                request_id: Some(RequestId::Number(1)),
                task_id: None,
            },
        );

        for i in 1..=3 {
            assert!(router.deliver(&params(&token, f64::from(i))));
        }
        assert_eq!(*seen.lock(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_unknown_token_dropped() {
        let router = ProgressRouter::new();
        assert!(!router.deliver(&params(&ProgressToken::from("ghost"), 1.0)));
    }

    #[test]
    fn test_finish_request_removes_unbound_entries() {
        let router = ProgressRouter::new();
        let token = ProgressToken::from("p1");
        router.register(
            token.clone(),
            ProgressEntry {
                callback: None,
                signal: None,
                request_id: Some(RequestId::Number(1)),
                task_id: None,
            },
        );
        router.finish_request(&RequestId::Number(1));
        assert!(!router.contains(&token));
    }

    #[test]
    fn test_task_handoff_outlives_request() {
        let router = ProgressRouter::new();
        let token = ProgressToken::from("p1");
        router.register(
            token.clone(),
            ProgressEntry {
                callback: None,
                signal: None,
                request_id: Some(RequestId::Number(1)),
                task_id: None,
            },
        );

        assert!(router.rebind_to_task(&token, "task-9"));
        router.finish_request(&RequestId::Number(1));
        assert!(router.contains(&token));

        router.finish_task("task-9");
        assert!(!router.contains(&token));
    }

    #[test]
    fn test_rebind_unknown_token_fails() {
        let router = ProgressRouter::new();
        assert!(!router.rebind_to_task(&ProgressToken::from("nope"), "task-1"));
    }
}
