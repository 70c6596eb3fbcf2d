//! Coalescing of high-rate list-changed notifications.
//!
//! For methods in the configured set, only the most recent payload within a
//! cooperative tick goes on the wire. Notifications tied to a specific
//! request stream (a related-request-id send) always bypass coalescing.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use duplexmcp_protocol::jsonrpc::JsonRpcNotification;

/// What the caller should do with an offered notification.
#[derive(Debug, PartialEq)]
pub enum DebounceDecision {
    /// Not coalescable; send the frame immediately
    PassThrough(JsonRpcNotification),
    /// Stored as the method's latest payload; a flush is already scheduled
    Coalesced,
    /// Stored; the caller must schedule a flush for this method
    Scheduled,
}

/// Per-method notification coalescer for one session.
#[derive(Debug)]
pub(crate) struct NotificationDebouncer {
    methods: HashSet<String>,
    pending: Mutex<HashMap<String, JsonRpcNotification>>,
}

impl NotificationDebouncer {
    pub fn new(methods: HashSet<String>) -> Self {
        Self {
            methods,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Offer an outbound notification to the debouncer.
    pub fn offer(
        &self,
        notification: JsonRpcNotification,
        has_related_request: bool,
    ) -> DebounceDecision {
        if has_related_request || !self.methods.contains(&notification.method) {
            return DebounceDecision::PassThrough(notification);
        }

        let method = notification.method.clone();
        let mut pending = self.pending.lock();
        if pending.insert(method, notification).is_some() {
            DebounceDecision::Coalesced
        } else {
            DebounceDecision::Scheduled
        }
    }

    /// Take the latest payload for a method at flush time.
    pub fn take(&self, method: &str) -> Option<JsonRpcNotification> {
        self.pending.lock().remove(method)
    }

    /// Drop all stored payloads; scheduled flushes then find nothing.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}
