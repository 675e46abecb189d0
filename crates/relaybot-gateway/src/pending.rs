//! Bookkeeping for non-streaming requests awaiting their agent reply.
//!
//! The gateway correlates an outbound reply back to the HTTP request that
//! triggered it by `chat_id`. At most one pending slot exists per `chat_id`
//! at a time; `resolve` only ever wakes the first still-pending waiter.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

/// A registry of one-shot reply slots keyed by `chat_id`.
pub struct PendingReplies {
    slots: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        PendingReplies {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new pending slot for `chat_id`, returning the receiving
    /// half. Overwrites (and silently drops) any previous slot for the same
    /// `chat_id` — callers mint a fresh `chat_id` per request, so collisions
    /// should not occur in practice.
    pub fn register(&self, chat_id: impl Into<String>) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().unwrap().insert(chat_id.into(), tx);
        rx
    }

    /// Resolve the pending slot for `chat_id` with `content`, if one exists.
    ///
    /// Only the first resolution for a given `chat_id` has any effect: the
    /// slot is removed on first use, so a second `OutboundMessage` for the
    /// same `chat_id` (the agent replying more than once to one turn) finds
    /// no slot and is silently dropped. This is intentional — the
    /// non-streaming path has no way to deliver a second reply.
    pub fn resolve(&self, chat_id: &str, content: String) {
        if let Some(tx) = self.slots.lock().unwrap().remove(chat_id) {
            let _ = tx.send(content);
        }
    }

    /// Drop every pending slot, waking their receivers with a `RecvError`.
    /// Called on gateway shutdown so still-connected clients see their
    /// request fail rather than hang forever.
    pub fn cancel_all(&self) {
        self.slots.lock().unwrap().clear();
    }

    /// Remove the slot for `chat_id` without resolving it (used after a
    /// timeout, so a late reply finds nothing to resolve).
    pub fn remove(&self, chat_id: &str) {
        self.slots.lock().unwrap().remove(chat_id);
    }
}

impl Default for PendingReplies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let pending = PendingReplies::new();
        let rx = pending.register("u1:abc");
        pending.resolve("u1:abc", "hello".to_string());
        assert_eq!(rx.await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_resolve_unknown_chat_id_is_noop() {
        let pending = PendingReplies::new();
        pending.resolve("nobody", "ignored".to_string());
    }

    #[tokio::test]
    async fn test_second_resolve_is_dropped() {
        let pending = PendingReplies::new();
        let rx = pending.register("u1:abc");
        pending.resolve("u1:abc", "first".to_string());
        pending.resolve("u1:abc", "second".to_string());
        assert_eq!(rx.await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_receivers_with_error() {
        let pending = PendingReplies::new();
        let rx = pending.register("u1:abc");
        pending.cancel_all();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_remove_prevents_late_resolve() {
        let pending = PendingReplies::new();
        let rx = pending.register("u1:abc");
        pending.remove("u1:abc");
        pending.resolve("u1:abc", "too late".to_string());
        assert!(rx.await.is_err());
    }
}
