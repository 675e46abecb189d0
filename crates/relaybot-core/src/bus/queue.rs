//! Async message bus — the central nervous system of Relaybot.
//!
//! Publish/subscribe broker for [`InboundMessage`]/[`OutboundMessage`],
//! with per-session FIFO delivery and per-channel outbound routing. Built on
//! the donor's `tokio::sync::mpsc` + `Mutex` idiom (see `bus/queue.rs` and
//! `channels/manager.rs` in the donor codebase), generalized into a registry
//! that the bus itself owns rather than an external dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, warn};

use super::types::{InboundMessage, OutboundMessage};

/// Default bound on in-flight (queued but not yet processed) inbound
/// messages per `session_key`. `publish_inbound` suspends rather than drops
/// once a session is at this bound.
pub const DEFAULT_SESSION_BUFFER: usize = 32;

/// An inbound subscriber: called once per published message, in session order.
pub type InboundHandler =
    Arc<dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// An outbound subscriber registered under a channel tag.
pub type OutboundHandler =
    Arc<dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

struct SessionWorker {
    tx: mpsc::Sender<InboundMessage>,
}

/// The message bus connecting channels <-> the agent subscriber.
///
/// Holds two registries (inbound subscribers, outbound handlers by channel
/// tag) and a per-`session_key` worker map that guarantees in-order,
/// non-overlapping delivery within a session while letting different
/// sessions proceed concurrently.
pub struct MessageBus {
    inbound_handlers: Arc<RwLock<Vec<InboundHandler>>>,
    outbound_handlers: RwLock<HashMap<String, OutboundHandler>>,
    sessions: Mutex<HashMap<String, SessionWorker>>,
    session_buffer: usize,
}

impl MessageBus {
    /// Create a new bus with the default per-session backpressure bound.
    pub fn new() -> Self {
        Self::with_session_buffer(DEFAULT_SESSION_BUFFER)
    }

    /// Create a new bus with an explicit per-session in-flight bound.
    pub fn with_session_buffer(session_buffer: usize) -> Self {
        MessageBus {
            inbound_handlers: Arc::new(RwLock::new(Vec::new())),
            outbound_handlers: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            session_buffer,
        }
    }

    /// Register an inbound subscriber. All registered subscribers are
    /// invoked, in registration order, for every inbound message.
    ///
    /// Registration is additive — the contract permits more than one
    /// subscriber, though this system wires exactly one (the agent). There
    /// is no de-duplication: subscribing twice delivers twice.
    pub async fn subscribe_inbound(&self, handler: InboundHandler) {
        self.inbound_handlers.write().await.push(handler);
    }

    /// Register (or replace) the outbound handler for a channel tag.
    /// Idempotent: registering under the same tag again replaces the
    /// previous handler rather than accumulating duplicates.
    pub async fn subscribe_outbound(&self, channel_tag: impl Into<String>, handler: OutboundHandler) {
        self.outbound_handlers
            .write()
            .await
            .insert(channel_tag.into(), handler);
    }

    /// Enqueue an inbound message for delivery. Returns once the message has
    /// been accepted onto its session's queue — not once a subscriber has
    /// processed it. Suspends (never drops) while the session is at its
    /// backpressure bound.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        let key = msg.session_key();
        let tx = self.session_sender(&key).await;
        tx.send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("session worker for {key} is gone"))
    }

    /// Route an outbound message to the handler registered for `msg.channel`,
    /// awaiting it to completion. Used by callers (like the HTTP gateway)
    /// that need the dispatch to resolve before returning — e.g. to settle a
    /// pending-response holder. If no handler is registered, logs and drops.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        let handler = self.outbound_handlers.read().await.get(&msg.channel).cloned();
        match handler {
            Some(h) => h(msg).await,
            None => {
                warn!(channel = %msg.channel, "no outbound handler registered; dropping message");
                Ok(())
            }
        }
    }

    /// Number of distinct sessions with a live worker. Mostly useful for tests.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Get or create the per-session worker, returning a sender clone.
    async fn session_sender(&self, key: &str) -> mpsc::Sender<InboundMessage> {
        let mut sessions = self.sessions.lock().await;
        if let Some(worker) = sessions.get(key) {
            return worker.tx.clone();
        }

        let (tx, rx) = mpsc::channel(self.session_buffer);
        sessions.insert(key.to_string(), SessionWorker { tx: tx.clone() });
        drop(sessions);

        self.spawn_session_worker(key.to_string(), rx);
        tx
    }

    /// Spawn the worker task owning one session's queue. `inbound_handlers`
    /// is an `Arc`-shared field, so the spawned task reads the live registry
    /// on every message — subscriptions added after the worker starts are
    /// still visible.
    fn spawn_session_worker(&self, key: String, mut rx: mpsc::Receiver<InboundMessage>) {
        let handlers = self.inbound_handlers.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let session_key = msg.session_key();
                let snapshot = handlers.read().await.clone();
                for handler in snapshot.iter() {
                    if let Err(e) = handler(msg.clone()).await {
                        error!(session_key = %session_key, error = %e, "inbound handler failed");
                    }
                }
            }
            debug!(session_key = %key, "session worker exiting (all senders dropped)");
        });
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn counting_handler(counter: Arc<AtomicUsize>) -> InboundHandler {
        Arc::new(move |_msg| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_inbound_delivered_to_subscriber() {
        let bus = MessageBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe_inbound(counting_handler(counter.clone())).await;

        bus.publish_inbound(InboundMessage::new("http", "u1", "c1", "hi"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outbound_routes_by_channel() {
        let bus = MessageBus::new();
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        bus.subscribe_outbound(
            "http",
            Arc::new(move |msg: OutboundMessage| {
                let received = received_clone.clone();
                Box::pin(async move {
                    received.lock().await.push(msg.content);
                    Ok(())
                })
            }),
        )
        .await;

        bus.publish_outbound(OutboundMessage::new("http", "c1", "hello"))
            .await
            .unwrap();

        assert_eq!(received.lock().await.as_slice(), ["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_outbound_no_handler_is_dropped_not_errored() {
        let bus = MessageBus::new();
        let result = bus
            .publish_outbound(OutboundMessage::new("nobody", "c1", "hello"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_same_session_processed_in_order() {
        let bus = Arc::new(MessageBus::new());
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();

        bus.subscribe_inbound(Arc::new(move |msg: InboundMessage| {
            let order = order_clone.clone();
            Box::pin(async move {
                // Simulate a slow handler to exercise ordering under overlap.
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().await.push(msg.content);
                Ok(())
            })
        }))
        .await;

        for i in 0..5 {
            bus.publish_inbound(InboundMessage::new("http", "u1", "same-chat", format!("m{i}")))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let seen = order.lock().await.clone();
        assert_eq!(seen, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_different_sessions_get_independent_workers() {
        let bus = Arc::new(MessageBus::new());
        bus.subscribe_inbound(Arc::new(|_msg: InboundMessage| {
            Box::pin(async move { Ok(()) })
        }))
        .await;

        bus.publish_inbound(InboundMessage::new("http", "u1", "chat-a", "a"))
            .await
            .unwrap();
        bus.publish_inbound(InboundMessage::new("http", "u1", "chat-b", "b"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.active_sessions().await, 2);
    }

    #[tokio::test]
    async fn test_handler_error_is_logged_not_propagated() {
        let bus = MessageBus::new();
        bus.subscribe_inbound(Arc::new(|_msg: InboundMessage| {
            Box::pin(async move { anyhow::bail!("boom") })
        }))
        .await;

        let result = bus
            .publish_inbound(InboundMessage::new("http", "u1", "c1", "hi"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_backpressure_bound_is_respected_without_dropping() {
        let bus = Arc::new(MessageBus::with_session_buffer(1));
        let release = Arc::new(Notify::new());
        let release_clone = release.clone();
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();

        bus.subscribe_inbound(Arc::new(move |_msg: InboundMessage| {
            let release = release_clone.clone();
            let processed = processed_clone.clone();
            Box::pin(async move {
                release.notified().await;
                processed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
        .await;

        bus.publish_inbound(InboundMessage::new("http", "u1", "c1", "m0"))
            .await
            .unwrap();

        let bus2 = bus.clone();
        let publisher = tokio::spawn(async move {
            bus2.publish_inbound(InboundMessage::new("http", "u1", "c1", "m1"))
                .await
                .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!publisher.is_finished(), "publish should suspend at the bound");

        release.notify_one();
        release.notify_one();
        publisher.await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }
}
