//! The gateway server: wires the axum router to the message bus and owns
//! the pending-reply bookkeeping for non-streaming requests.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::info;

use relaybot_core::bus::queue::MessageBus;
use relaybot_core::bus::types::OutboundMessage;
use relaybot_core::config::schema::GatewayConfig;

use crate::pending::PendingReplies;
use crate::routes;

/// Shared state reachable from every route handler.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub bus: Arc<MessageBus>,
    pub pending: PendingReplies,
}

impl GatewayState {
    /// Whether `user` may call the gateway. Empty allow-list means everyone
    /// may — the same convention the IM channel configs use.
    pub fn is_allowed(&self, user: &str) -> bool {
        self.config.allowed_users.is_empty() || self.config.allowed_users.iter().any(|u| u == user)
    }
}

/// The OpenAI-compatible HTTP gateway channel.
pub struct GatewayServer {
    state: Arc<GatewayState>,
    shutdown: Arc<Notify>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, bus: Arc<MessageBus>) -> Self {
        let state = Arc::new(GatewayState { config, bus, pending: PendingReplies::new() });
        GatewayServer { state, shutdown: Arc::new(Notify::new()) }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .route("/v1/chat/completions", post(routes::chat_completions))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Register this gateway's outbound handler with the bus: every
    /// `OutboundMessage` tagged `"http"` resolves the matching pending
    /// non-streaming reply (if any is still waiting).
    async fn attach_outbound(&self) {
        let state = self.state.clone();
        self.state
            .bus
            .subscribe_outbound(
                "http",
                Arc::new(move |msg: OutboundMessage| {
                    let state = state.clone();
                    Box::pin(async move {
                        state.pending.resolve(&msg.chat_id, msg.content);
                        Ok(())
                    })
                }),
            )
            .await;
    }

    /// Bind the configured host/port, returning the listener. Split from
    /// `serve` so tests can bind an ephemeral port (`host`/`port` left as
    /// configured, with `port: 0` resolved by the OS) and discover the
    /// actual address before driving requests at it.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        Ok(TcpListener::bind(&addr).await?)
    }

    /// Serve on `listener` until `stop()` is called.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        self.attach_outbound().await;
        let addr = listener.local_addr()?;
        info!(%addr, "gateway listening");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.notified().await })
            .await?;

        info!("gateway stopped");
        Ok(())
    }

    /// Bind and serve on the configured host/port. Blocks until `stop()`.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Cancel pending replies and unbind the server.
    pub fn stop(&self) {
        self.state.pending.cancel_all();
        self.shutdown.notify_waiters();
    }
}
