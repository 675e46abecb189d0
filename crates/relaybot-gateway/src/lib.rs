//! The OpenAI-compatible HTTP gateway — the sole channel this system
//! exposes. Accepts `/v1/chat/completions` requests (buffered or
//! SSE-streamed), publishes them onto the message bus as `InboundMessage`s,
//! and resolves non-streaming replies via a pending-reply registry keyed by
//! `chat_id`.

pub mod pending;
pub mod routes;
pub mod server;

pub use pending::PendingReplies;
pub use server::{GatewayServer, GatewayState};
