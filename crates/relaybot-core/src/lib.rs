//! Core runtime types shared by every Relaybot crate: the message bus,
//! configuration tree, session persistence, and the chat-message model.

pub mod bus;
pub mod config;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::{InboundHandler, InboundMessage, MessageBus, OutboundHandler, OutboundMessage};
pub use bus::{StreamChunk, StreamClosed, StreamSink};
pub use config::Config;
pub use session::SessionManager;
pub use types::{Message, MessageContent, Session};
