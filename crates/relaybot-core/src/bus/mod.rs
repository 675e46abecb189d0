//! In-process pub/sub bus decoupling channels from the agent.

pub mod queue;
pub mod types;

pub use queue::{InboundHandler, MessageBus, OutboundHandler};
pub use types::{InboundMessage, OutboundMessage, StreamChunk, StreamClosed, StreamSink};
