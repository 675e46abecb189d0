//! Memory subsystem and agent subscriber.
//!
//! This crate contains:
//! - **memory**: pluggable memory backends (file, Postgres+pgvector), the
//!   embedding service and worker, the conversation ingestor, and the
//!   memory tools exposed to the agent reasoning loop
//! - **context**: system prompt and message list construction
//! - **subscriber**: the agent's single inbound bus handler
//! - **tools**: the `Tool` trait and registry

pub mod context;
pub mod memory;
pub mod subscriber;
pub mod tools;

pub use context::ContextBuilder;
pub use memory::{create_memory_backend, MemoryBackend, SemanticMemoryBackend};
pub use subscriber::AgentSubscriber;
pub use tools::{Tool, ToolRegistry};
