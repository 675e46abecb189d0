//! Memory subsystem — pluggable stores behind a common capability contract.
//!
//! `backend` defines the contract every store implements; `file_store` and
//! `postgres_store` are the two concrete stores; `embedding` and `worker`
//! back the Postgres store's asynchronous vectorization; `ingestor` writes
//! completed conversation turns; `factory` composes the right store for a
//! given configuration; `tools` exposes memory operations to the agent
//! reasoning loop.

pub mod backend;
pub mod embedding;
pub mod factory;
pub mod file_store;
pub mod ingestor;
pub mod postgres_store;
pub mod tools;
pub mod worker;

pub use backend::{MemoryBackend, SemanticHit, SemanticMemoryBackend};
pub use factory::create_memory_backend;
pub use file_store::FileMemoryStore;
pub use ingestor::{ConversationIngestor, NullIngestor};
pub use postgres_store::PostgresMemoryStore;
pub use worker::EmbeddingWorker;
