//! Memory backend factory — turns `MemoryConfig` into a concrete backend +
//! conversation ingestor pair.

use std::path::Path;
use std::sync::Arc;

use relaybot_core::config::schema::{MemoryBackendKind, MemoryConfig};
use tracing::warn;

use super::backend::MemoryBackend;
use super::embedding::EmbeddingService;
use super::file_store::FileMemoryStore;
use super::ingestor::{ConversationIngestor, NullIngestor, PostgresConversationIngestor};
use super::postgres_store::PostgresMemoryStore;

/// Construct the memory backend and conversation ingestor named by `config`.
/// Falls back to the file backend (with a `NullIngestor`) whenever the
/// postgres backend is requested but unusable — never fails the caller.
pub fn create_memory_backend(
    workspace: &Path,
    config: &MemoryConfig,
) -> (Arc<dyn MemoryBackend>, Arc<dyn ConversationIngestor>) {
    if config.backend != MemoryBackendKind::Postgres {
        return (Arc::new(FileMemoryStore::new(workspace)), Arc::new(NullIngestor));
    }

    if config.postgres.dsn.is_empty() {
        warn!("memory.backend=postgres but no DSN configured, falling back to file");
        return (Arc::new(FileMemoryStore::new(workspace)), Arc::new(NullIngestor));
    }

    let store = match PostgresMemoryStore::new(
        &config.postgres.dsn,
        config.embedding.dimensions,
        config.postgres.pool_min_size,
        config.postgres.pool_max_size,
        config.semantic_search_limit,
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "failed to construct postgres memory store, falling back to file");
            return (Arc::new(FileMemoryStore::new(workspace)), Arc::new(NullIngestor));
        }
    };

    let embedding_service = Arc::new(EmbeddingService::new(
        &config.embedding.model,
        config.embedding.dimensions,
        config.embedding.base_url.as_deref(),
        &config.embedding.key,
    ));
    store.set_embedding_service(embedding_service);

    let ingestor: Arc<dyn ConversationIngestor> = if config.auto_ingest {
        Arc::new(PostgresConversationIngestor::new(store.clone()))
    } else {
        Arc::new(NullIngestor)
    };

    (store, ingestor)
}
