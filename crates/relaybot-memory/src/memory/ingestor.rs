//! Conversation ingestor — writes completed dialogue turns into memory for
//! later semantic retrieval.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::postgres_store::PostgresMemoryStore;

/// Called once per completed turn with the user/assistant halves.
#[async_trait]
pub trait ConversationIngestor: Send + Sync {
    async fn ingest(&self, session_key: &str, user_msg: &str, assistant_msg: &str);
}

/// No-op ingestor used for the file backend.
pub struct NullIngestor;

#[async_trait]
impl ConversationIngestor for NullIngestor {
    async fn ingest(&self, _session_key: &str, _user_msg: &str, _assistant_msg: &str) {}
}

/// Writes each non-empty half of a turn as a `conversation` row and enqueues
/// its embedding job, role-prefixed so semantic search results carry role
/// information.
pub struct PostgresConversationIngestor {
    store: Arc<PostgresMemoryStore>,
}

impl PostgresConversationIngestor {
    pub fn new(store: Arc<PostgresMemoryStore>) -> Self {
        PostgresConversationIngestor { store }
    }
}

#[async_trait]
impl ConversationIngestor for PostgresConversationIngestor {
    async fn ingest(&self, session_key: &str, user_msg: &str, assistant_msg: &str) {
        for (role, content) in [("user", user_msg), ("assistant", assistant_msg)] {
            if content.is_empty() {
                continue;
            }
            if let Err(e) = self.store.insert_conversation_row(session_key, role, content).await {
                warn!(session_key, role, error = %e, "failed to ingest conversation row");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_ingestor_is_a_no_op() {
        let ingestor = NullIngestor;
        ingestor.ingest("s1", "hi", "hello").await;
    }
}
