//! Relational + vector memory store backed by Postgres and pgvector.
//!
//! Tables are suffixed with the configured embedding dimension
//! (`memory_daily_dim1536`, …) so that switching embedding models provisions
//! a fresh physical table rather than corrupting existing vectors. The
//! durable embedding queue is modeled as a plain table with a `vt`
//! (visible-at) column instead of a queue extension, provisioned with the
//! same `CREATE TABLE IF NOT EXISTS` idiom as the memory tables themselves.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use super::backend::{MemoryBackend, SemanticHit, SemanticMemoryBackend};
use super::embedding::EmbeddingService;

/// Name of the shared durable embedding-job queue table.
pub const EMBEDDING_QUEUE_TABLE: &str = "memory_embedding_queue";

/// Visibility timeout applied when a worker claims a queue row.
pub const VISIBILITY_TIMEOUT_SECS: i64 = 30;

/// One claimed embedding job, as read off the durable queue.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingJob {
    pub queue_id: i64,
    pub table: String,
    pub row_id: i64,
    pub content: String,
    pub dimensions: i32,
}

/// Postgres-backed memory store with pgvector semantic search.
pub struct PostgresMemoryStore {
    pool: PgPool,
    dimensions: u32,
    daily_table: String,
    long_term_table: String,
    conversation_table: String,
    search_func: String,
    semantic_search_limit: u32,
    embedding_service: RwLock<Option<Arc<EmbeddingService>>>,
}

impl PostgresMemoryStore {
    /// Build a store against `dsn`. The pool connects lazily — no I/O occurs
    /// until the first query (typically `initialize`'s schema provisioning).
    pub fn new(
        dsn: &str,
        dimensions: u32,
        pool_min_size: u32,
        pool_max_size: u32,
        semantic_search_limit: u32,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(pool_min_size)
            .max_connections(pool_max_size.max(pool_min_size).max(1))
            .connect_lazy(dsn)?;

        Ok(PostgresMemoryStore {
            pool,
            dimensions,
            daily_table: format!("memory_daily_dim{dimensions}"),
            long_term_table: format!("memory_long_term_dim{dimensions}"),
            conversation_table: format!("memory_conversation_dim{dimensions}"),
            search_func: format!("memory_search_dim{dimensions}"),
            semantic_search_limit,
            embedding_service: RwLock::new(None),
        })
    }

    /// Attach the embedding service used to power semantic context. Called
    /// once by the memory factory after both are constructed.
    pub fn set_embedding_service(&self, service: Arc<EmbeddingService>) {
        *self.embedding_service.write().unwrap() = Some(service);
    }

    /// The table backing the `conversation` records for this store's
    /// dimension — used by the conversation ingestor.
    pub fn conversation_table(&self) -> &str {
        &self.conversation_table
    }

    /// The dimension this store is provisioned for.
    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    /// The pool shared with the conversation ingestor.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert one row into `table` and enqueue its embedding job, both in one
    /// transaction (Open Question (a): a hard guarantee in this
    /// implementation, not best-effort).
    async fn insert_and_enqueue(&self, table: &str, content: &str, extra: InsertExtra<'_>) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = match extra {
            InsertExtra::Daily => {
                sqlx::query_scalar(&format!("INSERT INTO {table} (content) VALUES ($1) RETURNING id"))
                    .bind(content)
                    .fetch_one(&mut *tx)
                    .await?
            }
            InsertExtra::LongTerm => {
                let next_version: i32 =
                    sqlx::query_scalar(&format!("SELECT COALESCE(MAX(version), 0) + 1 FROM {table}"))
                        .fetch_one(&mut *tx)
                        .await?;
                sqlx::query_scalar(&format!(
                    "INSERT INTO {table} (content, version) VALUES ($1, $2) RETURNING id"
                ))
                .bind(content)
                .bind(next_version)
                .fetch_one(&mut *tx)
                .await?
            }
            InsertExtra::Conversation { session_key, role } => sqlx::query_scalar(&format!(
                "INSERT INTO {table} (session_key, role, content) VALUES ($1, $2, $3) RETURNING id"
            ))
            .bind(session_key)
            .bind(role)
            .bind(content)
            .fetch_one(&mut *tx)
            .await?,
        };

        let queue_content = match extra {
            InsertExtra::Conversation { role, .. } => format!("{role}: {content}"),
            _ => content.to_string(),
        };

        sqlx::query(&format!(
            "INSERT INTO {EMBEDDING_QUEUE_TABLE} (table_name, row_id, content, dimensions) VALUES ($1, $2, $3, $4)"
        ))
        .bind(table)
        .bind(id)
        .bind(&queue_content)
        .bind(self.dimensions as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Insert a conversation row for `role`, enqueueing its embedding job.
    /// Used by the conversation ingestor; each call is its own transaction
    /// (Open Question (b): the two rows of one turn are not wrapped
    /// together, so a mid-turn failure can leave one half written).
    pub async fn insert_conversation_row(
        &self,
        session_key: &str,
        role: &str,
        content: &str,
    ) -> anyhow::Result<i64> {
        self.insert_and_enqueue(
            &self.conversation_table,
            content,
            InsertExtra::Conversation { session_key, role },
        )
        .await
    }

    /// Run the dimension-suffixed nearest-neighbor search function.
    pub async fn semantic_search(&self, query_embedding: &[f32], limit: u32) -> anyhow::Result<Vec<SemanticHit>> {
        let vector = Vector::from(query_embedding.to_vec());
        let rows = sqlx::query(&format!(
            "SELECT source, content, entry_date, similarity FROM {}($1, $2, 0.3)",
            self.search_func
        ))
        .bind(vector)
        .bind(limit as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SemanticHit {
                source: row.get("source"),
                content: row.get("content"),
                entry_date: row
                    .try_get::<chrono::NaiveDate, _>("entry_date")
                    .ok()
                    .map(|d| d.to_string()),
                similarity: row.get::<f64, _>("similarity"),
            })
            .collect())
    }
}

enum InsertExtra<'a> {
    Daily,
    LongTerm,
    Conversation { session_key: &'a str, role: &'a str },
}

#[async_trait]
impl MemoryBackend for PostgresMemoryStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        let dim = self.dimensions;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id         BIGSERIAL PRIMARY KEY,
                entry_date DATE NOT NULL DEFAULT CURRENT_DATE,
                content    TEXT NOT NULL,
                embedding  vector({dim}),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.daily_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_date ON {0} (entry_date DESC)",
            self.daily_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_embedding ON {0}
                USING hnsw (embedding vector_cosine_ops) WITH (m=16, ef_construction=64)",
            self.daily_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id         BIGSERIAL PRIMARY KEY,
                content    TEXT NOT NULL,
                embedding  vector({dim}),
                version    INT NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.long_term_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_embedding ON {0}
                USING hnsw (embedding vector_cosine_ops) WITH (m=16, ef_construction=64)",
            self.long_term_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id          BIGSERIAL PRIMARY KEY,
                session_key TEXT NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                embedding   vector({dim}),
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.conversation_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_session ON {0} (session_key, created_at DESC)",
            self.conversation_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_embedding ON {0}
                USING hnsw (embedding vector_cosine_ops) WITH (m=16, ef_construction=64)",
            self.conversation_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {EMBEDDING_QUEUE_TABLE} (
                id         BIGSERIAL PRIMARY KEY,
                table_name TEXT NOT NULL,
                row_id     BIGINT NOT NULL,
                content    TEXT NOT NULL,
                dimensions INT NOT NULL,
                vt         TIMESTAMPTZ NOT NULL DEFAULT now(),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE OR REPLACE FUNCTION {func}(
                query_embedding vector({dim}),
                match_limit INT DEFAULT 10,
                similarity_threshold FLOAT DEFAULT 0.3
            ) RETURNS TABLE (
                source TEXT,
                source_id BIGINT,
                content TEXT,
                entry_date DATE,
                similarity FLOAT
            )
            LANGUAGE plpgsql AS $$
            BEGIN
                RETURN QUERY
                SELECT * FROM (
                    (SELECT 'daily'::TEXT, d.id, d.content, d.entry_date,
                            (1 - (d.embedding <=> query_embedding))::FLOAT
                     FROM {daily} d
                     WHERE d.embedding IS NOT NULL
                     ORDER BY d.embedding <=> query_embedding
                     LIMIT match_limit)
                    UNION ALL
                    (SELECT 'long_term'::TEXT, lt.id, lt.content, NULL::DATE,
                            (1 - (lt.embedding <=> query_embedding))::FLOAT
                     FROM {long_term} lt
                     WHERE lt.embedding IS NOT NULL
                     ORDER BY lt.embedding <=> query_embedding
                     LIMIT match_limit)
                    UNION ALL
                    (SELECT 'conversation'::TEXT, c.id, c.role || ': ' || c.content, c.created_at::DATE,
                            (1 - (c.embedding <=> query_embedding))::FLOAT
                     FROM {conversation} c
                     WHERE c.embedding IS NOT NULL
                     ORDER BY c.embedding <=> query_embedding
                     LIMIT match_limit)
                ) combined(source, source_id, content, entry_date, similarity)
                WHERE combined.similarity >= similarity_threshold
                ORDER BY combined.similarity DESC
                LIMIT match_limit;
            END;
            $$",
            func = self.search_func,
            daily = self.daily_table,
            long_term = self.long_term_table,
            conversation = self.conversation_table,
        ))
        .execute(&self.pool)
        .await?;

        debug!(dim, "postgres memory store schema ensured");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn read_today(&self) -> anyhow::Result<String> {
        let rows: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT content FROM {} WHERE entry_date = CURRENT_DATE ORDER BY id",
            self.daily_table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.join("\n"))
    }

    async fn append_today(&self, content: &str) -> anyhow::Result<()> {
        self.insert_and_enqueue(&self.daily_table, content, InsertExtra::Daily)
            .await?;
        Ok(())
    }

    async fn read_long_term(&self) -> anyhow::Result<String> {
        let row: Option<String> = sqlx::query_scalar(&format!(
            "SELECT content FROM {} ORDER BY version DESC LIMIT 1",
            self.long_term_table
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.unwrap_or_default())
    }

    async fn write_long_term(&self, content: &str) -> anyhow::Result<()> {
        self.insert_and_enqueue(&self.long_term_table, content, InsertExtra::LongTerm)
            .await?;
        Ok(())
    }

    async fn get_recent_memories(&self, days: u32) -> anyhow::Result<String> {
        if days == 0 {
            return Ok(String::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT entry_date, content FROM {} WHERE entry_date >= CURRENT_DATE - $1::int
             ORDER BY entry_date DESC, id",
            self.daily_table
        ))
        .bind(days as i32 - 1)
        .fetch_all(&self.pool)
        .await?;

        let mut parts: Vec<String> = Vec::new();
        let mut current_date: Option<chrono::NaiveDate> = None;
        let mut current_entries: Vec<String> = Vec::new();

        for row in rows {
            let entry_date: chrono::NaiveDate = row.get("entry_date");
            let content: String = row.get("content");
            if current_date != Some(entry_date) {
                if let Some(d) = current_date {
                    parts.push(format!("# {d}\n\n{}", current_entries.join("\n")));
                }
                current_date = Some(entry_date);
                current_entries = Vec::new();
            }
            current_entries.push(content);
        }
        if let Some(d) = current_date {
            parts.push(format!("# {d}\n\n{}", current_entries.join("\n")));
        }

        Ok(parts.join("\n\n---\n\n"))
    }

    async fn get_memory_context(&self) -> anyhow::Result<String> {
        let mut parts = Vec::new();

        let long_term = self.read_long_term().await?;
        if !long_term.is_empty() {
            parts.push(format!("## Long-term Memory\n{long_term}"));
        }

        let today = self.read_today().await?;
        if !today.is_empty() {
            parts.push(format!("## Today's Notes\n{today}"));
        }

        Ok(parts.join("\n\n"))
    }

    fn as_semantic(&self) -> Option<&dyn SemanticMemoryBackend> {
        if self.embedding_service.read().unwrap().is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl SemanticMemoryBackend for PostgresMemoryStore {
    async fn get_memory_context_semantic(&self, query: &str) -> anyhow::Result<String> {
        let service = self.embedding_service.read().unwrap().clone();
        let Some(service) = service else {
            return self.get_memory_context().await;
        };

        let query_embedding = match service.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "semantic query embedding failed, falling back");
                return self.get_memory_context().await;
            }
        };

        let hits = self
            .semantic_search(&query_embedding, self.semantic_search_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "semantic search failed, falling back");
                Vec::new()
            });

        if hits.is_empty() {
            return self.get_memory_context().await;
        }

        let mut parts = Vec::new();

        let long_term = self.read_long_term().await?;
        if !long_term.is_empty() {
            parts.push(format!("## Long-term Memory\n{long_term}"));
        }

        let semantic_lines: Vec<String> = hits
            .iter()
            .map(|h| {
                let date_info = h.entry_date.as_deref().map(|d| format!(" ({d})")).unwrap_or_default();
                format!("- [{}{} sim={:.2}] {}", h.source, date_info, h.similarity, h.content)
            })
            .collect();
        parts.push(format!("## Relevant Memories (semantic)\n{}", semantic_lines.join("\n")));

        let today = self.read_today().await?;
        if !today.is_empty() {
            parts.push(format!("## Today's Notes\n{today}"));
        }

        Ok(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> PostgresMemoryStore {
        PostgresMemoryStore::new("postgres://localhost/nonexistent", 1536, 1, 10, 10).unwrap()
    }

    #[test]
    fn test_table_names_are_dimension_suffixed() {
        let store = test_store();
        assert_eq!(store.daily_table, "memory_daily_dim1536");
        assert_eq!(store.long_term_table, "memory_long_term_dim1536");
        assert_eq!(store.conversation_table, "memory_conversation_dim1536");
        assert_eq!(store.search_func, "memory_search_dim1536");
    }

    #[test]
    fn test_as_semantic_none_without_embedding_service() {
        let store = test_store();
        assert!(store.as_semantic().is_none());
    }

    #[test]
    fn test_as_semantic_some_once_attached() {
        let store = test_store();
        store.set_embedding_service(Arc::new(EmbeddingService::new("m", 1536, None, "key")));
        assert!(store.as_semantic().is_some());
    }

    #[test]
    fn test_conversation_table_accessor() {
        let store = test_store();
        assert_eq!(store.conversation_table(), "memory_conversation_dim1536");
    }

    // ── Live-database tests: require DATABASE_URL with pgvector installed ──

    async fn live_pool() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        PgPool::connect(&url).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres instance with pgvector (DATABASE_URL)"]
    async fn test_initialize_is_idempotent() {
        let Some(pool) = live_pool().await else { return };
        let dsn = std::env::var("DATABASE_URL").unwrap();
        pool.close().await;

        let store = PostgresMemoryStore::new(&dsn, 8, 1, 4, 10).unwrap();
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres instance with pgvector (DATABASE_URL)"]
    async fn test_write_long_term_monotonic_versions() {
        let Some(pool) = live_pool().await else { return };
        let dsn = std::env::var("DATABASE_URL").unwrap();
        pool.close().await;

        let store = PostgresMemoryStore::new(&dsn, 8, 1, 4, 10).unwrap();
        store.initialize().await.unwrap();
        store.write_long_term("first").await.unwrap();
        store.write_long_term("second").await.unwrap();
        assert_eq!(store.read_long_term().await.unwrap(), "second");
    }

    #[tokio::test]
    #[ignore = "requires a live Postgres instance with pgvector (DATABASE_URL)"]
    async fn test_append_today_round_trip() {
        let Some(pool) = live_pool().await else { return };
        let dsn = std::env::var("DATABASE_URL").unwrap();
        pool.close().await;

        let store = PostgresMemoryStore::new(&dsn, 8, 1, 4, 10).unwrap();
        store.initialize().await.unwrap();
        store.append_today("pizza is great").await.unwrap();
        let today = store.read_today().await.unwrap();
        assert!(today.ends_with("pizza is great"));
    }
}
