//! Memory backend contract — the capability set every store implements.
//!
//! Ported from the donor's `Protocol`-based `MemoryBackend`, made into a
//! proper trait. Semantic retrieval is exposed through a capability
//! accessor rather than `dyn Any` downcasting, so the base trait stays
//! object-safe while only stores that can actually serve semantic queries
//! pay for that code path.

use async_trait::async_trait;

/// One retrievable memory record, used by the context builder to render a
/// semantic hit (`source(date) sim=S.SS content`).
#[derive(Clone, Debug, PartialEq)]
pub struct SemanticHit {
    pub source: String,
    pub content: String,
    pub entry_date: Option<String>,
    pub similarity: f64,
}

/// Every concrete memory store implements this.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Provision whatever the store needs (schema, pool, directories). Must
    /// be idempotent — calling it twice is a no-op, not an error.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Release held resources (pool, file handles). Called once at shutdown.
    async fn close(&self) -> anyhow::Result<()>;

    /// Today's notes, or `""` if none exist yet.
    async fn read_today(&self) -> anyhow::Result<String>;

    /// Append a note to today's memory, creating it on first write.
    async fn append_today(&self, content: &str) -> anyhow::Result<()>;

    /// The current long-term memory content, or `""` if never written.
    async fn read_long_term(&self) -> anyhow::Result<String>;

    /// Replace long-term memory with `content`.
    async fn write_long_term(&self, content: &str) -> anyhow::Result<()>;

    /// Concatenation of the last `days` daily entries (today included), most
    /// recent first.
    async fn get_recent_memories(&self, days: u32) -> anyhow::Result<String>;

    /// Non-semantic context: long-term memory plus today's notes.
    async fn get_memory_context(&self) -> anyhow::Result<String>;

    /// Capability probe for semantic retrieval. Default: unsupported.
    fn as_semantic(&self) -> Option<&dyn SemanticMemoryBackend> {
        None
    }
}

/// Extension implemented only by stores that can serve semantic queries.
#[async_trait]
pub trait SemanticMemoryBackend: MemoryBackend {
    /// Embedding-ranked context for `query`, falling back to
    /// [`MemoryBackend::get_memory_context`] when no embedding service is
    /// attached or the search comes back empty.
    async fn get_memory_context_semantic(&self, query: &str) -> anyhow::Result<String>;
}
