//! Embedding worker — polls the durable queue and backfills vectors.
//!
//! A single long-lived task with its own small pool, separate from the
//! request-path pool so an embedding burst cannot starve it.

use std::sync::Arc;
use std::time::Duration;

use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::embedding::EmbeddingService;
use super::postgres_store::{EmbeddingJob, EMBEDDING_QUEUE_TABLE, VISIBILITY_TIMEOUT_SECS};

/// Poll interval used when the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consumes `memory_embedding_queue` jobs and writes vectors back onto the
/// rows the memory store enqueued.
pub struct EmbeddingWorker {
    dsn: String,
    embedding: Arc<EmbeddingService>,
    poll_interval: Duration,
    stop: Arc<Notify>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingWorker {
    pub fn new(dsn: impl Into<String>, embedding: Arc<EmbeddingService>) -> Self {
        Self::with_poll_interval(dsn, embedding, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(dsn: impl Into<String>, embedding: Arc<EmbeddingService>, poll_interval: Duration) -> Self {
        EmbeddingWorker {
            dsn: dsn.into(),
            embedding,
            poll_interval,
            stop: Arc::new(Notify::new()),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Open a small dedicated pool and start the poll loop as a background task.
    pub async fn start(&self) -> anyhow::Result<()> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(2)
            .connect(&self.dsn)
            .await?;

        let embedding = self.embedding.clone();
        let poll_interval = self.poll_interval;
        let stop = self.stop.clone();

        let handle = tokio::spawn(async move {
            run_loop(pool, embedding, poll_interval, stop).await;
        });

        *self.task.lock().unwrap() = Some(handle);
        info!("embedding worker started");
        Ok(())
    }

    /// Cancel the poll loop and await its exit.
    pub async fn stop(&self) {
        self.stop.notify_one();
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("embedding worker stopped");
    }
}

async fn run_loop(pool: PgPool, embedding: Arc<EmbeddingService>, poll_interval: Duration, stop: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            processed = poll_once(&pool, &embedding) => {
                match processed {
                    Ok(true) => continue,
                    Ok(false) => tokio::time::sleep(poll_interval).await,
                    Err(e) => {
                        error!(error = %e, "embedding worker poll error");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }
    }
    pool.close().await;
}

/// Claim and process one queue message. Returns `true` if a message was
/// claimed (processed or not), `false` if the queue was empty.
async fn poll_once(pool: &PgPool, embedding: &EmbeddingService) -> anyhow::Result<bool> {
    let Some(job) = claim_next(pool, embedding.dimensions()).await? else {
        return Ok(false);
    };

    match embedding.embed(&job.content).await {
        Ok(vector) => {
            if let Err(e) = apply_embedding(pool, &job, vector).await {
                warn!(table = %job.table, id = job.row_id, error = %e, "failed to write embedding back");
            } else {
                debug!(table = %job.table, id = job.row_id, "embedded");
            }
        }
        Err(e) => {
            warn!(table = %job.table, id = job.row_id, error = %e, "failed to embed, will retry after visibility timeout");
        }
    }

    Ok(true)
}

/// Atomically claim the oldest visible message matching this worker's own
/// embedding dimension, advancing its `vt` so other workers (or this
/// worker's next cycle, on failure) don't pick it up again until the
/// visibility timeout elapses. Jobs queued for a different dimension are
/// left untouched for the worker configured to handle them.
async fn claim_next(pool: &PgPool, dimensions: u32) -> anyhow::Result<Option<EmbeddingJob>> {
    let row = sqlx::query(&format!(
        "UPDATE {EMBEDDING_QUEUE_TABLE}
         SET vt = now() + interval '{VISIBILITY_TIMEOUT_SECS} seconds'
         WHERE id = (
             SELECT id FROM {EMBEDDING_QUEUE_TABLE}
             WHERE vt <= now() AND dimensions = $1
             ORDER BY id
             FOR UPDATE SKIP LOCKED
             LIMIT 1
         )
         RETURNING id, table_name, row_id, content, dimensions"
    ))
    .bind(dimensions as i32)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| EmbeddingJob {
        queue_id: r.get("id"),
        table: r.get("table_name"),
        row_id: r.get("row_id"),
        content: r.get("content"),
        dimensions: r.get("dimensions"),
    }))
}

/// Write the embedding back to its row and archive (delete) the queue
/// message — only on success, so failures naturally reappear for retry.
async fn apply_embedding(pool: &PgPool, job: &EmbeddingJob, vector: Vec<f32>) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(&format!("UPDATE {} SET embedding = $1, updated_at = now() WHERE id = $2", job.table))
        .bind(Vector::from(vector))
        .bind(job.row_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(&format!("DELETE FROM {EMBEDDING_QUEUE_TABLE} WHERE id = $1"))
        .bind(job.queue_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_interval() {
        assert_eq!(DEFAULT_POLL_INTERVAL, Duration::from_secs(2));
    }

    #[test]
    fn test_visibility_timeout_constant() {
        assert_eq!(VISIBILITY_TIMEOUT_SECS, 30);
    }

    #[tokio::test]
    async fn test_start_stop_without_reachable_db_does_not_panic() {
        let embedding = Arc::new(EmbeddingService::new("m", 8, None, "key"));
        let worker = EmbeddingWorker::with_poll_interval(
            "postgres://127.0.0.1:1/nonexistent",
            embedding,
            Duration::from_millis(10),
        );
        // connect() against an unreachable port fails fast; start() surfaces the error.
        assert!(worker.start().await.is_err());
    }
}
