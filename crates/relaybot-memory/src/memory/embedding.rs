//! Embedding service — text→vector adapter for the relational memory store.
//!
//! Talks to any OpenAI-compatible `/embeddings` endpoint, matching the
//! outbound-HTTP idiom used for chat providers: a shared, timeout-bounded
//! `reqwest::Client`, bearer auth, JSON in/out.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Generates embeddings via an OpenAI-compatible HTTP API.
pub struct EmbeddingService {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: u32,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: u32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingService {
    /// Build a service against `base_url` (defaults to the OpenAI API) using
    /// `model`/`dimensions`/`key` from `MemoryConfig.embedding`.
    pub fn new(model: impl Into<String>, dimensions: u32, base_url: Option<&str>, key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build embedding HTTP client");

        EmbeddingService {
            client,
            api_base: base_url
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: key.into(),
            model: model.into(),
            dimensions,
        }
    }

    /// The dimension this service was configured for; embeddings it returns
    /// always have this length.
    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    /// Embed a single string.
    pub async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vecs = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vecs.pop()
            .ok_or_else(|| anyhow::anyhow!("embedding API returned no vectors"))
    }

    /// Embed a batch of strings, order preserved. Empty input short-circuits
    /// without any network I/O.
    pub async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.api_base);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        debug!(model = %self.model, count = texts.len(), "requesting embeddings");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "embedding request failed");
                anyhow::anyhow!("embedding request failed: {e}")
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "embedding API error");
            anyhow::bail!("embedding API error: {status} — {text}");
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to parse embedding response");
            anyhow::anyhow!("failed to parse embedding response: {e}")
        })?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
