//! HTTP client for the embedding service.
//!
//! Speaks the Ollama-compatible wire contract:
//!
//! | Call              | Endpoint              | Request                  | Response                 |
//! |-------------------|-----------------------|--------------------------|--------------------------|
//! | single embed      | `POST /api/embeddings`| `{model, prompt}`        | `{embedding: [f32]}`     |
//! | bulk embed        | `POST /api/embed`     | `{model, input: [text]}` | `{embeddings: [[f32]]}`  |
//! | model list        | `GET /api/tags`       |                          | `{models: [{name}]}`     |
//!
//! # Batching
//!
//! [`OllamaEmbedder::embed_batch`] tries the bulk endpoint once. If it
//! fails for any reason (404 on older servers, a malformed body, a count
//! mismatch), it falls back to one single-text call per input. Results are
//! in input order either way.
//!
//! # Dimensions
//!
//! The first call to `dimensions()` embeds a fixed sentinel string and
//! caches the vector length for the lifetime of the client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use vault_recall_core::embedding::Embedder;

use crate::config::EmbeddingConfig;

const DIMENSION_PROBE: &str = "dimension probe";

#[derive(Deserialize)]
struct SingleResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct BulkResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// Embedding client for an Ollama-compatible server.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: OnceCell<usize>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: OnceCell::new(),
        })
    }

    async fn embed_bulk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Bulk embedding error {}: {}", status, body_text);
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .context("Invalid bulk embedding response")?;
        if parsed.embeddings.len() != texts.len() {
            bail!(
                "Bulk embedding returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        Ok(parsed.embeddings)
    }
}

/// Whether a tag from the model list names `model`. A bare model name
/// matches any of its tags.
fn model_matches(tag: &str, model: &str) -> bool {
    if tag == model {
        return true;
    }
    if model.contains(':') {
        return false;
    }
    tag.split_once(':').is_some_and(|(name, _)| name == model)
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Embedding service unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Embedding error {}: {}", status, body_text);
        }

        let parsed: SingleResponse = response
            .json()
            .await
            .context("Invalid embedding response")?;
        if parsed.embedding.is_empty() {
            bail!("Embedding service returned an empty vector");
        }
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self.embed_bulk(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                tracing::debug!(error = %e, count = texts.len(), "bulk embedding failed, embedding one at a time");
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(self.embed(text).await?);
                }
                Ok(out)
            }
        }
    }

    async fn dimensions(&self) -> Result<usize> {
        self.dimensions
            .get_or_try_init(|| async {
                let probe = self.embed(DIMENSION_PROBE).await?;
                tracing::info!(model = %self.model, dimensions = probe.len(), "probed embedding dimensions");
                Ok::<usize, anyhow::Error>(probe.len())
            })
            .await
            .copied()
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .with_context(|| format!("Embedding service unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Embedding service model list failed with {}", status);
        }

        let tags: TagsResponse = response.json().await.context("Invalid model list response")?;
        if !tags.models.iter().any(|m| model_matches(&m.name, &self.model)) {
            let available: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
            bail!(
                "Embedding model '{}' is not available on {} (found: {})",
                self.model,
                self.base_url,
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            );
        }
        Ok(())
    }
}
