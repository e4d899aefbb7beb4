//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the contract the indexer, the query engine
//! and the capture pipeline share with the remote vector database. The app
//! crate provides a Qdrant REST implementation; [`memory::InMemoryVectorStore`]
//! implements the same contract for tests and offline use.
//!
//! # Operations
//!
//! | Method                    | Purpose                                          |
//! |---------------------------|--------------------------------------------------|
//! | `ensure_collection`       | create collection and payload indexes if absent  |
//! | `batch_upsert_file`       | atomically replace every point of one file       |
//! | `upsert_captured`         | insert one captured fact                         |
//! | `list_captured`           | page through captured facts                      |
//! | `delete_captured`         | delete one captured fact by id                   |
//! | `search`                  | cosine similarity search with a score threshold  |
//! | `search_for_duplicates`   | nearest neighbor above a threshold, never fails  |
//! | `health_check`            | reachability probe for startup diagnostics       |

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metadata::FileMetadata;
use crate::models::{CaptureCategory, CapturedMemory, Chunk, MemorySource};
use crate::search::Candidate;

/// Payload stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointPayload {
    pub file: String,
    #[serde(default)]
    pub start_line: usize,
    #[serde(default)]
    pub end_line: usize,
    pub text: String,
    #[serde(default)]
    pub hash: String,
    pub source: MemorySource,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

impl PointPayload {
    /// Payload for a captured fact, filed under `captured/<category>`.
    pub fn captured(memory: &CapturedMemory) -> Self {
        PointPayload {
            file: memory.category.pseudo_file(),
            start_line: 0,
            end_line: 0,
            text: memory.text.clone(),
            hash: crate::models::content_hash(&memory.text),
            source: MemorySource::Captured,
            category: memory.category.as_str().to_string(),
            tags: Vec::new(),
            links: Vec::new(),
            captured_at: Some(memory.captured_at),
            session_key: memory.session_key.clone(),
        }
    }

    /// Read a captured fact back. `None` for chunk payloads.
    pub fn to_captured(&self, id: u64) -> Option<CapturedMemory> {
        if self.source != MemorySource::Captured {
            return None;
        }
        Some(CapturedMemory {
            id,
            text: self.text.clone(),
            category: self.category.parse().unwrap_or(CaptureCategory::Other),
            captured_at: self.captured_at.unwrap_or(0),
            session_key: self.session_key.clone(),
        })
    }
}

/// A vector with its id and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f64,
    pub payload: PointPayload,
}

impl ScoredPoint {
    pub fn into_candidate(self) -> Candidate {
        Candidate {
            id: self.id,
            file: self.payload.file,
            start_line: self.payload.start_line,
            end_line: self.payload.end_line,
            text: self.payload.text,
            source: self.payload.source,
            score: self.score,
        }
    }
}

/// One page of captured facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPage {
    pub items: Vec<CapturedMemory>,
    /// Cursor for the next page; `None` on the last page.
    pub next_offset: Option<u64>,
}

/// Outcome of a duplicate probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateCheck {
    pub exists: bool,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build the points for one file's chunks.
///
/// Fails when the number of embeddings does not match the number of chunks.
pub fn build_chunk_points(
    chunks: &[Chunk],
    embeddings: Vec<Vec<f32>>,
    meta: &FileMetadata,
    links: &[String],
) -> Result<Vec<Point>> {
    if chunks.len() != embeddings.len() {
        bail!(
            "Embedding count mismatch: {} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        );
    }

    Ok(chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| Point {
            id: chunk.id,
            vector,
            payload: PointPayload {
                file: chunk.file.clone(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                text: chunk.text.clone(),
                hash: chunk.hash.clone(),
                source: MemorySource::from_file(&chunk.file),
                category: meta.category.clone(),
                tags: meta.tags.clone(),
                links: links.to_vec(),
                captured_at: None,
                session_key: None,
            },
        })
        .collect())
}

/// Remote (or in-memory) vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent, then (re)create payload indexes.
    async fn ensure_collection(&self, dimensions: usize) -> Result<()>;

    /// Replace every point of `file` with `points` as one atomic unit.
    /// An empty `points` deletes the file.
    async fn batch_upsert_file(&self, file: &str, points: Vec<Point>) -> Result<()>;

    async fn upsert_captured(&self, memory: &CapturedMemory, vector: Vec<f32>) -> Result<()>;

    /// Captured facts ordered by id, starting at the `offset` cursor.
    async fn list_captured(
        &self,
        category: Option<CaptureCategory>,
        limit: usize,
        offset: Option<u64>,
    ) -> Result<CapturedPage>;

    /// Delete a captured fact. Chunk points are never touched.
    async fn delete_captured(&self, id: u64) -> Result<()>;

    /// Nearest points scoring at least `score_threshold`, best first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredPoint>>;

    /// Nearest neighbor scoring at least `threshold`. Errors are reported
    /// in [`DuplicateCheck::error`] instead of being returned.
    async fn search_for_duplicates(&self, vector: &[f32], threshold: f64) -> DuplicateCheck {
        match self.search(vector, 1, threshold).await {
            Ok(hits) => match hits.into_iter().next() {
                Some(hit) => DuplicateCheck {
                    exists: true,
                    score: hit.score,
                    text: Some(hit.payload.text),
                    error: None,
                },
                None => DuplicateCheck::default(),
            },
            Err(e) => DuplicateCheck {
                exists: false,
                score: 0.0,
                text: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn health_check(&self) -> Result<()>;
}
