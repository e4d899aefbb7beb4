//! The memory engine: one long-lived owner of every index and limiter.
//!
//! [`MemoryEngine`] wires the embedding client, the vector store, the
//! lexical index, the link graph, the indexer and the capture rate limiter
//! together. All mutable state lives on the instance, so two engines in
//! one process (tests, several vaults) never share anything.
//!
//! # Lifecycle
//!
//! ```text
//! open / with_backends ─▶ start ─▶ (search | get | capture | recall)* ─▶ shutdown
//!                          │
//!                          ├─ health diagnostics (logged, never fatal)
//!                          ├─ collection setup
//!                          ├─ initial indexing pass (background)
//!                          └─ file watcher + debouncer
//! ```
//!
//! Shutdown stops the watcher, cancels the pending debounce timer, waits
//! for background passes and any in-flight pass, then flushes the lexical
//! index and link graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use vault_recall_core::capture::{detect_category, has_trigger, is_excluded, RateLimiter};
use vault_recall_core::embedding::Embedder;
use vault_recall_core::lexical::{LexicalIndex, LexicalOptions};
use vault_recall_core::links::LinkGraph;
use vault_recall_core::models::{
    captured_point_id, CaptureCategory, CapturedMemory, MemorySearchResult,
};
use vault_recall_core::recall::{format_recall_block, should_recall};
use vault_recall_core::search::{fuse, lexical_candidate_count, rank, Candidate, FusionWeights};
use vault_recall_core::store::{CapturedPage, VectorStore};

use crate::config::Config;
use crate::embedding::OllamaEmbedder;
use crate::get::{read_within, resolve, slice_lines, Snippet, SnippetTarget};
use crate::ingest::{Indexer, PassStats};
use crate::vector_store::QdrantStore;
use crate::watcher::{Debouncer, VaultWatcher};

const EXPORT_PAGE_SIZE: usize = 256;
const GLOBAL_SESSION: &str = "global";

/// What happened to a message offered for capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Disabled,
    Excluded,
    NoTrigger,
    RateLimited,
    Duplicate { score: f64, text: Option<String> },
    Captured { memory: CapturedMemory },
    Failed { error: String },
}

impl CaptureOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureOutcome::Captured { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(e) => Self {
                ok: false,
                error: Some(format!("{:#}", e)),
            },
        }
    }
}

/// Startup diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub model: String,
    pub embedding: ComponentHealth,
    pub vector_store: ComponentHealth,
    pub lexical_documents: usize,
    pub graph_nodes: usize,
    pub indexing: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.embedding.ok && self.vector_store.ok
    }
}

pub struct MemoryEngine {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    lexical: Arc<RwLock<LexicalIndex>>,
    graph: Arc<RwLock<LinkGraph>>,
    indexer: Arc<Indexer>,
    limiter: Mutex<RateLimiter>,
    capture_seq: AtomicU64,
    watcher: Mutex<Option<VaultWatcher>>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl MemoryEngine {
    /// Build an engine talking to the configured HTTP services.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = Arc::new(OllamaEmbedder::new(&config.embedding)?);
        let store = Arc::new(QdrantStore::new(&config.vector_store)?);
        Self::with_backends(config, embedder, store)
    }

    /// Build an engine on explicit backends. Loads persisted state.
    pub fn with_backends(
        config: Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let lexical = LexicalIndex::load(&config.lexical_state_path(), LexicalOptions::default())?;
        let graph = match LinkGraph::load(&config.graph_state_path()) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::warn!(error = %e, "link graph unreadable, starting fresh");
                LinkGraph::new()
            }
        };
        let lexical = Arc::new(RwLock::new(lexical));
        let graph = Arc::new(RwLock::new(graph));

        let indexer = Arc::new(Indexer::new(
            config.clone(),
            embedder.clone(),
            store.clone(),
            lexical.clone(),
            graph.clone(),
        ));
        let limiter = RateLimiter::new(config.capture.window(), config.capture.max_per_window);

        Ok(Self {
            config,
            embedder,
            store,
            lexical,
            graph,
            indexer,
            limiter: Mutex::new(limiter),
            capture_seq: AtomicU64::new(capture_seq_seed()),
            watcher: Mutex::new(None),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run diagnostics, prepare the collection, kick off the initial pass
    /// and start watching. Dependency failures are logged, not returned.
    pub async fn start(&self) -> Result<()> {
        let health = self.health().await;
        if let Some(e) = &health.embedding.error {
            tracing::warn!(model = %health.model, error = %e, "embedding service unhealthy");
        }
        if let Some(e) = &health.vector_store.error {
            tracing::warn!(error = %e, "vector store unhealthy");
        }
        if let Err(e) = self.indexer.ensure_collection().await {
            tracing::warn!(error = %e, "collection setup failed, will retry on the next pass");
        }

        self.spawn_pass();

        if self.config.watch.enabled {
            let indexer = self.indexer.clone();
            let tasks = self.tasks.clone();
            let shutdown = self.shutdown.clone();
            let debouncer = Arc::new(Debouncer::new(self.config.watch.debounce(), move || {
                if shutdown.is_cancelled() {
                    return;
                }
                let indexer = indexer.clone();
                tasks.spawn(async move { log_pass(indexer.run_pass().await) });
            }));
            match VaultWatcher::start(&self.config, debouncer) {
                Ok(watcher) => *self.lock_watcher() = Some(watcher),
                Err(e) => tracing::warn!(error = %e, "file watching disabled"),
            }
        }
        Ok(())
    }

    fn spawn_pass(&self) {
        let indexer = self.indexer.clone();
        self.tasks
            .spawn(async move { log_pass(indexer.run_pass().await) });
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<VaultWatcher>> {
        self.watcher.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one indexing pass now. `Ok(None)` if one is already running.
    pub async fn index(&self) -> Result<Option<PassStats>> {
        self.indexer.run_pass().await
    }

    pub async fn health(&self) -> HealthReport {
        let (embedding, vector_store) =
            tokio::join!(self.embedder.health_check(), self.store.health_check());
        HealthReport {
            model: self.embedder.model_name().to_string(),
            embedding: ComponentHealth::from_result(embedding),
            vector_store: ComponentHealth::from_result(vector_store),
            lexical_documents: self.lexical.read().await.len(),
            graph_nodes: self.graph.read().await.len(),
            indexing: self.indexer.is_running(),
        }
    }

    /// Search with the configured interactive limits.
    pub async fn search_default(&self, query: &str) -> Vec<MemorySearchResult> {
        self.search(query, self.config.search.max_results, self.config.search.min_score)
            .await
    }

    /// Hybrid search. Never fails: when the vector path is down the
    /// lexical results are returned alone.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        min_score: f64,
    ) -> Vec<MemorySearchResult> {
        let cfg = &self.config.search;
        let (vector, lexical) = tokio::join!(
            self.vector_candidates(query, max_results, min_score),
            self.lexical_candidates(query, lexical_candidate_count(max_results)),
        );

        let (vector, weights) = match vector {
            Ok(vector) => (
                vector,
                FusionWeights {
                    vector: cfg.vector_weight,
                    text: cfg.text_weight,
                },
            ),
            Err(e) => {
                tracing::warn!(error = %e, "vector search failed, using lexical results only");
                (Vec::new(), FusionWeights::degraded())
            }
        };

        let mut results = fuse(&vector, &lexical, weights, cfg.snippet_chars);
        if cfg.related_limit > 0 {
            let graph = self.graph.read().await;
            for result in &mut results {
                if let Some(related) = graph.related(&result.file) {
                    let neighbors = related.neighbors(cfg.related_limit);
                    if !neighbors.is_empty() {
                        result.related = Some(neighbors);
                    }
                }
            }
        }
        rank(results, max_results)
    }

    async fn vector_candidates(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<Candidate>> {
        let vector = self.embedder.embed(query).await?;
        let hits = self.store.search(&vector, limit, min_score).await?;
        Ok(hits.into_iter().map(|h| h.into_candidate()).collect())
    }

    async fn lexical_candidates(&self, query: &str, limit: usize) -> Vec<Candidate> {
        self.lexical
            .read()
            .await
            .search(query, limit)
            .into_iter()
            .map(|hit| Candidate {
                id: hit.doc.id,
                file: hit.doc.file,
                start_line: hit.doc.start_line,
                end_line: hit.doc.end_line,
                text: hit.doc.text,
                source: hit.doc.source,
                score: hit.score,
            })
            .collect()
    }

    /// Read `lines` lines of a logical path starting at 1-based `from`.
    pub async fn get_snippet(
        &self,
        logical: &str,
        from: Option<usize>,
        lines: Option<usize>,
    ) -> Result<Snippet> {
        let text = match resolve(&self.config.paths, logical)? {
            SnippetTarget::File { path, root } => read_within(&path, &root).await?,
            SnippetTarget::Captured(category) => self
                .export_captured(Some(category))
                .await?
                .into_iter()
                .map(|m| m.text.replace('\n', " "))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        Ok(Snippet {
            path: logical.to_string(),
            text: slice_lines(&text, from, lines),
        })
    }

    /// Offer an inbound message to the capture pipeline.
    pub async fn capture(&self, text: &str, session_key: Option<&str>) -> CaptureOutcome {
        let cfg = &self.config.capture;
        if !cfg.enabled {
            return CaptureOutcome::Disabled;
        }
        if is_excluded(text) {
            return CaptureOutcome::Excluded;
        }
        if !has_trigger(text) {
            return CaptureOutcome::NoTrigger;
        }

        let key = session_key.unwrap_or(GLOBAL_SESSION);
        let acquired = {
            let mut limiter = self.limiter.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            limiter.prune(now);
            limiter.try_acquire(key, now)
        };
        if !acquired {
            tracing::debug!(session = %key, "capture rate limited");
            return CaptureOutcome::RateLimited;
        }

        let text = text.trim();
        let vector = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "capture skipped, embedding failed");
                return CaptureOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let duplicate = self
            .store
            .search_for_duplicates(&vector, cfg.duplicate_threshold)
            .await;
        if let Some(e) = &duplicate.error {
            tracing::warn!(error = %e, "duplicate check failed, capturing anyway");
        } else if duplicate.exists {
            tracing::debug!(score = duplicate.score, "capture skipped, near-duplicate exists");
            return CaptureOutcome::Duplicate {
                score: duplicate.score,
                text: duplicate.text,
            };
        }

        let seq = self.capture_seq.fetch_add(1, Ordering::SeqCst);
        let memory = CapturedMemory {
            id: captured_point_id(text, seq),
            text: text.to_string(),
            category: detect_category(text),
            captured_at: chrono::Utc::now().timestamp_millis(),
            session_key: session_key.map(str::to_string),
        };

        match self.store.upsert_captured(&memory, vector).await {
            Ok(()) => {
                tracing::info!(id = memory.id, category = %memory.category, "captured memory");
                CaptureOutcome::Captured { memory }
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture write failed");
                CaptureOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Context block to prepend to an outbound prompt, if any.
    ///
    /// Bounded by the recall timeout; on timeout the in-flight search is
    /// dropped, which aborts its HTTP requests.
    pub async fn recall(&self, prompt: &str) -> Option<String> {
        let cfg = &self.config.recall;
        if !cfg.enabled || !should_recall(prompt, cfg.min_prompt_chars) {
            return None;
        }

        let search = self.search(prompt, cfg.max_results, cfg.min_score);
        match tokio::time::timeout(cfg.timeout(), search).await {
            Ok(results) => format_recall_block(&results, cfg.snippet_chars),
            Err(_) => {
                tracing::warn!(timeout_ms = cfg.timeout_ms, "recall timed out, skipping injection");
                None
            }
        }
    }

    pub async fn list_captured(
        &self,
        category: Option<CaptureCategory>,
        limit: usize,
        offset: Option<u64>,
    ) -> Result<CapturedPage> {
        self.store.list_captured(category, limit, offset).await
    }

    pub async fn delete_captured(&self, id: u64) -> Result<()> {
        self.store.delete_captured(id).await?;
        tracing::info!(id, "deleted captured memory");
        Ok(())
    }

    /// Every captured fact, following the scroll cursor to the end.
    pub async fn export_captured(
        &self,
        category: Option<CaptureCategory>,
    ) -> Result<Vec<CapturedMemory>> {
        let mut out = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .store
                .list_captured(category, EXPORT_PAGE_SIZE, offset)
                .await?;
            out.extend(page.items);
            match page.next_offset {
                Some(next) if Some(next) != offset => offset = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    /// Graph nodes nothing links to.
    pub async fn orphans(&self) -> Vec<String> {
        self.graph.read().await.orphans()
    }

    /// Stop watching, wait for indexing to settle, flush state.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();

        if let Some(mut watcher) = self.lock_watcher().take() {
            watcher.stop();
        }
        self.tasks.close();
        self.tasks.wait().await;
        self.indexer.wait_idle().await;
        self.indexer.flush().await?;
        tracing::info!("memory engine stopped");
        Ok(())
    }
}

fn log_pass(result: Result<Option<PassStats>>) {
    match result {
        Ok(Some(_)) => {}
        Ok(None) => tracing::debug!("indexing pass skipped, another is running"),
        Err(e) => tracing::warn!(error = %e, "indexing pass aborted"),
    }
}

/// Starting value for captured-fact ids, distinct per process start so the
/// same text captured in two runs never maps to the same point.
fn capture_seq_seed() -> u64 {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000)) as u64
}
