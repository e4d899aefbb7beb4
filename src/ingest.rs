//! Indexing pass orchestration.
//!
//! A pass walks every memory root, then pushes each Markdown file through
//! chunk → metadata → link graph → lexical index → embedding → vector store.
//!
//! # Roots
//!
//! Roots are visited in a fixed order, and each contributes a logical path
//! prefix:
//!
//! 1. the vault (`vault/…`), required: a missing vault aborts the pass
//! 2. the workspace memory file (`MEMORY.md`), if present
//! 3. the workspace memory folder (`memory/…`), if present
//! 4. each configured extra path (`extra/<i>/…`), file or directory;
//!    missing ones are skipped
//!
//! # Failure model
//!
//! A file that fails to read, embed, or upsert is logged and skipped; the
//! pass moves on. After the walk, files the lexical index or link graph
//! still know about but that no longer exist on disk are pruned from all
//! three indexes. The lexical index and link graph are then flushed if
//! anything changed.
//!
//! Only one pass runs at a time. [`Indexer::run_pass`] returns `Ok(None)`
//! without doing anything while another pass holds the lock.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use vault_recall_core::chunk::chunk_text;
use vault_recall_core::embedding::Embedder;
use vault_recall_core::lexical::LexicalIndex;
use vault_recall_core::links::LinkGraph;
use vault_recall_core::metadata::FileMetadata;
use vault_recall_core::models::{
    CAPTURED_PREFIX, EXTRA_PREFIX, MEMORY_DIR_PREFIX, MEMORY_FILE, VAULT_PREFIX,
};
use vault_recall_core::store::{build_chunk_points, VectorStore};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::IndexError;

/// A file on disk with its logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub logical: String,
    pub path: PathBuf,
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub files: usize,
    pub chunks: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Every indexable file, in root order.
pub fn collect_files(config: &Config) -> Result<Vec<SourceFile>> {
    let paths = &config.paths;
    let excludes = build_globset(&paths.exclude_globs)?;

    if !paths.vault.is_dir() {
        return Err(IndexError::VaultMissing(paths.vault.clone()).into());
    }

    let mut files = scan_dir(&paths.vault, VAULT_PREFIX, &excludes)?;

    let memory_file = paths.memory_file_path();
    if memory_file.is_file() {
        files.push(SourceFile {
            logical: MEMORY_FILE.to_string(),
            path: memory_file,
        });
    }

    let memory_dir = paths.memory_dir_path();
    if memory_dir.is_dir() {
        files.extend(scan_dir(&memory_dir, MEMORY_DIR_PREFIX, &excludes)?);
    }

    for (i, extra) in paths.extra.iter().enumerate() {
        let prefix = format!("{}{}/", EXTRA_PREFIX, i);
        if extra.is_dir() {
            files.extend(scan_dir(extra, &prefix, &excludes)?);
        } else if extra.is_file() && is_markdown(extra) {
            let name = extra
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            files.push(SourceFile {
                logical: format!("{}{}", prefix, name),
                path: extra.clone(),
            });
        } else {
            tracing::debug!(path = %extra.display(), "extra path missing, skipping");
        }
    }

    Ok(files)
}

fn scan_dir(root: &Path, prefix: &str, excludes: &GlobSet) -> Result<Vec<SourceFile>> {
    let mut items = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_markdown(entry.path()) {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if excludes.is_match(&rel_str) {
            continue;
        }

        items.push(SourceFile {
            logical: format!("{}{}", prefix, rel_str),
            path: path.to_path_buf(),
        });
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.logical.cmp(&b.logical));

    Ok(items)
}

pub(crate) fn is_markdown(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid exclude glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Owns the write side of the three indexes.
pub struct Indexer {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    lexical: Arc<RwLock<LexicalIndex>>,
    graph: Arc<RwLock<LinkGraph>>,
    pass_lock: Mutex<()>,
    collection_ready: OnceCell<()>,
}

impl Indexer {
    pub fn new(
        config: Arc<Config>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        lexical: Arc<RwLock<LexicalIndex>>,
        graph: Arc<RwLock<LinkGraph>>,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
            lexical,
            graph,
            pass_lock: Mutex::new(()),
            collection_ready: OnceCell::new(),
        }
    }

    /// Probe the embedding dimensions and create the collection, once.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.collection_ready
            .get_or_try_init(|| async {
                let dims = self.embedder.dimensions().await?;
                self.store.ensure_collection(dims).await?;
                Ok::<(), anyhow::Error>(())
            })
            .await
            .map(|_| ())
    }

    pub fn is_running(&self) -> bool {
        self.pass_lock.try_lock().is_err()
    }

    /// Wait for an in-flight pass to finish.
    pub async fn wait_idle(&self) {
        let _guard = self.pass_lock.lock().await;
    }

    /// Run one full pass. `Ok(None)` when another pass is already running.
    pub async fn run_pass(&self) -> Result<Option<PassStats>> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            tracing::debug!("indexing pass already running, skipping");
            return Ok(None);
        };

        let files = collect_files(&self.config)?;

        if let Err(e) = self.ensure_collection().await {
            tracing::warn!(error = %e, "vector store not ready, vector upserts will fail this pass");
        }

        let mut stats = PassStats::default();
        let mut seen = BTreeSet::new();
        for file in &files {
            seen.insert(file.logical.clone());
            match self.index_file(file).await {
                Ok(chunks) => {
                    stats.files += 1;
                    stats.chunks += chunks;
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(file = %file.logical, error = %e, "failed to index file");
                }
            }
        }

        stats.pruned = self.prune_stale(&seen).await;
        self.flush().await?;

        tracing::info!(
            files = stats.files,
            chunks = stats.chunks,
            failed = stats.failed,
            pruned = stats.pruned,
            "indexing pass complete"
        );
        Ok(Some(stats))
    }

    /// Index a single file. Returns the number of chunks written.
    pub async fn index_file(&self, file: &SourceFile) -> Result<usize> {
        let text = tokio::fs::read_to_string(&file.path)
            .await
            .with_context(|| format!("Failed to read {}", file.path.display()))?;

        let chunking = &self.config.chunking;
        let chunks = chunk_text(
            &file.logical,
            &text,
            chunking.target_words,
            chunking.overlap_words,
        );
        let meta = FileMetadata::extract(&file.logical, &text);

        let links = self.graph.write().await.update_file(&file.logical, &text);

        self.lexical
            .write()
            .await
            .replace_file(&file.logical, &chunks)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        let points = build_chunk_points(&chunks, embeddings, &meta, &links)?;
        self.store.batch_upsert_file(&file.logical, points).await?;

        tracing::debug!(file = %file.logical, chunks = chunks.len(), "indexed file");
        Ok(chunks.len())
    }

    /// Drop files that vanished from disk. Returns how many were removed.
    async fn prune_stale(&self, seen: &BTreeSet<String>) -> usize {
        let mut known: BTreeSet<String> = self.lexical.read().await.files().into_iter().collect();
        {
            let graph = self.graph.read().await;
            known.extend(
                graph
                    .files()
                    .filter(|f| graph.node(f).is_some_and(|n| !n.links.is_empty()))
                    .cloned(),
            );
        }

        let stale: Vec<String> = known
            .into_iter()
            .filter(|f| !seen.contains(f) && !f.starts_with(CAPTURED_PREFIX))
            .collect();

        for file in &stale {
            if let Err(e) = self.lexical.write().await.remove_by_file(file) {
                tracing::warn!(file = %file, error = %e, "failed to drop stale lexical entries");
            }
            self.graph.write().await.remove_file(file);
            if let Err(e) = self.store.batch_upsert_file(file, Vec::new()).await {
                tracing::warn!(file = %file, error = %e, "failed to delete stale points");
            }
            tracing::info!(file = %file, "pruned deleted file");
        }
        stale.len()
    }

    /// Persist the lexical index and link graph if either changed.
    pub async fn flush(&self) -> Result<()> {
        let lexical_path = self.config.lexical_state_path();
        if self.lexical.write().await.save(&lexical_path)? {
            tracing::debug!(path = %lexical_path.display(), "saved lexical index");
        }
        let graph_path = self.config.graph_state_path();
        if self.graph.write().await.save(&graph_path)? {
            tracing::debug!(path = %graph_path.display(), "saved link graph");
        }
        Ok(())
    }
}
