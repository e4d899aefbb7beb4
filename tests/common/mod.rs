#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vault_recall::config::Config;
use vault_recall::engine::MemoryEngine;
use vault_recall_core::embedding::Embedder;
use vault_recall_core::lexical::tokenize;
use vault_recall_core::store::memory::InMemoryVectorStore;

pub const DIMS: usize = 64;

/// Hashes each token into one of [`DIMS`] buckets. Texts sharing words get
/// a positive cosine, disjoint texts usually get zero.
pub struct HashEmbedder;

pub fn bucket(token: &str) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in token.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % DIMS as u64) as usize
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in tokenize(text) {
        v[bucket(&token)] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(hash_embed(text))
    }

    async fn dimensions(&self) -> anyhow::Result<usize> {
        Ok(DIMS)
    }
}

/// Sleeps before every embedding.
pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        tokio::time::sleep(self.0).await;
        Ok(hash_embed(text))
    }

    async fn dimensions(&self) -> anyhow::Result<usize> {
        Ok(DIMS)
    }
}

/// A workspace with an empty `vault/`. Watching is off.
pub fn test_config(tmp: &TempDir) -> Config {
    fs::create_dir_all(tmp.path().join("vault")).unwrap();
    let mut config = Config::for_vault(tmp.path().join("vault"));
    config.watch.enabled = false;
    config
}

pub fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

pub fn engine_with(
    config: Config,
    embedder: Arc<dyn Embedder>,
) -> (Arc<MemoryEngine>, Arc<InMemoryVectorStore>) {
    let store = Arc::new(InMemoryVectorStore::new());
    let engine = MemoryEngine::with_backends(config, embedder, store.clone()).unwrap();
    (Arc::new(engine), store)
}

pub fn engine(config: Config) -> (Arc<MemoryEngine>, Arc<InMemoryVectorStore>) {
    engine_with(config, Arc::new(HashEmbedder))
}
