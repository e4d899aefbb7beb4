//! In-memory [`VectorStore`] implementation for tests and offline use.
//!
//! Points live in a `BTreeMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity. Per-file replacement happens under a
//! single write lock, so readers see either the old or the new points of
//! a file, never a mix.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{CaptureCategory, CapturedMemory, MemorySource};

use super::{CapturedPage, Point, PointPayload, ScoredPoint, VectorStore};

/// In-memory vector store.
pub struct InMemoryVectorStore {
    dimensions: RwLock<Option<usize>>,
    points: RwLock<BTreeMap<u64, Point>>,
    available: AtomicBool,
    file_writes: AtomicUsize,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            dimensions: RwLock::new(None),
            points: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            file_writes: AtomicUsize::new(0),
        }
    }

    /// Simulate an outage: while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of accepted [`VectorStore::batch_upsert_file`] calls.
    pub fn file_writes(&self) -> usize {
        self.file_writes.load(Ordering::SeqCst)
    }

    /// Ids of every point stored for `file`, ascending.
    pub fn ids_for_file(&self, file: &str) -> Vec<u64> {
        self.points
            .read()
            .unwrap()
            .values()
            .filter(|p| p.payload.file == file)
            .map(|p| p.id)
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("vector store unavailable");
        }
        Ok(())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if let Some(dims) = *self.dimensions.read().unwrap() {
            if vector.len() != dims {
                bail!(
                    "Vector dimension mismatch: expected {}, got {}",
                    dims,
                    vector.len()
                );
            }
        }
        Ok(())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        self.check_available()?;
        let mut dims = self.dimensions.write().unwrap();
        match *dims {
            Some(existing) if existing != dimensions => bail!(
                "Collection exists with dimension {}, model produces {}",
                existing,
                dimensions
            ),
            _ => *dims = Some(dimensions),
        }
        Ok(())
    }

    async fn batch_upsert_file(&self, file: &str, points: Vec<Point>) -> Result<()> {
        self.check_available()?;
        for p in &points {
            self.check_dimensions(&p.vector)?;
            if p.payload.file != file {
                bail!("Point {} belongs to {}, not {}", p.id, p.payload.file, file);
            }
        }

        let mut stored = self.points.write().unwrap();
        stored.retain(|_, p| p.payload.file != file);
        for p in points {
            stored.insert(p.id, p);
        }
        self.file_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_captured(&self, memory: &CapturedMemory, vector: Vec<f32>) -> Result<()> {
        self.check_available()?;
        self.check_dimensions(&vector)?;
        self.points.write().unwrap().insert(
            memory.id,
            Point {
                id: memory.id,
                vector,
                payload: PointPayload::captured(memory),
            },
        );
        Ok(())
    }

    async fn list_captured(
        &self,
        category: Option<CaptureCategory>,
        limit: usize,
        offset: Option<u64>,
    ) -> Result<CapturedPage> {
        self.check_available()?;
        let stored = self.points.read().unwrap();
        let mut matching = stored
            .range(offset.unwrap_or(0)..)
            .map(|(_, p)| p)
            .filter(|p| p.payload.source == MemorySource::Captured)
            .filter(|p| category.is_none_or(|c| p.payload.category == c.as_str()));

        let items: Vec<CapturedMemory> = matching
            .by_ref()
            .take(limit)
            .filter_map(|p| p.payload.to_captured(p.id))
            .collect();
        let next_offset = matching.next().map(|p| p.id);
        Ok(CapturedPage { items, next_offset })
    }

    async fn delete_captured(&self, id: u64) -> Result<()> {
        self.check_available()?;
        let mut stored = self.points.write().unwrap();
        if stored
            .get(&id)
            .is_some_and(|p| p.payload.source == MemorySource::Captured)
        {
            stored.remove(&id);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<ScoredPoint>> {
        self.check_available()?;
        let stored = self.points.read().unwrap();
        let mut hits: Vec<ScoredPoint> = stored
            .values()
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine_similarity(vector, &p.vector) as f64,
                payload: p.payload.clone(),
            })
            .filter(|h| h.score >= score_threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}
