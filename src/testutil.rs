//! Shared test doubles for pipeline-level tests

use crate::chunk::{normalize_guid, normalize_rel_path};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::vector::{ScoredPoint, SearchFilter, VectorPoint, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// One recorded gateway operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorOp {
    EnsureCollection(usize),
    Upsert(usize),
    DeleteByPath(String),
    DeleteByGuid(String),
    DeleteByIds(usize),
    DropCollection,
}

#[derive(Debug, Clone)]
struct StoredPoint {
    rel_path: String,
    guid: Option<String>,
}

/// In-memory vector store that records every operation and tracks live
/// points by payload, so tests can assert on delete/upsert ordering and on
/// which paths still have points.
#[derive(Default)]
pub struct RecordingVectorStore {
    ops: Mutex<Vec<VectorOp>>,
    points: Mutex<HashMap<Uuid, StoredPoint>>,
    fail_writes: AtomicBool,
}

impl RecordingVectorStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<VectorOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    /// rel_path of every live point (one entry per point)
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .points
            .lock()
            .unwrap()
            .values()
            .map(|p| p.rel_path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::VectorBackendUnavailable(
                "stub backend is failing writes".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn record(&self, op: VectorOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl VectorStore for RecordingVectorStore {
    async fn ensure_collection(&self, dim: usize) -> Result<()> {
        self.check_writable()?;
        self.record(VectorOp::EnsureCollection(dim));
        Ok(())
    }

    async fn wait_ready(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<()> {
        self.check_writable()?;
        self.record(VectorOp::Upsert(points.len()));
        let mut live = self.points.lock().unwrap();
        for point in points {
            live.insert(
                point.id,
                StoredPoint {
                    rel_path: point.payload.rel_path,
                    guid: point.payload.guid,
                },
            );
        }
        Ok(())
    }

    async fn delete_by_path(&self, rel_path: &str) -> Result<usize> {
        self.check_writable()?;
        let normalized = normalize_rel_path(rel_path);
        self.record(VectorOp::DeleteByPath(normalized.clone()));
        let mut live = self.points.lock().unwrap();
        let before = live.len();
        live.retain(|_, point| point.rel_path != normalized);
        Ok(before - live.len())
    }

    async fn delete_by_guid(&self, guid: &str) -> Result<()> {
        self.check_writable()?;
        let normalized = normalize_guid(guid);
        self.record(VectorOp::DeleteByGuid(normalized.clone()));
        let mut live = self.points.lock().unwrap();
        live.retain(|_, point| point.guid.as_deref() != Some(normalized.as_str()));
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()> {
        self.check_writable()?;
        self.record(VectorOp::DeleteByIds(ids.len()));
        let mut live = self.points.lock().unwrap();
        for id in ids {
            live.remove(id);
        }
        Ok(())
    }

    async fn search_top_k(
        &self,
        _vector: Vec<f32>,
        _k: usize,
        _filter: Option<SearchFilter>,
        _threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        Ok(Vec::new())
    }

    async fn count_points(&self) -> Result<u64> {
        Ok(self.points.lock().unwrap().len() as u64)
    }

    async fn drop_collection(&self) -> Result<()> {
        self.check_writable()?;
        self.record(VectorOp::DropCollection);
        self.points.lock().unwrap().clear();
        Ok(())
    }
}

/// Deterministic embedder: every text maps to a unit basis vector chosen by
/// its length, so shapes are valid and results are reproducible.
pub struct StubEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self {
            dimension: 8,
            calls: AtomicUsize::new(0),
        }
    }
}

impl StubEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; self.dimension];
                vector[text.len() % self.dimension] = 1.0;
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// Embedder returning all-zero vectors, for shape-guard tests
pub struct ZeroEmbedder {
    pub dimension: usize,
}

#[async_trait]
impl Embedder for ZeroEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "zero"
    }
}
