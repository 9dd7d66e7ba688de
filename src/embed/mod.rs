//! Embedding generation
//!
//! This module provides an abstraction over embedding backends with:
//! - A trait for different embedding providers
//! - An HTTP backend (the model warms lazily on its first call)
//! - Batch processing for efficiency

mod http_backend;

pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// L1 threshold under which a vector counts as effectively zero
pub const ZERO_VECTOR_EPSILON: f32 = 1e-8;

/// Trait for embedding providers.
///
/// Stateless: safe to call concurrently from distinct requests. Every
/// returned vector has length [`Embedder::dimension`] and is L2-normalized.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; `result.len() == texts.len()`
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Declared embedding dimension
    fn dimension(&self) -> usize;

    /// Model name/identifier
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder = HttpEmbedder::new(config)?;
    Ok(Arc::new(embedder))
}

/// True when the vector's L1 mass is below [`ZERO_VECTOR_EPSILON`]
pub fn is_effectively_zero(vector: &[f32]) -> bool {
    vector.iter().map(|v| v.abs()).sum::<f32>() < ZERO_VECTOR_EPSILON
}

/// L2-normalize a vector, leaving zero vectors untouched
pub fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Validate an embedding batch against the declared dimension.
///
/// Rejects count mismatches, wrong vector lengths and effectively-zero
/// vectors; nothing failing this guard ever reaches the vector store.
pub fn guard_embeddings(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(Error::Embedding(format!(
            "Embedding count mismatch: expected {expected_count}, got {}",
            vectors.len()
        )));
    }
    for (index, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(Error::Embedding(format!(
                "Embedding dimension mismatch at {index}: expected {dimension}, got {}",
                vector.len()
            )));
        }
        if is_effectively_zero(vector) {
            return Err(Error::Embedding(format!(
                "Embedding at {index} is effectively zero"
            )));
        }
    }
    Ok(())
}

/// Helper to embed in batches
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let batch: Vec<String> = chunk.to_vec();
        let embeddings = embedder.embed(batch).await?;
        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}
