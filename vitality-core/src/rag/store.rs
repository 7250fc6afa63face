//! Vector index abstraction and factory.
//!
//! This module provides a unified interface over the vector database
//! backends plus the batch validation every backend runs before writing.

use super::lancedb_store::LanceDbIndex;
use super::memory_store::MemoryVectorIndex;
use super::qdrant_store::QdrantIndex;
use super::types::{MetadataFilter, RetrievalResult, VectorRecord};
use crate::config::{StorageConfig, StorageMode};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Upsert batch is empty")]
    EmptyBatch,

    #[error("Vector '{id}' has no components")]
    EmptyVector { id: String },

    #[error("Dimension mismatch for '{id}': index expects {expected}, got {actual}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Refusing to delete with an empty filter")]
    EmptyFilter,

    #[error("Vector store error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Unified interface for vector database operations.
///
/// Implementations connect to their backend lazily on first use and reuse
/// that connection for every later call. They are shared behind an `Arc`
/// and must be safe to call concurrently.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimensionality every stored and queried vector must have.
    fn dimensions(&self) -> usize;

    /// Inserts or replaces records by id.
    ///
    /// The whole batch is validated before anything is written: an empty
    /// batch, an empty vector, or a vector of the wrong width fails the
    /// call without touching the index. Backend failures after validation
    /// may leave a partial write; callers re-upsert on error.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Returns at most `top_k` records matching `filter`, most similar first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>>;

    /// Removes every record matching `filter`. An empty filter is rejected.
    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<()>;

    /// Number of records matching `filter`.
    async fn count(&self, filter: &MetadataFilter) -> Result<usize>;
}

/// Checks an upsert batch against the index dimensionality.
pub(crate) fn validate_batch(records: &[VectorRecord], dimensions: usize) -> Result<()> {
    if records.is_empty() {
        return Err(IndexError::EmptyBatch);
    }
    for record in records {
        validate_vector(&record.id, &record.values, dimensions)?;
    }
    Ok(())
}

pub(crate) fn validate_vector(id: &str, values: &[f32], dimensions: usize) -> Result<()> {
    if values.is_empty() {
        return Err(IndexError::EmptyVector { id: id.to_string() });
    }
    if values.len() != dimensions {
        return Err(IndexError::DimensionMismatch {
            id: id.to_string(),
            expected: dimensions,
            actual: values.len(),
        });
    }
    Ok(())
}

/// Creates a vector index for the configured storage mode.
///
/// - `Memory` keeps vectors in process, for tests and one-off runs
/// - `Embedded` mode uses LanceDB for zero-setup, on-disk storage
/// - `Grpc` mode uses Qdrant for remote server connectivity
///
/// No connection is made here; backends connect on first use.
pub fn create_vector_index(storage_config: &StorageConfig, dimensions: usize) -> Arc<dyn VectorIndex> {
    match &storage_config.storage_mode {
        StorageMode::Memory => Arc::new(MemoryVectorIndex::new(dimensions)),
        StorageMode::Embedded { path } => Arc::new(LanceDbIndex::new(
            path.clone(),
            storage_config.collection_name.clone(),
            dimensions,
        )),
        StorageMode::Grpc { url } => Arc::new(QdrantIndex::new(
            url.clone(),
            storage_config.collection_name.clone(),
            dimensions,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_rejects_mixed_dimensions() {
        let batch = vec![
            VectorRecord::new("a#0", "x", vec![1.0, 0.0, 0.0]),
            VectorRecord::new("a#1", "y", vec![1.0, 0.0]),
        ];
        assert!(matches!(
            validate_batch(&batch, 3),
            Err(IndexError::DimensionMismatch { ref id, expected: 3, actual: 2 }) if id == "a#1"
        ));
    }

    #[test]
    fn test_validate_batch_rejects_empty() {
        assert!(matches!(validate_batch(&[], 3), Err(IndexError::EmptyBatch)));
        let batch = vec![VectorRecord::new("a#0", "x", vec![])];
        assert!(matches!(validate_batch(&batch, 3), Err(IndexError::EmptyVector { .. })));
    }

    #[test]
    fn test_factory_selects_backend_without_connecting() {
        let mut config = StorageConfig::default();
        config.storage_mode = StorageMode::Memory;
        assert_eq!(create_vector_index(&config, 8).dimensions(), 8);

        config.storage_mode = StorageMode::Grpc {
            url: "http://127.0.0.1:1".to_string(),
        };
        assert_eq!(create_vector_index(&config, 16).dimensions(), 16);
    }
}
