//! In-memory vector index.
//!
//! Brute-force cosine similarity over every stored vector. Used by the
//! `memory` storage mode and throughout the test suite.

use super::store::{validate_batch, validate_vector, IndexError, Result, VectorIndex};
use super::types::{MetadataFilter, RetrievalResult, VectorRecord};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct MemoryVectorIndex {
    dimensions: usize,
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            records: RwLock::new(HashMap::new()),
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        validate_batch(&records, self.dimensions)?;

        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>> {
        validate_vector("query", vector, self.dimensions)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let stored = self.records.read().await;
        let mut results: Vec<RetrievalResult> = stored
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| RetrievalResult::from_record(r, cosine_similarity(vector, &r.values)))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete_by_filter(&self, filter: &MetadataFilter) -> Result<()> {
        if filter.is_empty() {
            return Err(IndexError::EmptyFilter);
        }
        self.records
            .write()
            .await
            .retain(|_, r| !filter.matches(&r.metadata));
        Ok(())
    }

    async fn count(&self, filter: &MetadataFilter) -> Result<usize> {
        let stored = self.records.read().await;
        Ok(stored.values().filter(|r| filter.matches(&r.metadata)).count())
    }
}
