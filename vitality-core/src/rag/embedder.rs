//! Embedding generation with dimension checking.
//!
//! Wraps an [`EmbeddingProvider`] and rejects any vector whose width
//! differs from the index's. Vectors are never truncated or padded.

use crate::provider::{EmbeddingProvider, ProviderError};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The provider API returned an error.
    #[error("Embedding provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The provider returned a vector of the wrong width.
    #[error("Embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbedderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedderError::Provider(e) => e.is_retryable(),
            EmbedderError::DimensionMismatch { .. } => false,
        }
    }
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Generates vector embeddings that are guaranteed to fit the index.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimensions: usize,
}

impl Embedder {
    /// Creates an embedder for an index of width `dimensions`.
    ///
    /// Fails immediately when the provider's declared width disagrees.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimensions: usize) -> Result<Self> {
        if provider.dimensions() != dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: dimensions,
                actual: provider.dimensions(),
            });
        }
        Ok(Self {
            provider,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Generates a vector embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The provider is unreachable or rejects the request
    /// - The returned vector's width differs from the index's
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.provider.embed(text).await?;
        if vector.len() != self.dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
