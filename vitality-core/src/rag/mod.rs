//! Retrieval Augmented Generation (RAG) system.
//!
//! # Overview
//!
//! Documents are indexed as chunks, each stored with its embedding and the
//! metadata that ties it to an owner and a document. At question time the
//! [`Retriever`] embeds the question, queries the index restricted to the
//! asking user's chunks, and assembles the best snippets into a context
//! string that never exceeds a byte budget.
//!
//! # Architecture
//!
//! - [`Embedder`]: provider wrapper that enforces the index dimensionality
//! - [`VectorIndex`]: storage trait with memory, LanceDB and Qdrant backends
//! - [`Retriever`]: query-time embedding, filtering and context assembly
//!
//! # Context format
//!
//! ```text
//! [1] <most relevant snippet>
//!
//! [2] <next snippet>
//! ```

mod embedder;
mod lancedb_store;
mod memory_store;
mod qdrant_store;
mod store;
mod types;

pub use embedder::{Embedder, EmbedderError};
pub use lancedb_store::LanceDbIndex;
pub use memory_store::{cosine_similarity, MemoryVectorIndex};
pub use qdrant_store::QdrantIndex;
pub use store::{create_vector_index, IndexError, VectorIndex};
pub use types::{chunk_id, keys, DocumentChunk, MetadataFilter, RetrievalResult, VectorRecord};

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("Failed to retrieve context: {0}")]
    Index(#[from] IndexError),

    #[error("Embedder produces {embedder} dimensions but the index stores {index}")]
    DimensionMismatch { embedder: usize, index: usize },
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Bounded document context for one question, with the results it cites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub context: String,
    /// Results that contributed text to `context`, most relevant first.
    pub sources: Vec<RetrievalResult>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// Query-time half of the pipeline.
///
/// Cheap to clone; the embedder and index are shared.
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    max_context_bytes: usize,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<dyn VectorIndex>, max_context_bytes: usize) -> Result<Self> {
        if embedder.dimensions() != index.dimensions() {
            return Err(RagError::DimensionMismatch {
                embedder: embedder.dimensions(),
                index: index.dimensions(),
            });
        }
        Ok(Self {
            embedder,
            index,
            max_context_bytes,
        })
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Retrieves context from all of `user_id`'s documents.
    pub async fn retrieve(&self, user_id: &str, question: &str, top_k: usize) -> Result<RetrievedContext> {
        self.retrieve_filtered(user_id, question, top_k, &MetadataFilter::new())
            .await
    }

    /// Retrieves context from `user_id`'s documents that also match `extra`.
    ///
    /// The owner condition always wins over an owner key in `extra`, so a
    /// caller-supplied filter can narrow but never widen what is visible.
    /// An owner with no matching vectors yields an empty context, not an error.
    pub async fn retrieve_filtered(
        &self,
        user_id: &str,
        question: &str,
        top_k: usize,
        extra: &MetadataFilter,
    ) -> Result<RetrievedContext> {
        let results = self.search(user_id, question, top_k, extra).await?;
        if results.is_empty() {
            debug!(user_id, "No results found, returning empty context");
            return Ok(RetrievedContext::default());
        }

        let found = results.len();
        let retrieved = assemble_context(results, self.max_context_bytes);
        info!(
            user_id,
            results = found,
            included = retrieved.sources.len(),
            context_bytes = retrieved.context.len(),
            "Assembled retrieval context"
        );
        Ok(retrieved)
    }

    /// Retrieves context from the listed documents of `user_id` only.
    /// An empty list yields an empty context.
    pub async fn retrieve_documents<S: AsRef<str>>(
        &self,
        user_id: &str,
        question: &str,
        top_k: usize,
        document_ids: &[S],
    ) -> Result<RetrievedContext> {
        let filter = MetadataFilter::new().with_documents(document_ids.iter().map(|id| id.as_ref()));
        self.retrieve_filtered(user_id, question, top_k, &filter).await
    }

    /// Best-scoring chunk per document, at most `top_k` documents.
    pub async fn search_documents(
        &self,
        user_id: &str,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let results = self
            .search(user_id, question, top_k.saturating_mul(3), &MetadataFilter::new())
            .await?;

        let mut seen = HashSet::new();
        Ok(results
            .into_iter()
            .filter(|r| seen.insert(r.document_id.clone()))
            .take(top_k)
            .collect())
    }

    async fn search(
        &self,
        user_id: &str,
        question: &str,
        top_k: usize,
        extra: &MetadataFilter,
    ) -> Result<Vec<RetrievalResult>> {
        let filter = extra.clone().merge(&MetadataFilter::for_owner(user_id));

        let count = self.index.count(&filter).await?;
        if count == 0 {
            debug!(user_id, "Owner has no indexed chunks");
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(question).await?;
        debug!(dimension = query_embedding.len(), "Query embedding generated");

        let results = self.index.query(&query_embedding, top_k, &filter).await?;
        Ok(results)
    }
}

/// Renders results as numbered snippets within `max_bytes`.
///
/// Results are taken in order and blank snippets are skipped. The first
/// one that does not fit whole is cut at a character boundary and ends the
/// context. `sources` holds exactly the results that contributed text, in
/// the order of their `[n]` labels.
pub fn assemble_context(results: Vec<RetrievalResult>, max_bytes: usize) -> RetrievedContext {
    let mut context = String::new();
    let mut sources = Vec::new();

    for result in results {
        let snippet = result.snippet.trim();
        if snippet.is_empty() {
            continue;
        }
        let header = format!("[{}] ", sources.len() + 1);
        let used = context.len() + header.len();
        if used >= max_bytes {
            break;
        }
        let remaining = max_bytes - used;

        if snippet.len() + 2 <= remaining {
            context.push_str(&header);
            context.push_str(snippet);
            context.push_str("\n\n");
            sources.push(result);
            continue;
        }

        let cut = truncate_to_char_boundary(snippet, remaining);
        if !cut.is_empty() {
            context.push_str(&header);
            context.push_str(cut);
            sources.push(result);
        }
        break;
    }

    RetrievedContext {
        context: context.trim_end().to_string(),
        sources,
    }
}

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a
/// character boundary.
fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
