//! Document ingestion: bytes in, searchable chunks out.
//!
//! # Pipeline
//!
//! ```text
//! DocumentStore ─► TextExtractor ─► Chunker ─► Embedder (bounded fan-out) ─► VectorIndex
//! ```
//!
//! Each run for a document id holds that id's lock from start to finish,
//! so two runs for the same document never interleave while different
//! documents proceed in parallel. A document's chunks are written in one
//! batch and only when every chunk was embedded. A document is either fully
//! searchable or not searchable at all.

mod document;
mod lock;
mod retry;

pub use document::{Document, DocumentStatus, DocumentStore, MemoryDocumentStore, StoreError, MAX_ATTEMPTS};
pub use lock::{KeyedGuard, KeyedLocks};
pub use retry::RetryPolicy;

use crate::chunk::Chunker;
use crate::config::IngestConfig;
use crate::extract::{DocumentFormat, ExtractError, ExtractionStats, TextExtractor};
use crate::rag::{keys, DocumentChunk, Embedder, EmbedderError, IndexError, MetadataFilter, VectorIndex, VectorRecord};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, field, info, info_span, warn, Instrument, Span};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Document contains no extractable text")]
    EmptyDocument,

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("Embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{failed} of {} chunks failed to embed", .embedded + .failed)]
    PartialIngestion { embedded: usize, failed: usize },

    #[error("Vector store error: {0}")]
    Index(#[from] IndexError),

    #[error("Ingestion cancelled")]
    Cancelled,

    #[error("Document already failed {attempts} times")]
    RetryLimit { attempts: u32 },

    #[error("Extraction task failed: {0}")]
    Task(#[from] JoinError),
}

impl IngestError {
    /// Text stored on the document record. Never carries provider output.
    pub fn user_message(&self) -> String {
        match self {
            IngestError::Store(StoreError::NotFound(_)) => "document not found".to_string(),
            IngestError::Store(StoreError::Backend(_)) => {
                "document storage is unavailable, please try again later".to_string()
            }
            IngestError::TooLarge { limit, .. } => {
                format!("file is too large (limit is {} bytes)", limit)
            }
            IngestError::Extract(e) => e.user_message(),
            IngestError::EmptyDocument => "no extractable text".to_string(),
            IngestError::Embedding(_) => {
                "the embedding service is unavailable, please try again later".to_string()
            }
            IngestError::DimensionMismatch { .. } => {
                "the embedding model does not match the document index".to_string()
            }
            IngestError::PartialIngestion { embedded, failed } => format!(
                "only {} of {} sections could be processed",
                embedded,
                embedded + failed
            ),
            IngestError::Index(_) => {
                "the document index is unavailable, please try again later".to_string()
            }
            IngestError::Cancelled => "processing was cancelled".to_string(),
            IngestError::RetryLimit { .. } => "processing failed too many times".to_string(),
            IngestError::Task(_) => "internal processing error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Indexed { chunks: usize, stats: ExtractionStats },
    /// The document was already completed; nothing was done.
    AlreadyIndexed { chunks: usize },
}

impl IngestOutcome {
    pub fn chunks(&self) -> usize {
        match self {
            IngestOutcome::Indexed { chunks, .. } | IngestOutcome::AlreadyIndexed { chunks } => *chunks,
        }
    }
}

pub struct IngestionPipeline {
    documents: Arc<dyn DocumentStore>,
    extractor: TextExtractor,
    chunker: Chunker,
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    locks: KeyedLocks,
    retry: RetryPolicy,
    embed_concurrency: usize,
    max_file_size: usize,
}

impl IngestionPipeline {
    /// Fails when the embedder and index disagree on dimensionality.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunker: Chunker,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        if embedder.dimensions() != index.dimensions() {
            return Err(IngestError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }
        let defaults = IngestConfig::default();
        Ok(Self {
            documents,
            extractor: TextExtractor::new(),
            chunker,
            embedder,
            index,
            locks: KeyedLocks::new(),
            retry: RetryPolicy::from_config(&defaults),
            embed_concurrency: defaults.embed_concurrency,
            max_file_size: defaults.max_file_size,
        })
    }

    pub fn with_config(mut self, config: &IngestConfig) -> Self {
        self.retry = RetryPolicy::from_config(config);
        self.embed_concurrency = config.embed_concurrency.max(1);
        self.max_file_size = config.max_file_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, embed_concurrency: usize) -> Self {
        self.embed_concurrency = embed_concurrency.max(1);
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Extracts, chunks, embeds and indexes one document, recording the
    /// outcome on the document record.
    ///
    /// Completed documents are skipped. A failed document is retried only
    /// while [`Document::can_retry`] allows it. Cancelling `cancel` stops new
    /// embedding requests; requests already sent finish on their own and
    /// nothing is written to the index.
    pub async fn ingest_document(&self, document_id: &str, cancel: &CancellationToken) -> Result<IngestOutcome> {
        let span = info_span!("ingest_document", document_id, user_id = field::Empty);
        self.ingest_locked(document_id, cancel).instrument(span).await
    }

    async fn ingest_locked(&self, document_id: &str, cancel: &CancellationToken) -> Result<IngestOutcome> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            guard = self.locks.lock(document_id) => guard,
        };

        let mut document = self.documents.get(document_id).await?;
        Span::current().record("user_id", document.owner_id.as_str());

        match document.status {
            DocumentStatus::Completed => {
                info!(chunks = document.chunk_count, "Document already indexed, skipping");
                return Ok(IngestOutcome::AlreadyIndexed {
                    chunks: document.chunk_count,
                });
            }
            DocumentStatus::Failed if !document.can_retry() => {
                return Err(IngestError::RetryLimit {
                    attempts: document.processing_attempts,
                });
            }
            _ => {}
        }

        document.mark_processing();
        self.documents.save(&document).await?;
        info!(attempt = document.processing_attempts, format = %document.format, "Processing document");

        match self.run(&document, cancel).await {
            Ok((chunks, stats)) => {
                document.mark_completed(chunks);
                self.documents.save(&document).await?;
                info!(chunks, "Document indexed");
                Ok(IngestOutcome::Indexed { chunks, stats })
            }
            Err(e) => {
                warn!(error = %e, "Ingestion failed");
                document.mark_failed(e.user_message());
                if let Err(save_err) = self.documents.save(&document).await {
                    error!(error = %save_err, "Failed to record ingestion failure");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, document: &Document, cancel: &CancellationToken) -> Result<(usize, ExtractionStats)> {
        let bytes = self.documents.fetch_bytes(&document.id).await?;
        if bytes.len() > self.max_file_size {
            return Err(IngestError::TooLarge {
                size: bytes.len(),
                limit: self.max_file_size,
            });
        }
        let format: DocumentFormat = document.format.parse()?;

        let extractor = self.extractor;
        let (text, stats) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            extracted = tokio::task::spawn_blocking(move || extractor.extract_with_stats(&bytes, format)) => extracted??,
        };
        info!(
            characters = stats.character_count,
            words = stats.word_count,
            pages = stats.page_count,
            "Extracted text"
        );

        let texts = self.chunker.chunk(&text);
        if texts.is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        info!(chunks = texts.len(), "Chunked document");

        let vectors = self.embed_all(&texts, cancel).await?;

        let metadata = chunk_metadata(document, format);
        let records: Vec<VectorRecord> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .filter_map(|(index, (content, values))| {
                let mut chunk = DocumentChunk::new(&document.id, &document.owner_id, index, content);
                chunk.metadata = metadata.clone();
                chunk.embedding = Some(values);
                chunk.to_record()
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let count = records.len();
        self.replace_document_vectors(document, records, cancel).await?;
        info!(count, dimension = self.embedder.dimensions(), "Upserted chunks");

        Ok((count, stats))
    }

    /// Embeds every chunk with at most `embed_concurrency` requests in
    /// flight. Returns vectors in chunk order, or an error if any chunk
    /// could not be embedded.
    async fn embed_all(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let stop = cancel.child_token();
        let stop_ref = &stop;
        let embedder = &self.embedder;
        let retry = &self.retry;

        let results: Vec<(usize, std::result::Result<Vec<f32>, EmbedderError>)> =
            stream::iter(texts.iter().enumerate())
                .take_while(|_| futures::future::ready(!stop_ref.is_cancelled()))
                .map(move |(index, text)| async move {
                    let result = retry
                        .run(stop_ref, EmbedderError::is_retryable, || embedder.embed(text))
                        .await;
                    if let Err(EmbedderError::DimensionMismatch { .. }) = &result {
                        // no point embedding the rest with a misconfigured model
                        stop_ref.cancel();
                    }
                    (index, result)
                })
                .buffer_unordered(self.embed_concurrency)
                .collect()
                .await;

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut errors = Vec::new();
        for (index, result) in results {
            match result {
                Ok(values) => vectors[index] = Some(values),
                Err(EmbedderError::DimensionMismatch { expected, actual }) => {
                    return Err(IngestError::DimensionMismatch { expected, actual });
                }
                Err(e) => {
                    warn!(chunk = index, error = %e, "Failed to embed chunk");
                    errors.push(e);
                }
            }
        }

        let embedded = vectors.iter().filter(|v| v.is_some()).count();
        let failed = texts.len() - embedded;
        if failed > 0 {
            return match errors.into_iter().next() {
                Some(e) if embedded == 0 => Err(IngestError::Embedding(e)),
                _ => Err(IngestError::PartialIngestion { embedded, failed }),
            };
        }
        Ok(vectors.into_iter().flatten().collect())
    }

    /// Drops the document's previous vectors, then writes the new batch.
    async fn replace_document_vectors(
        &self,
        document: &Document,
        records: Vec<VectorRecord>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let filter = MetadataFilter::for_owner(&document.owner_id).with_document(&document.id);
        self.retry
            .run(cancel, is_transient, || self.index.delete_by_filter(&filter))
            .await?;

        let upserted = self
            .retry
            .run(cancel, is_transient, || self.index.upsert(records.clone()))
            .await;
        if let Err(e) = upserted {
            // a failed batch may have been partially applied
            if let Err(cleanup) = self.index.delete_by_filter(&filter).await {
                error!(error = %cleanup, "Failed to clean up after upsert error");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Removes every vector of one document.
    pub async fn remove_document(&self, user_id: &str, document_id: &str) -> Result<()> {
        let _guard = self.locks.lock(document_id).await;
        let filter = MetadataFilter::for_owner(user_id).with_document(document_id);
        self.index.delete_by_filter(&filter).await?;
        info!(user_id, document_id, "Removed document vectors");
        Ok(())
    }

    /// Removes every vector owned by `user_id`.
    pub async fn remove_user(&self, user_id: &str) -> Result<()> {
        self.index
            .delete_by_filter(&MetadataFilter::for_owner(user_id))
            .await?;
        info!(user_id, "Removed all user vectors");
        Ok(())
    }
}

fn is_transient(e: &IndexError) -> bool {
    matches!(e, IndexError::Backend(_))
}

fn chunk_metadata(document: &Document, format: DocumentFormat) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert(keys::SOURCE.to_string(), document.file_name.clone());
    metadata.insert(keys::DOCUMENT_TITLE.to_string(), document.display_title().to_string());
    metadata.insert(keys::DOCUMENT_FILE_TYPE.to_string(), format.as_str().to_string());
    if let Some(category) = &document.category {
        metadata.insert(keys::DOCUMENT_CATEGORY.to_string(), category.clone());
    }
    if let Some(uploaded_at) = &document.uploaded_at {
        metadata.insert(keys::UPLOAD_TIME.to_string(), uploaded_at.clone());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EmbeddingProvider, ProviderError};
    use crate::rag::MemoryVectorIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIMS: usize = 4;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailFirst(u16),
        FailAll,
        WrongWidthFirst,
    }

    struct MockEmbedder {
        delay: Duration,
        behaviour: Behaviour,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockEmbedder {
        fn new(behaviour: Behaviour, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                behaviour,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        fn model_name(&self) -> &str {
            "mock"
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        async fn embed(&self, text: &str) -> crate::provider::Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.behaviour {
                Behaviour::FailFirst(status) if call == 0 => Err(ProviderError::Api {
                    status,
                    body: "upstream said no".to_string(),
                }),
                Behaviour::FailAll => Err(ProviderError::Api {
                    status: 400,
                    body: "bad request".to_string(),
                }),
                Behaviour::WrongWidthFirst if call == 0 => Ok(vec![1.0; DIMS + 1]),
                _ => {
                    let mut values = vec![1.0; DIMS];
                    values[0] = text.len() as f32;
                    Ok(values)
                }
            }
        }
    }

    struct Harness {
        pipeline: IngestionPipeline,
        store: Arc<MemoryDocumentStore>,
        index: Arc<MemoryVectorIndex>,
        embedder: Arc<MockEmbedder>,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {} describes a routine blood panel.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn chunker() -> Chunker {
        Chunker::new(100, 10).unwrap()
    }

    async fn harness(embedder: Arc<MockEmbedder>, document: Document, bytes: &[u8]) -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert(document, bytes.to_vec()).await;
        let index = Arc::new(MemoryVectorIndex::new(DIMS));
        let pipeline = IngestionPipeline::new(
            store.clone(),
            chunker(),
            Embedder::new(embedder.clone(), DIMS).unwrap(),
            index.clone(),
        )
        .unwrap()
        .with_retry(fast_retry());
        Harness {
            pipeline,
            store,
            index,
            embedder,
        }
    }

    fn text_document() -> Document {
        Document::new("d1", "u1", "notes.txt", "txt")
            .with_category("lab_results")
            .with_uploaded_at("2024-03-01T10:00:00Z")
    }

    async fn document_count(index: &MemoryVectorIndex, user: &str, document: &str) -> usize {
        index
            .count(&MetadataFilter::for_owner(user).with_document(document))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_text_document() {
        let text = sentences(8);
        let expected = chunker().chunk(&text).len();
        assert!(expected > 2);

        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), text_document(), text.as_bytes()).await;
        let outcome = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.chunks(), expected);

        let doc = h.store.get("d1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.chunk_count, expected);
        assert_eq!(doc.processing_attempts, 1);
        assert_eq!(document_count(&h.index, "u1", "d1").await, expected);

        let results = h
            .index
            .query(&[1.0; DIMS], 100, &MetadataFilter::for_owner("u1"))
            .await
            .unwrap();
        let first = &results[0];
        assert_eq!(first.metadata[keys::SOURCE], "notes.txt");
        assert_eq!(first.metadata[keys::DOCUMENT_TITLE], "notes.txt");
        assert_eq!(first.metadata[keys::DOCUMENT_CATEGORY], "lab_results");
        assert_eq!(first.metadata[keys::DOCUMENT_FILE_TYPE], "txt");
        assert_eq!(first.metadata[keys::UPLOAD_TIME], "2024-03-01T10:00:00Z");
        assert_eq!(first.metadata[keys::CONTENT_TYPE], keys::DOCUMENT_CHUNK);
    }

    #[tokio::test]
    async fn test_embedding_concurrency_is_bounded() {
        let text = sentences(20);
        let embedder = MockEmbedder::new(Behaviour::Succeed, Duration::from_millis(20));
        let mut h = harness(embedder, text_document(), text.as_bytes()).await;
        h.pipeline = h.pipeline.with_concurrency(2);

        h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap();
        assert!(h.embedder.calls() > 2);
        assert_eq!(h.embedder.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_document_is_ingested_once() {
        let text = sentences(6);
        let expected = chunker().chunk(&text).len();
        let embedder = MockEmbedder::new(Behaviour::Succeed, Duration::from_millis(5));
        let h = harness(embedder, text_document(), text.as_bytes()).await;

        let cancel = CancellationToken::new();
        let (first, second) = tokio::join!(
            h.pipeline.ingest_document("d1", &cancel),
            h.pipeline.ingest_document("d1", &cancel)
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, IngestOutcome::AlreadyIndexed { .. }));

        assert!(matches!(outcomes[0], IngestOutcome::Indexed { .. }));
        assert_eq!(outcomes[1], IngestOutcome::AlreadyIndexed { chunks: expected });
        assert_eq!(h.embedder.calls(), expected);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), text_document(), b"hello").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h.pipeline.ingest_document("d1", &cancel).await.unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert_eq!(h.store.get("d1").await.unwrap().status, DocumentStatus::Pending);
        assert_eq!(h.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_embeddings() {
        let text = sentences(20);
        let total = chunker().chunk(&text).len();
        let embedder = MockEmbedder::new(Behaviour::Succeed, Duration::from_millis(30));
        let mut h = harness(embedder, text_document(), text.as_bytes()).await;
        h.pipeline = h.pipeline.with_concurrency(1);

        let cancel = CancellationToken::new();
        let (result, _) = tokio::join!(h.pipeline.ingest_document("d1", &cancel), async {
            tokio::time::sleep(Duration::from_millis(45)).await;
            cancel.cancel();
        });

        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert!(h.embedder.calls() < total);
        assert_eq!(document_count(&h.index, "u1", "d1").await, 0);

        let doc = h.store.get("d1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.error.as_deref(), Some("processing was cancelled"));
    }

    #[tokio::test]
    async fn test_partial_failure_writes_nothing() {
        let text = sentences(6);
        let total = chunker().chunk(&text).len();
        let embedder = MockEmbedder::new(Behaviour::FailFirst(400), Duration::ZERO);
        let h = harness(embedder, text_document(), text.as_bytes()).await;

        let err = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        match err {
            IngestError::PartialIngestion { embedded, failed } => {
                assert_eq!(failed, 1);
                assert_eq!(embedded, total - 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(document_count(&h.index, "u1", "d1").await, 0);

        let doc = h.store.get("d1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.chunk_count, 0);
        assert!(doc.can_retry());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let text = sentences(6);
        let total = chunker().chunk(&text).len();
        let embedder = MockEmbedder::new(Behaviour::FailFirst(503), Duration::ZERO);
        let h = harness(embedder, text_document(), text.as_bytes()).await;

        let outcome = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.chunks(), total);
        assert_eq!(h.embedder.calls(), total + 1);
    }

    #[tokio::test]
    async fn test_all_chunks_failing_is_embedding_error() {
        let h = harness(MockEmbedder::new(Behaviour::FailAll, Duration::ZERO), text_document(), b"one line").await;
        let err = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));

        // provider bodies never reach the document record
        let doc = h.store.get("d1").await.unwrap();
        let message = doc.error.unwrap();
        assert!(!message.contains("bad request"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let text = sentences(10);
        let embedder = MockEmbedder::new(Behaviour::WrongWidthFirst, Duration::ZERO);
        let mut h = harness(embedder, text_document(), text.as_bytes()).await;
        h.pipeline = h.pipeline.with_concurrency(1);

        let err = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::DimensionMismatch { expected: DIMS, actual } if actual == DIMS + 1
        ));
        assert_eq!(h.embedder.calls(), 1);
        assert_eq!(h.index.count(&MetadataFilter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_format_fails_document() {
        let document = Document::new("d1", "u1", "scan.docx", "docx");
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), document, b"PK..").await;

        let err = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::Extract(ExtractError::UnsupportedFormat(_))));
        assert_eq!(
            h.store.get("d1").await.unwrap().error.as_deref(),
            Some("unsupported file type 'docx'")
        );
        assert_eq!(h.embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_document() {
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), text_document(), b"  \n\n \r\n").await;
        let err = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyDocument));
        assert_eq!(h.store.get("d1").await.unwrap().error.as_deref(), Some("no extractable text"));
    }

    #[tokio::test]
    async fn test_file_size_limit() {
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), text_document(), &[b'a'; 64]).await;
        let config = IngestConfig {
            max_file_size: 16,
            ..IngestConfig::default()
        };
        let pipeline = h.pipeline.with_config(&config);

        let err = pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { size: 64, limit: 16 }));
    }

    #[tokio::test]
    async fn test_failed_document_respects_retry_limit() {
        let mut document = text_document();
        for _ in 0..MAX_ATTEMPTS {
            document.mark_processing();
            document.mark_failed("boom");
        }
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), document, b"text").await;

        let err = h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IngestError::RetryLimit { attempts: MAX_ATTEMPTS }));
    }

    #[tokio::test]
    async fn test_reingest_replaces_old_chunks() {
        let long = sentences(8);
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), text_document(), long.as_bytes()).await;
        h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap();
        assert!(document_count(&h.index, "u1", "d1").await > 1);

        // a fresh upload under the same id
        h.store.insert(text_document(), b"A single short note.".to_vec()).await;
        h.pipeline.ingest_document("d1", &CancellationToken::new()).await.unwrap();
        assert_eq!(document_count(&h.index, "u1", "d1").await, 1);
    }

    #[tokio::test]
    async fn test_remove_document_and_user() {
        let h = harness(MockEmbedder::new(Behaviour::Succeed, Duration::ZERO), text_document(), sentences(4).as_bytes()).await;
        h.store
            .insert(Document::new("d2", "u1", "other.md", "markdown"), b"# Sleep\nEight hours.".to_vec())
            .await;
        h.store
            .insert(Document::new("d3", "u2", "theirs.txt", "txt"), b"Glucose 95.".to_vec())
            .await;
        let cancel = CancellationToken::new();
        for id in ["d1", "d2", "d3"] {
            h.pipeline.ingest_document(id, &cancel).await.unwrap();
        }

        h.pipeline.remove_document("u1", "d1").await.unwrap();
        assert_eq!(document_count(&h.index, "u1", "d1").await, 0);
        assert_eq!(document_count(&h.index, "u1", "d2").await, 1);

        h.pipeline.remove_user("u1").await.unwrap();
        assert_eq!(h.index.count(&MetadataFilter::for_owner("u1")).await.unwrap(), 0);
        assert_eq!(h.index.count(&MetadataFilter::for_owner("u2")).await.unwrap(), 1);
    }

    #[test]
    fn test_user_messages_hide_details() {
        let err = IngestError::Index(IndexError::Backend(anyhow::anyhow!("connection refused at 10.0.0.3")));
        assert!(!err.user_message().contains("10.0.0.3"));
        assert_eq!(
            IngestError::PartialIngestion { embedded: 3, failed: 1 }.user_message(),
            "only 3 of 4 sections could be processed"
        );
    }
}
