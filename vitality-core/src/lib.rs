//! vitality-core - Document ingestion and grounded answering for health records
//!
//! Provides the pieces that turn uploaded documents into answers:
//! - Text extraction (PDF, plain text, markdown)
//! - Boundary-aware chunking
//! - Embedding and language-model provider abstraction (Ollama, OpenAI-compatible)
//! - Vector indexes (in-memory, LanceDB, Qdrant) with per-user filtering
//! - Retrieval, prompt assembly and answer generation
//!
//! ## Primary API
//!
//! [`IngestionPipeline::ingest_document`] indexes an uploaded document and
//! [`ChatManager::answer`] answers a user's question from their own data.

// Public modules
pub mod chat;
pub mod chunk;
pub mod config;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod provider;
pub mod rag;

// Public exports
pub use chat::{ChatAnswer, ChatError, ChatManager, HealthSummarySource};
pub use chunk::Chunker;
pub use config::{Config, StorageMode};
pub use extract::{DocumentFormat, ExtractError, ExtractionStats, TextExtractor};
pub use ingest::{
    Document, DocumentStatus, DocumentStore, IngestError, IngestOutcome, IngestionPipeline,
    MemoryDocumentStore,
};
pub use models::{KnownModel, ModelRole};
pub use rag::{
    create_vector_index, Embedder, IndexError, MetadataFilter, RetrievalResult, RetrievedContext,
    Retriever, VectorIndex, VectorRecord,
};

// Provider exports
pub use provider::{
    create_embedding_provider, create_language_model, EmbeddingProvider, GenerateRequest,
    Generation, LanguageModel, Message, ProviderError,
};
