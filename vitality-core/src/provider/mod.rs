//! Embedding and language-model provider abstraction layer.
//!
//! Each capability is a trait ([`EmbeddingProvider`], [`LanguageModel`])
//! with one concrete client per vendor. The vendor is picked from
//! [`Config`] when the process starts.

mod types;
pub mod ollama;
pub mod openai;

// Re-export common types
pub use types::{
    EmbeddingProvider,
    GenerateRequest,
    Generation,
    LanguageModel,
    Message,
    ProviderError,
    Result,
};

// Re-export provider implementations
pub use ollama::{OllamaChat, OllamaEmbeddings};
pub use openai::{OpenAiChat, OpenAiEmbeddings};

use crate::config::{Config, EmbeddingProviderKind, LlmProviderKind, SONAR_BASE_URL};
use std::sync::Arc;

/// Builds the embedding client named by `config.embedding`.
pub fn create_embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let embedding = &config.embedding;
    let dimensions = config.embedding_dimensions().ok_or_else(|| {
        ProviderError::Other(format!(
            "unknown dimensionality for embedding model '{}'",
            embedding.model
        ))
    })?;

    match embedding.provider {
        EmbeddingProviderKind::Ollama => Ok(Arc::new(OllamaEmbeddings::new(
            &embedding.base_url,
            &embedding.model,
            dimensions,
            embedding.timeout_secs,
        )?)),
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbeddings::new(
            &embedding.base_url,
            embedding.api_key.clone(),
            &embedding.model,
            dimensions,
            embedding.timeout_secs,
        )?)),
    }
}

/// Builds the answering model named by `config.llm`.
pub fn create_language_model(config: &Config) -> Result<Arc<dyn LanguageModel>> {
    let llm = &config.llm;
    match llm.provider {
        LlmProviderKind::Ollama => Ok(Arc::new(OllamaChat::new(
            &llm.base_url,
            &llm.model,
            llm.timeout_secs,
        )?)),
        LlmProviderKind::OpenAi => Ok(Arc::new(OpenAiChat::new(
            &llm.base_url,
            llm.api_key.clone(),
            &llm.model,
            llm.timeout_secs,
        )?)),
        LlmProviderKind::Sonar => {
            let base_url = if llm.base_url.is_empty() {
                SONAR_BASE_URL
            } else {
                llm.base_url.as_str()
            };
            Ok(Arc::new(OpenAiChat::new(
                base_url,
                llm.api_key.clone(),
                &llm.model,
                llm.timeout_secs,
            )?))
        }
    }
}
