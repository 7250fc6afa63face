use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::models;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole ingestion and answering pipeline.
///
/// Loaded from YAML, then overridden from the environment, then validated
/// once at startup. Components receive the section they need by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// Language model vendor used for answer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    OpenAi,
    /// Perplexity Sonar, spoken to through the OpenAI-compatible client.
    Sonar,
}

/// Embedding vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Ollama,
    OpenAi,
}

/// Configuration for the answering model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Configuration for the embedding model.
///
/// `dimensions` may be omitted for models known to [`models::lookup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Chunking and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound, in bytes, of the document context handed to the model.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of embedding calls allowed in flight for one document.
    pub embed_concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_file_size: usize,
}

/// Vector database storage mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// In-process index, lost on exit
    Memory,
    /// Embedded storage - LanceDB on local disk
    Embedded { path: String },
    /// gRPC storage - connect to an external Qdrant server
    Grpc { url: String },
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Embedded {
            path: "./data/vitality_vectordb".to_string(),
        }
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_mode: StorageMode,
    /// Collection/table name for storing vectors
    pub collection_name: String,
    /// Dimensionality the index was created with. Defaults to the
    /// embedding model's dimensionality.
    #[serde(default)]
    pub dimensions: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_top_k() -> usize {
    5
}

fn default_max_context_bytes() -> usize {
    4000
}

fn default_system_prompt() -> String {
    crate::chat::prompt::SYSTEM_PREAMBLE.to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Ollama,
            model: "llama3.2".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            dimensions: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: default_top_k(),
            max_context_bytes: default_max_context_bytes(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            embed_concurrency: 4,
            max_retries: 3,
            retry_base_delay_ms: 500,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            collection_name: "health_documents".to_string(),
            dimensions: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            rag: RagConfig::default(),
            ingest: IngestConfig::default(),
            storage: StorageConfig::default(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("config.yaml").unwrap_or_default()
    }

    /// Applies overrides from process environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary lookup, so callers and tests do
    /// not have to mutate the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            if self.embedding.provider == EmbeddingProviderKind::OpenAi {
                self.embedding.api_key = Some(key.clone());
            }
            if self.llm.provider == LlmProviderKind::OpenAi {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(provider) = lookup("LLM_PROVIDER") {
            match provider.to_ascii_lowercase().as_str() {
                "ollama" => self.llm.provider = LlmProviderKind::Ollama,
                "openai" => self.llm.provider = LlmProviderKind::OpenAi,
                "sonar" => {
                    self.llm.provider = LlmProviderKind::Sonar;
                    self.llm.base_url = SONAR_BASE_URL.to_string();
                }
                other => tracing::warn!(provider = other, "Ignoring unknown LLM_PROVIDER"),
            }
        }
        if let Some(key) = lookup("SONAR_API_KEY") {
            if self.llm.provider == LlmProviderKind::Sonar {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            self.llm.model = model;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(size) = lookup("CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.rag.chunk_size = size;
        }
        if let Some(overlap) = lookup("CHUNK_OVERLAP").and_then(|v| v.parse().ok()) {
            self.rag.chunk_overlap = overlap;
        }
    }

    /// Dimensionality of the configured embedding model: explicit setting
    /// first, then the model catalogue.
    pub fn embedding_dimensions(&self) -> Option<usize> {
        self.embedding
            .dimensions
            .or_else(|| models::embedding_dimensions(&self.embedding.model))
    }

    /// Dimensionality of the vector index.
    pub fn index_dimensions(&self) -> Option<usize> {
        self.storage.dimensions.or_else(|| self.embedding_dimensions())
    }

    /// Checks invariants that must hold before any component starts.
    pub fn validate(&self) -> Result<()> {
        if self.rag.chunk_size == 0 {
            return Err(ConfigError::Invalid("rag.chunk_size must be positive".into()));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.rag.chunk_overlap, self.rag.chunk_size
            )));
        }
        if self.rag.top_k == 0 {
            return Err(ConfigError::Invalid("rag.top_k must be positive".into()));
        }
        if self.ingest.embed_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "ingest.embed_concurrency must be positive".into(),
            ));
        }

        let embedding_dim = self.embedding_dimensions().ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unknown dimensionality for embedding model '{}'; set embedding.dimensions",
                self.embedding.model
            ))
        })?;
        if let Some(index_dim) = self.storage.dimensions {
            if index_dim != embedding_dim {
                return Err(ConfigError::Invalid(format!(
                    "embedding model produces {} dimensions but the index expects {}",
                    embedding_dim, index_dim
                )));
            }
        }

        Ok(())
    }
}

/// Perplexity's OpenAI-compatible API root.
pub const SONAR_BASE_URL: &str = "https://api.perplexity.ai";
