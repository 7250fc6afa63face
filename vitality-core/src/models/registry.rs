/// What a known model is used for, with the one size that matters for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Produces vectors of exactly `dimensions` components.
    Embedding { dimensions: usize },
    /// Answers questions within a `context_tokens` window.
    Chat { context_tokens: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownModel {
    pub id: &'static str,
    pub role: ModelRole,
    pub description: &'static str,
}

impl KnownModel {
    pub fn dimensions(&self) -> Option<usize> {
        match self.role {
            ModelRole::Embedding { dimensions } => Some(dimensions),
            ModelRole::Chat { .. } => None,
        }
    }

    pub fn is_embedding(&self) -> bool {
        matches!(self.role, ModelRole::Embedding { .. })
    }
}

const fn embedding(id: &'static str, dimensions: usize, description: &'static str) -> KnownModel {
    KnownModel {
        id,
        role: ModelRole::Embedding { dimensions },
        description,
    }
}

const fn chat(id: &'static str, context_tokens: usize, description: &'static str) -> KnownModel {
    KnownModel {
        id,
        role: ModelRole::Chat { context_tokens },
        description,
    }
}

const KNOWN_MODELS: &[KnownModel] = &[
    embedding("text-embedding-ada-002", 1536, "Legacy OpenAI embedding model"),
    embedding("text-embedding-3-small", 1536, "Cheaper OpenAI embedding model"),
    embedding("text-embedding-3-large", 3072, "Highest quality OpenAI embedding model"),
    embedding("nomic-embed-text", 768, "Local general purpose embeddings served by Ollama"),
    embedding("mxbai-embed-large", 1024, "Local high quality embeddings served by Ollama"),
    embedding("all-minilm", 384, "Small local embeddings served by Ollama"),
    chat("sonar", 127_072, "Perplexity Sonar, search-grounded"),
    chat("sonar-pro", 200_000, "Larger Sonar model"),
    chat("gpt-4o-mini", 128_000, "Small OpenAI chat model"),
    chat("llama3.2", 131_072, "Local chat model served by Ollama"),
];

pub fn known_models() -> &'static [KnownModel] {
    KNOWN_MODELS
}

/// Finds a model by name. Ollama tags (`nomic-embed-text:latest`) and
/// letter case are ignored.
pub fn lookup(name: &str) -> Option<&'static KnownModel> {
    let name = name.trim();
    let base = name.split_once(':').map_or(name, |(base, _tag)| base);
    KNOWN_MODELS.iter().find(|m| m.id.eq_ignore_ascii_case(base))
}

/// Vector width of a known embedding model. `None` for unknown names and
/// for chat models.
pub fn embedding_dimensions(name: &str) -> Option<usize> {
    lookup(name).and_then(KnownModel::dimensions)
}
