//! Common types for embedding and language-model providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when interacting with a provider.
///
/// Providers never retry on their own; callers consult
/// [`is_retryable`](Self::is_retryable) and apply their own backoff.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Network failures, rate limiting and server errors are transient.
    /// Malformed responses and client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Request(e) => !e.is_decode() && !e.is_builder(),
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Json(_) | ProviderError::MissingApiKey(_) | ProviderError::Other(_) => {
                false
            }
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::Api { status, body }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Turns text into a fixed-width vector.
///
/// One implementation per vendor, chosen from configuration at startup.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Width of every vector this provider returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Produces a single, complete answer for a conversation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: GenerateRequest) -> Result<Generation>;

    /// Issues the smallest possible generation to verify the backend is reachable.
    async fn health_check(&self) -> Result<()> {
        let request = GenerateRequest::new(vec![Message::user("ping")]).with_max_tokens(1);
        self.generate(request).await.map(|_| ())
    }
}

/// Request for a non-streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl GenerateRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A finished completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    /// Total tokens billed for the call, as reported by the provider.
    pub tokens_used: u32,
    pub finish_reason: Option<String>,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_retry_only_on_rate_limit_and_server_errors() {
        let api = |status| ProviderError::Api {
            status,
            body: String::new(),
        };
        assert!(api(429).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(401).is_retryable());
    }

    #[test]
    fn test_local_errors_are_not_retryable() {
        assert!(!ProviderError::MissingApiKey("openai").is_retryable());
        assert!(!ProviderError::Other("no embeddings".into()).is_retryable());
        let json = serde_json::from_str::<Generation>("{").unwrap_err();
        assert!(!ProviderError::Json(json).is_retryable());
    }

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new(vec![Message::system("s"), Message::user("u")])
            .with_temperature(0.2)
            .with_max_tokens(64);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, 64);
    }
}
