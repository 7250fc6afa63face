//! OpenAI-compatible HTTP providers.
//!
//! [`OpenAiEmbeddings`] calls `POST {base_url}/embeddings`.
//! [`OpenAiChat`] calls `POST {base_url}/chat/completions` and also serves
//! Perplexity Sonar, whose API follows the same wire format.

use super::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddings {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::MissingApiKey("openai embeddings"))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client: http_client(timeout_secs)?,
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self.http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Other("No embeddings returned".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
    model: String,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::MissingApiKey("chat completions"))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_client: http_client(timeout_secs)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self.http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed.into_generation()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

impl ChatCompletionResponse {
    fn into_generation(self) -> Result<Generation> {
        let tokens_used = self.usage.map(|u| u.total_tokens).unwrap_or(0);
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("No choices in completion response".to_string()))?;
        Ok(Generation {
            content: choice.message.content,
            tokens_used,
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_response_parsing() {
        let raw = r#"{
            "id": "abc",
            "model": "sonar",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Drink water."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 90, "completion_tokens": 4, "total_tokens": 94}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let generation = parsed.into_generation().unwrap();
        assert_eq!(generation.content, "Drink water.");
        assert_eq!(generation.tokens_used, 94);
        assert_eq!(generation.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_empty_choices_is_an_error() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.into_generation().is_err());
    }

    #[test]
    fn test_embedding_response_parsing() {
        let raw = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}],"model":"text-embedding-3-small"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.25]);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let err = OpenAiChat::new("https://api.perplexity.ai", None, "sonar", 30).unwrap_err();
        assert!(matches!(err, ProviderError::MissingApiKey(_)));
        let err = OpenAiEmbeddings::new("https://api.openai.com/v1", Some(String::new()), "m", 1536, 30)
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingApiKey(_)));
    }
}
