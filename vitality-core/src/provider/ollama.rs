//! Ollama provider implementation.
//!
//! Talks to a local Ollama server over HTTP: `/api/embed` for embeddings
//! and a streamed `/api/chat` for generation.

use super::types::*;
use async_trait::async_trait;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Ollama embedding endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbeddings {
    base_url: String,
    http_client: reqwest::Client,
    model: String,
    dimensions: usize,
}

impl OllamaEmbeddings {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: http_client(timeout_secs)?,
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);

        let embed_request = OllamaEmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self.http_client
            .post(&url)
            .json(&embed_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let embed_response = response.json::<OllamaEmbedResponse>().await?;

        embed_response.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("No embeddings returned".to_string()))
    }
}

/// Ollama chat endpoint.
#[derive(Debug, Clone)]
pub struct OllamaChat {
    base_url: String,
    http_client: reqwest::Client,
    model: String,
}

impl OllamaChat {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: http_client(timeout_secs)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let url = format!("{}/api/chat", self.base_url);

        let mut options = HashMap::new();
        options.insert("temperature".to_string(), serde_json::json!(request.temperature));
        options.insert("num_predict".to_string(), serde_json::json!(request.max_tokens));

        let ollama_request = OllamaChatRequest {
            model: self.model.clone(),
            messages: request.messages,
            options: Some(options),
            stream: true,
        };

        let response = self.http_client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut accumulator = StreamAccumulator::default();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.drain(..=newline_pos).collect::<Vec<_>>();
                accumulator.push_line(&line[..line.len() - 1])?;
            }
        }
        if !buffer.is_empty() {
            accumulator.push_line(&buffer)?;
        }

        accumulator.finish()
    }
}

/// Folds streamed NDJSON chat chunks into one [`Generation`].
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tokens_used: u32,
    finish_reason: Option<String>,
    done: bool,
}

impl StreamAccumulator {
    fn push_line(&mut self, line: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let chunk: OllamaChatResponse = serde_json::from_str(line)?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::Other(error));
        }
        if let Some(message) = chunk.message {
            self.content.push_str(&message.content);
        }
        if chunk.done {
            self.done = true;
            self.tokens_used = chunk.prompt_eval_count.unwrap_or(0) + chunk.eval_count.unwrap_or(0);
            self.finish_reason = chunk.done_reason;
            debug!(tokens = self.tokens_used, "Ollama stream finished");
        }
        Ok(())
    }

    fn finish(self) -> Result<Generation> {
        if !self.done {
            return Err(ProviderError::Other("Ollama stream ended before completion".to_string()));
        }
        Ok(Generation {
            content: self.content,
            tokens_used: self.tokens_used,
            finish_reason: self.finish_reason,
        })
    }
}

// Ollama-specific request/response types (internal)

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<HashMap<String, serde_json::Value>>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaMessage {
    #[allow(dead_code)]
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}
