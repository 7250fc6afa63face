//! Grounded question answering.
//!
//! # Flow
//!
//! ```text
//! question ─► Retriever (owner-filtered) ──┐
//!                                          ├─► prompt ─► LanguageModel ─► ChatAnswer
//! user id  ─► HealthSummarySource ─────────┘
//! ```
//!
//! Missing context never fails a question: an unavailable index or health
//! summary is logged and the prompt says no data was found. Only a failed
//! generation is an error, and it is not retried here.

use super::prompt::{build_user_prompt, SYSTEM_PREAMBLE};
use crate::config::Config;
use crate::provider::{GenerateRequest, LanguageModel, Message, ProviderError};
use crate::rag::{RetrievalResult, RetrievedContext, Retriever};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Generic reply shown when an answer could not be produced.
pub const GENERATION_FAILED_MESSAGE: &str = "I'm unable to generate a response right now. Please try again later.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Generation failed: {0}")]
    Generation(#[from] ProviderError),
}

impl ChatError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ChatError::EmptyQuestion => "Please enter a question.",
            ChatError::Generation(_) => GENERATION_FAILED_MESSAGE,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Supplies a pre-formatted summary of a user's latest health metrics.
#[async_trait]
pub trait HealthSummarySource: Send + Sync {
    async fn summary(&self, user_id: &str) -> anyhow::Result<String>;
}

/// A summary that is the same for every user.
pub struct FixedHealthSummary(pub String);

#[async_trait]
impl HealthSummarySource for FixedHealthSummary {
    async fn summary(&self, _user_id: &str) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatAnswer {
    pub answer: String,
    pub tokens_used: u32,
    /// Document chunks that were placed in the prompt, most relevant first.
    pub sources: Vec<RetrievalResult>,
}

/// Answers questions with the asking user's documents and health data.
#[derive(Clone)]
pub struct ChatManager {
    retriever: Retriever,
    llm: Arc<dyn LanguageModel>,
    health: Option<Arc<dyn HealthSummarySource>>,
    system_prompt: String,
    temperature: f64,
    max_tokens: u32,
    top_k: usize,
}

impl ChatManager {
    pub fn new(retriever: Retriever, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            retriever,
            llm,
            health: None,
            system_prompt: SYSTEM_PREAMBLE.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            top_k: 5,
        }
    }

    /// Takes prompt, sampling and retrieval settings from `config`.
    pub fn from_config(config: &Config, retriever: Retriever, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            top_k: config.rag.top_k,
            ..Self::new(retriever, llm)
        }
    }

    pub fn with_health_source(mut self, health: Arc<dyn HealthSummarySource>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answers `question` for `user_id` using their documents and health
    /// summary.
    pub async fn answer(&self, user_id: &str, question: &str) -> Result<ChatAnswer> {
        let summary = self.health_summary(user_id).await;
        self.answer_with_summary(user_id, question, &summary).await
    }

    /// Like [`answer`](Self::answer) with a summary the caller already has.
    pub async fn answer_with_summary(&self, user_id: &str, question: &str, health_summary: &str) -> Result<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let retrieved = match self.retriever.retrieve(user_id, question, self.top_k).await {
            Ok(retrieved) => retrieved,
            Err(e) => {
                warn!(user_id, error = %e, "Document retrieval failed, answering without documents");
                RetrievedContext::default()
            }
        };
        debug!(user_id, sources = retrieved.sources.len(), "Retrieved document context");

        let request = GenerateRequest::new(vec![
            Message::system(self.system_prompt.as_str()),
            Message::user(build_user_prompt(question, health_summary, &retrieved.context)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let generation = self.llm.generate(request).await.map_err(|e| {
            error!(user_id, model = self.llm.model_name(), error = %e, "Generation failed");
            ChatError::Generation(e)
        })?;

        info!(
            user_id,
            tokens = generation.tokens_used,
            sources = retrieved.sources.len(),
            "Answered question"
        );
        Ok(ChatAnswer {
            answer: generation.content,
            tokens_used: generation.tokens_used,
            sources: retrieved.sources,
        })
    }

    async fn health_summary(&self, user_id: &str) -> String {
        let Some(health) = &self.health else {
            return String::new();
        };
        match health.summary(user_id).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(user_id, error = %e, "Health summary unavailable");
                String::new()
            }
        }
    }
}
