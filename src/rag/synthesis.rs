//! Answer synthesis over retrieved context

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cli::config::SynthesisConfig;
use crate::errors::{RagError, Result, Stage};
use crate::http::{build_client, check_status};
use crate::rag::context::ContextBuilder;
use crate::retry::RetryManager;
use crate::types::QueryMatch;

/// Chat-completion capability
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion for a system and a user message
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    fn model(&self) -> &str;
}

/// `POST {base_url}/chat/completions`
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(api_key: impl Into<String>, config: &SynthesisConfig, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("chat API key must not be empty".to_string()));
        }
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Synthesize, e, self.timeout))?;

        let parsed: ChatResponse = check_status(Stage::Synthesize, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Synthesize, e, self.timeout))?;

        extract_content(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn extract_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RagError::SynthesisFailure("model returned no answer".to_string()))
}

/// Result of the answer step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Answer {
    Generated {
        text: String,
        model: String,
        /// Sources included in the prompt, in citation order
        sources: Vec<String>,
    },
    /// Retrieval found nothing to ground an answer on; no model call made
    InsufficientContext,
}

impl Answer {
    pub fn text(&self) -> Option<&str> {
        match self {
            Answer::Generated { text, .. } => Some(text),
            Answer::InsufficientContext => None,
        }
    }
}

/// Turns a question plus matches into an answer with one chat call
pub struct AnswerSynthesizer {
    chat: Arc<dyn ChatModel>,
    context: ContextBuilder,
    system_prompt: String,
    retry: RetryManager,
}

impl AnswerSynthesizer {
    pub fn new(chat: Arc<dyn ChatModel>, config: &SynthesisConfig, timeout: Duration) -> Self {
        Self {
            chat,
            context: ContextBuilder::new(config.max_context_chars),
            system_prompt: config.system_prompt.clone(),
            retry: RetryManager::single_attempt(timeout),
        }
    }

    pub async fn synthesize(&self, question: &str, matches: &[QueryMatch]) -> Result<Answer> {
        let context = self.context.build(matches);
        if context.is_empty() {
            debug!("no usable context, skipping synthesis");
            return Ok(Answer::InsufficientContext);
        }

        let prompt = self.context.augment_prompt(question, &context);
        let started = Instant::now();
        let chat = &self.chat;
        let system = self.system_prompt.as_str();

        let text = self
            .retry
            .execute_once(Stage::Synthesize, || chat.complete(system, &prompt))
            .await
            .map_err(|e| match e {
                RagError::Timeout { .. } | RagError::SynthesisFailure(_) => e,
                other => RagError::SynthesisFailure(other.to_string()),
            })?;

        debug!(
            model = %self.chat.model(),
            passages = context.document_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "synthesized answer"
        );

        Ok(Answer::Generated {
            text,
            model: self.chat.model().to_string(),
            sources: context.sources,
        })
    }
}
