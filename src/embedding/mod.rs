//! Text embedding providers
//!
//! Both the ingest path and the query path embed through the same
//! [`Embedder`], so a document and a question about it land in the same
//! vector space.

pub mod hashing;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use crate::cli::config::{Config, Credentials, EmbeddingProvider};
use crate::errors::{RagError, Result};
use crate::types::EmbeddingVector;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one piece of text
    ///
    /// Returns `EmbeddingFailure` for blank or oversized input and for
    /// vectors of the wrong length.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Model identifier, for display
    fn model(&self) -> &str;
}

/// Reject input that no provider should be asked to embed
pub fn validate_input(text: &str, max_chars: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::EmbeddingFailure(
            "input text is empty".to_string(),
        ));
    }

    let chars = text.chars().count();
    if chars > max_chars {
        return Err(RagError::EmbeddingFailure(format!(
            "input is {} characters, limit is {}",
            chars, max_chars
        )));
    }

    Ok(())
}

/// Check a provider vector against the configured dimension
pub fn check_dimension(vector: &EmbeddingVector, expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::EmbeddingFailure(format!(
            "expected a {}-dimensional vector, got {}",
            expected,
            vector.len()
        )));
    }
    Ok(())
}

/// Build the embedder selected in the config
pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.embedding.provider {
        EmbeddingProvider::Openai => {
            let api_key = credentials.openai_api_key.clone().ok_or_else(|| {
                RagError::ConfigError(format!(
                    "{} is not set",
                    crate::cli::config::OPENAI_API_KEY_ENV
                ))
            })?;
            Arc::new(OpenAiEmbedder::new(
                api_key,
                &config.embedding,
                config.timeout(),
            )?)
        }
        EmbeddingProvider::Hashing => Arc::new(
            HashingEmbedder::new(config.embedding.dimension)
                .with_max_input_chars(config.embedding.max_input_chars),
        ),
    };
    Ok(embedder)
}
