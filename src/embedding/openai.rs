//! OpenAI-compatible embeddings endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cli::config::EmbeddingConfig;
use crate::embedding::{check_dimension, validate_input, Embedder};
use crate::errors::{RagError, Result, Stage};
use crate::http::{build_client, check_status};
use crate::types::EmbeddingVector;

/// Embedder backed by `POST {base_url}/embeddings`
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    max_input_chars: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, config: &EmbeddingConfig, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("embedding API key must not be empty".to_string()));
        }

        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_input_chars: config.max_input_chars,
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        validate_input(text, self.max_input_chars)?;

        let started = Instant::now();
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Embed, e, self.timeout))?;

        let body: JsonValue = check_status(Stage::Embed, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Embed, e, self.timeout))?;

        let vector = parse_embedding_response(&body)?;
        check_dimension(&vector, self.dimension)?;

        debug!(
            model = %self.model,
            chars = text.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "embedded text"
        );
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Normalize the embedding response shapes the providers return
///
/// Accepts `{"data": [{"embedding": [...]}]}` and the older flat
/// `{"embedding": [...]}`.
pub fn parse_embedding_response(body: &JsonValue) -> Result<EmbeddingVector> {
    let values = body
        .pointer("/data/0/embedding")
        .or_else(|| body.get("embedding"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            RagError::EmbeddingFailure("response contains no embedding".to_string())
        })?;

    let vector = values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| {
            RagError::EmbeddingFailure("embedding contains non-numeric values".to_string())
        })?;

    if vector.is_empty() {
        return Err(RagError::EmbeddingFailure("embedding is empty".to_string()));
    }

    Ok(EmbeddingVector::new(vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_data_shape() {
        let body = json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}],
            "model": "text-embedding-3-small"
        });
        let vector = parse_embedding_response(&body).unwrap();
        assert_eq!(vector.len(), 3);
        assert!((vector.as_slice()[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_parse_flat_shape() {
        let body = json!({"embedding": [1.0, -1.0]});
        assert_eq!(parse_embedding_response(&body).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_missing_embedding() {
        assert!(parse_embedding_response(&json!({"data": []})).is_err());
        assert!(parse_embedding_response(&json!({"embedding": ["x"]})).is_err());
        assert!(parse_embedding_response(&json!({"embedding": []})).is_err());
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = OpenAiEmbedder::new("", &EmbeddingConfig::default(), Duration::from_secs(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_blank_input_fails_before_network() {
        let embedder =
            OpenAiEmbedder::new("sk-test", &EmbeddingConfig::default(), Duration::from_secs(1))
                .unwrap();
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingFailure(_)));
    }

    fn local_config(addr: std::net::SocketAddr) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: format!("http://{}", addr),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unanswered_request_is_embed_timeout() {
        let addr = crate::http::tests::silent_listener().await;
        let embedder =
            OpenAiEmbedder::new("sk-test", &local_config(addr), Duration::from_millis(200)).unwrap();

        let err = embedder.embed("What is OneLake?").await.unwrap_err();
        assert!(matches!(err, RagError::Timeout { stage: Stage::Embed, duration_ms: 200 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_not_retried() {
        let addr = crate::http::tests::json_server("not json").await;
        let embedder =
            OpenAiEmbedder::new("sk-test", &local_config(addr), Duration::from_secs(5)).unwrap();

        let err = embedder.embed("What is OneLake?").await.unwrap_err();
        assert!(matches!(err, RagError::MalformedResponse { stage: Stage::Embed, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    #[ignore] // Requires OPENAI_API_KEY and network access
    async fn test_live_embedding_dimension() {
        let key = std::env::var("OPENAI_API_KEY").unwrap();
        let config = EmbeddingConfig::default();
        let embedder = OpenAiEmbedder::new(key, &config, Duration::from_secs(30)).unwrap();
        let vector = embedder.embed("What is OneLake?").await.unwrap();
        assert_eq!(vector.len(), config.dimension);
    }
}
