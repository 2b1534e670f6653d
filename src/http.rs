//! Shared reqwest plumbing for the hosted providers

use reqwest::{Client, Response};
use std::time::Duration;

use crate::errors::{RagError, Result, Stage};

/// Build an HTTP client with the per-request timeout
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-success response into a stage-tagged upstream error
///
/// The provider's own `error.message` is preferred over the raw body.
pub async fn check_status(stage: Stage, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RagError::Upstream {
        stage,
        status: Some(status.as_u16()),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
    })
}

fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("error"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
