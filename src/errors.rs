//! Error types for ragline
//!
//! Every remote call site returns a `RagError` tagged with the pipeline
//! stage that produced it, so the REPL can say which step failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Config,
    Dataset,
    Embed,
    Upload,
    Query,
    Synthesize,
    /// Index administration (list/create/describe)
    Index,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Dataset => "dataset",
            Stage::Embed => "embed",
            Stage::Upload => "upload",
            Stage::Query => "query",
            Stage::Synthesize => "synthesize",
            Stage::Index => "index",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the ingest and query pipelines
#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or invalid configuration or credentials (fatal)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Dataset could not be fetched or parsed
    #[error("Dataset error: {0}")]
    DatasetError(String),

    /// Embedding request rejected or returned an unusable vector
    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    /// Upsert rejected; `failed` of `total` entries were not written
    #[error("Index write failure ({failed}/{total} entries failed): {reason}")]
    IndexWriteFailure {
        failed: usize,
        total: usize,
        reason: String,
    },

    /// Similarity query could not be served
    #[error("Index query failure: {0}")]
    IndexQueryFailure(String),

    /// The configured index has not been created
    #[error("Index '{name}' does not exist")]
    IndexNotFound { name: String },

    /// Chat completion failed
    #[error("Synthesis failure: {0}")]
    SynthesisFailure(String),

    /// Remote service returned an error status or could not be reached
    #[error("{stage} service error{}: {message}", status_suffix(.status))]
    Upstream {
        stage: Stage,
        status: Option<u16>,
        message: String,
    },

    /// Service answered with a body that does not match its protocol
    #[error("{stage} service returned an unexpected response: {message}")]
    MalformedResponse { stage: Stage, message: String },

    /// Remote call exceeded its time budget
    #[error("{stage} timed out after {duration_ms}ms")]
    Timeout { stage: Stage, duration_ms: u64 },

    /// Pipeline state machine rejected an action
    #[error("Invalid state transition from {from} via {event}")]
    InvalidTransition { from: String, event: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    /// Classify a reqwest failure
    ///
    /// `timeout` is the client's request budget and is reported when the
    /// client gave up waiting. An undecodable body is not retried.
    pub fn transport(stage: Stage, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return RagError::Timeout {
                stage,
                duration_ms: timeout.as_millis() as u64,
            };
        }
        if err.is_decode() {
            return RagError::MalformedResponse {
                stage,
                message: err.to_string(),
            };
        }
        RagError::Upstream {
            stage,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Stage this error is reported under
    pub fn stage(&self) -> Stage {
        match self {
            RagError::ConfigError(_) => Stage::Config,
            RagError::DatasetError(_) => Stage::Dataset,
            RagError::EmbeddingFailure(_) => Stage::Embed,
            RagError::IndexWriteFailure { .. } => Stage::Upload,
            RagError::IndexQueryFailure(_) | RagError::IndexNotFound { .. } => Stage::Query,
            RagError::SynthesisFailure(_) => Stage::Synthesize,
            RagError::Upstream { stage, .. }
            | RagError::MalformedResponse { stage, .. }
            | RagError::Timeout { stage, .. } => *stage,
            RagError::InvalidTransition { .. } => Stage::Config,
        }
    }

    /// Configuration errors halt the session; everything else is per-action
    pub fn is_fatal(&self) -> bool {
        matches!(self, RagError::ConfigError(_))
    }

    /// Transient failures are eligible for retry
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Timeout { .. } => true,
            // No status means the request never completed
            RagError::Upstream { status: None, .. } => true,
            RagError::Upstream { status: Some(code), .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// One-line message for the terminal, naming the failed stage
    pub fn user_message(&self) -> String {
        format!("[{}] {}", self.stage(), self)
    }
}
