//! Vector index backends plus the writer/reader used by the pipeline
//!
//! Backends only speak their service's protocol. [`IndexWriter`] and
//! [`IndexReader`] own the rules that hold for every backend: dimension
//! checks before anything is sent, retry of transient failures, stable
//! ranking of results, and the empty-index versus missing-index split.

pub mod memory;
pub mod pinecone;
pub mod qdrant;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cli::config::{Config, Credentials, IndexBackend};
use crate::errors::{RagError, Result, Stage};
use crate::retry::RetryManager;
use crate::types::{
    CreateOutcome, EmbeddingVector, IndexEntry, IndexSpec, IndexStats, QueryMatch, QueryRequest,
    QueryResult,
};

pub use memory::MemoryIndex;
pub use pinecone::PineconeIndex;
pub use qdrant::QdrantIndex;

/// A hosted or in-process vector index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name for display
    fn backend(&self) -> &'static str;

    /// Names of all indexes visible to the credentials
    async fn list_indexes(&self) -> Result<Vec<String>>;

    /// Create an index; an existing index of the same name is left as is
    async fn create_index(&self, spec: &IndexSpec) -> Result<CreateOutcome>;

    /// Block until a freshly created index accepts reads and writes
    async fn wait_until_ready(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Dimension, metric and vector count, or `None` if the index does not exist
    async fn describe(&self, name: &str) -> Result<Option<IndexStats>>;

    /// Insert or replace entries by id, returning the number written
    async fn upsert(&self, name: &str, entries: &[IndexEntry]) -> Result<usize>;

    /// Raw nearest-neighbour query
    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<QueryMatch>>;
}

/// Build the backend selected in the config
pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match config.index.backend {
        IndexBackend::Memory => Arc::new(MemoryIndex::new()),
        IndexBackend::Pinecone => {
            let api_key = credentials.pinecone_api_key.clone().ok_or_else(|| {
                RagError::ConfigError(format!(
                    "{} is not set",
                    crate::cli::config::PINECONE_API_KEY_ENV
                ))
            })?;
            let mut index = PineconeIndex::new(api_key, config.timeout())?;
            if let Some(url) = &config.index.url {
                index = index.with_control_plane(url);
            }
            Arc::new(index)
        }
        IndexBackend::Qdrant => {
            let url = config
                .index
                .url
                .clone()
                .unwrap_or_else(|| qdrant::DEFAULT_URL.to_string());
            Arc::new(QdrantIndex::new(
                &url,
                credentials.qdrant_api_key.clone(),
                config.timeout(),
            )?)
        }
    };
    Ok(index)
}

/// Writes entries into one named index
#[derive(Clone)]
pub struct IndexWriter {
    index: Arc<dyn VectorIndex>,
    name: String,
    dimension: usize,
    retry: RetryManager,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn VectorIndex>, name: impl Into<String>, dimension: usize, retry: RetryManager) -> Self {
        Self {
            index,
            name: name.into(),
            dimension,
            retry,
        }
    }

    /// Idempotent upsert keyed by id
    ///
    /// Nothing is sent if the batch is empty or any vector has the wrong
    /// length; vectors are never truncated or padded.
    pub async fn write(&self, entries: &[IndexEntry]) -> Result<usize> {
        let total = entries.len();
        if total == 0 {
            return Err(RagError::IndexWriteFailure {
                failed: 0,
                total: 0,
                reason: "no entries to write".to_string(),
            });
        }

        let mismatched: Vec<&str> = entries
            .iter()
            .filter(|e| e.vector.len() != self.dimension)
            .map(|e| e.id.as_str())
            .collect();
        if !mismatched.is_empty() {
            return Err(RagError::IndexWriteFailure {
                failed: mismatched.len(),
                total,
                reason: format!(
                    "vector length does not match index dimension {} for: {}",
                    self.dimension,
                    mismatched.join(", ")
                ),
            });
        }

        let index = &self.index;
        let name = self.name.as_str();
        let written = self
            .retry
            .execute_with_retry(Stage::Upload, || index.upsert(name, entries))
            .await
            .map_err(|e| match e {
                RagError::Timeout { .. } | RagError::IndexWriteFailure { .. } => e,
                other => RagError::IndexWriteFailure {
                    failed: total,
                    total,
                    reason: other.to_string(),
                },
            })?;

        debug!(index = %self.name, count = written, "upserted entries");
        Ok(written)
    }

    pub fn index_name(&self) -> &str {
        &self.name
    }
}

/// Answers top-k queries against one named index
#[derive(Clone)]
pub struct IndexReader {
    index: Arc<dyn VectorIndex>,
    name: String,
    dimension: usize,
    retry: RetryManager,
}

impl IndexReader {
    pub fn new(index: Arc<dyn VectorIndex>, name: impl Into<String>, dimension: usize, retry: RetryManager) -> Self {
        Self {
            index,
            name: name.into(),
            dimension,
            retry,
        }
    }

    /// Top-k entries by the index metric, best first, ids unique
    ///
    /// A missing index is `IndexNotFound`. An index with no vectors is a
    /// successful empty result with `index_empty` set.
    pub async fn query(&self, vector: &EmbeddingVector, top_k: usize) -> Result<QueryResult> {
        if top_k == 0 {
            return Err(RagError::IndexQueryFailure("top_k must be at least 1".to_string()));
        }
        if vector.len() != self.dimension {
            return Err(RagError::IndexQueryFailure(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let index = &self.index;
        let name = self.name.as_str();

        let stats = self
            .retry
            .execute_with_retry(Stage::Query, || index.describe(name))
            .await
            .map_err(Self::query_error)?
            .ok_or_else(|| RagError::IndexNotFound {
                name: self.name.clone(),
            })?;

        let request = QueryRequest {
            vector: vector.clone(),
            top_k,
            include_metadata: true,
        };
        let matches = self
            .retry
            .execute_with_retry(Stage::Query, || index.query(name, &request))
            .await
            .map_err(Self::query_error)?;

        // Hosted stats lag behind writes, so only trust a zero count
        // when the query agrees
        if matches.is_empty() && stats.vector_count == 0 {
            info!(index = %self.name, "query against empty index");
            return Ok(QueryResult::empty_index());
        }

        Ok(QueryResult::ranked(matches, top_k))
    }

    fn query_error(e: RagError) -> RagError {
        match e {
            RagError::Timeout { .. }
            | RagError::IndexNotFound { .. }
            | RagError::IndexQueryFailure(_) => e,
            other => RagError::IndexQueryFailure(other.to_string()),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.name
    }
}
