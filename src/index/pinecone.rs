//! Pinecone serverless index over the REST API
//!
//! Index administration goes to the control plane; reads and writes go
//! to the per-index data plane host, which is looked up once and cached.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::{RagError, Result, Stage};
use crate::http::{build_client, check_status};
use crate::index::VectorIndex;
use crate::types::{
    CreateOutcome, IndexEntry, IndexSpec, IndexStats, Metadata, MetadataValue, QueryMatch,
    QueryRequest, SimilarityMetric,
};

/// Control plane endpoint
pub const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

const API_VERSION: &str = "2024-07";

/// Delay between readiness checks after creating an index
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PineconeIndex {
    client: Client,
    api_key: String,
    control_plane: String,
    hosts: RwLock<HashMap<String, String>>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    dimension: Option<usize>,
    metric: Option<String>,
    host: Option<String>,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: Option<String>,
}

impl IndexModel {
    /// Servers that omit `status` are treated as ready
    fn is_ready(&self) -> bool {
        self.status.as_ref().map_or(true, |s| s.ready)
    }

    fn state(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStatsResponse {
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Map<String, JsonValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, JsonValue>>,
}

impl PineconeIndex {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError("Pinecone API key must not be empty".to_string()));
        }
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            control_plane: CONTROL_PLANE_URL.to_string(),
            hosts: RwLock::new(HashMap::new()),
            timeout,
        })
    }

    /// Point the control plane elsewhere (e.g. a local emulator)
    pub fn with_control_plane(mut self, url: &str) -> Self {
        self.control_plane = url.trim_end_matches('/').to_string();
        self
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn fetch_index(&self, name: &str) -> Result<Option<IndexModel>> {
        let url = format!("{}/indexes/{}", self.control_plane, name);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let model: IndexModel = check_status(Stage::Index, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        // A host is only usable once the index is ready
        if let Some(host) = model.host.as_ref().filter(|_| model.is_ready()) {
            self.hosts
                .write()
                .await
                .insert(name.to_string(), data_plane_url(host));
        }
        Ok(Some(model))
    }

    /// Data plane base URL for an index
    async fn host(&self, name: &str, stage: Stage) -> Result<String> {
        if let Some(host) = self.hosts.read().await.get(name) {
            return Ok(host.clone());
        }

        match self.fetch_index(name).await.map_err(|e| restage(e, stage))? {
            Some(IndexModel { host: Some(host), .. }) => Ok(data_plane_url(&host)),
            Some(_) => Err(RagError::Upstream {
                stage,
                status: None,
                message: format!("index '{}' has no host yet", name),
            }),
            None => Err(RagError::IndexNotFound {
                name: name.to_string(),
            }),
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn backend(&self) -> &'static str {
        "pinecone"
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let url = format!("{}/indexes", self.control_plane);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        let list: IndexList = check_status(Stage::Index, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        Ok(list.indexes.into_iter().map(|i| i.name).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<CreateOutcome> {
        let url = format!("{}/indexes", self.control_plane);
        let body = json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric.as_str(),
            "spec": {
                "serverless": {
                    "cloud": spec.cloud,
                    "region": spec.region,
                }
            }
        });

        let response = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        if response.status() == StatusCode::CONFLICT {
            debug!(index = %spec.name, "pinecone index already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }

        check_status(Stage::Index, response).await?;
        info!(index = %spec.name, dimension = spec.dimension, metric = %spec.metric, "created pinecone index");
        Ok(CreateOutcome::Created)
    }

    /// Poll the control plane until the index reports `status.ready`
    async fn wait_until_ready(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.fetch_index(name).await? {
                Some(model) if model.is_ready() => {
                    debug!(index = %name, waited_ms = started.elapsed().as_millis() as u64, "pinecone index ready");
                    return Ok(());
                }
                Some(model) => debug!(index = %name, state = model.state(), "waiting for pinecone index"),
                None => debug!(index = %name, "pinecone index not visible yet"),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(RagError::Timeout {
                    stage: Stage::Index,
                    duration_ms: self.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL.min(self.timeout - elapsed)).await;
        }
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexStats>> {
        let model = match self.fetch_index(name).await? {
            Some(model) => model,
            None => return Ok(None),
        };

        let Some(host) = model.host.as_deref().map(data_plane_url) else {
            // Still initializing; nothing can have been written yet
            return Ok(Some(IndexStats {
                name: model.name,
                dimension: model.dimension,
                metric: model.metric.as_deref().and_then(|m| m.parse().ok()),
                vector_count: 0,
            }));
        };

        let response = self
            .authed(self.client.post(format!("{}/describe_index_stats", host)))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        let stats: DescribeStatsResponse = check_status(Stage::Index, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Index, e, self.timeout))?;

        Ok(Some(IndexStats {
            name: model.name,
            dimension: stats.dimension.or(model.dimension),
            metric: model.metric.as_deref().and_then(|m| m.parse::<SimilarityMetric>().ok()),
            vector_count: stats.total_vector_count,
        }))
    }

    async fn upsert(&self, name: &str, entries: &[IndexEntry]) -> Result<usize> {
        let host = self.host(name, Stage::Upload).await?;

        let vectors: Vec<UpsertVector<'_>> = entries
            .iter()
            .map(|entry| UpsertVector {
                id: &entry.id,
                values: entry.vector.as_slice(),
                metadata: metadata_to_json(&entry.metadata),
            })
            .collect();

        let response = self
            .authed(self.client.post(format!("{}/vectors/upsert", host)))
            .json(&json!({ "vectors": vectors }))
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Upload, e, self.timeout))?;

        let upserted: UpsertResponse = check_status(Stage::Upload, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Upload, e, self.timeout))?;

        if upserted.upserted_count != entries.len() {
            return Err(RagError::IndexWriteFailure {
                failed: entries.len().saturating_sub(upserted.upserted_count),
                total: entries.len(),
                reason: format!(
                    "service acknowledged {} of {} vectors",
                    upserted.upserted_count,
                    entries.len()
                ),
            });
        }

        Ok(upserted.upserted_count)
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let host = self.host(name, Stage::Query).await?;

        let response = self
            .authed(self.client.post(format!("{}/query", host)))
            .json(&QueryBody {
                vector: request.vector.as_slice(),
                top_k: request.top_k,
                include_metadata: request.include_metadata,
                include_values: false,
            })
            .send()
            .await
            .map_err(|e| RagError::transport(Stage::Query, e, self.timeout))?;

        let result: QueryResponse = check_status(Stage::Query, response)
            .await?
            .json()
            .await
            .map_err(|e| RagError::transport(Stage::Query, e, self.timeout))?;

        Ok(result
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.as_ref().map(metadata_from_json).unwrap_or_default(),
            })
            .collect())
    }
}

/// Hosts come back without a scheme
fn data_plane_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

fn restage(e: RagError, stage: Stage) -> RagError {
    match e {
        RagError::Upstream { status, message, .. } => RagError::Upstream { stage, status, message },
        RagError::Timeout { duration_ms, .. } => RagError::Timeout { stage, duration_ms },
        other => other,
    }
}

fn metadata_to_json(metadata: &Metadata) -> Map<String, JsonValue> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .filter(|(_, v)| !v.is_null())
        .collect()
}

fn metadata_from_json(map: &Map<String, JsonValue>) -> Metadata {
    map.iter()
        .filter_map(|(k, v)| MetadataValue::from_json(v).map(|value| (k.clone(), value)))
        .collect()
}
