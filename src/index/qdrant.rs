//! Qdrant collection as a vector index
//!
//! Qdrant point ids must be integers or UUIDs, so string ids are mapped
//! to a name-based UUID and the original id travels in the payload.

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointId, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{RagError, Result, Stage};
use crate::index::VectorIndex;
use crate::types::{
    CreateOutcome, IndexEntry, IndexSpec, IndexStats, Metadata, MetadataValue, QueryMatch,
    QueryRequest, SimilarityMetric,
};

/// Local Qdrant gRPC endpoint
pub const DEFAULT_URL: &str = "http://localhost:6334";

/// Payload key holding the caller's id
const ID_KEY: &str = "_id";

// gRPC status codes the client surfaces
const GRPC_CANCELLED: i32 = 1;
const GRPC_DEADLINE_EXCEEDED: i32 = 4;
const GRPC_NOT_FOUND: i32 = 5;
const GRPC_ALREADY_EXISTS: i32 = 6;
const GRPC_PERMISSION_DENIED: i32 = 7;
const GRPC_RESOURCE_EXHAUSTED: i32 = 8;
const GRPC_ABORTED: i32 = 10;
const GRPC_UNAVAILABLE: i32 = 14;
const GRPC_UNAUTHENTICATED: i32 = 16;

pub struct QdrantIndex {
    client: Qdrant,
    timeout: Duration,
}

impl QdrantIndex {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::ConfigError(format!("Failed to create Qdrant client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn classify<'a>(&'a self, stage: Stage, collection: &'a str) -> impl Fn(QdrantError) -> RagError + 'a {
        move |e| match e {
            QdrantError::ResponseError { status } => {
                grpc_error(stage, collection, status.code() as i32, status.message(), self.timeout)
            }
            QdrantError::ConversionError(message) => RagError::MalformedResponse { stage, message },
            // Transport level: the request never completed
            other => RagError::Upstream {
                stage,
                status: None,
                message: other.to_string(),
            },
        }
    }
}

/// Classify a gRPC status the way the HTTP backends classify responses
///
/// Only unavailability, throttling and deadline expiry are retried.
fn grpc_error(stage: Stage, collection: &str, code: i32, message: &str, timeout: Duration) -> RagError {
    let status = match code {
        GRPC_NOT_FOUND => {
            return RagError::IndexNotFound {
                name: collection.to_string(),
            }
        }
        GRPC_DEADLINE_EXCEEDED => {
            return RagError::Timeout {
                stage,
                duration_ms: timeout.as_millis() as u64,
            }
        }
        GRPC_UNAVAILABLE => 503,
        GRPC_RESOURCE_EXHAUSTED => 429,
        GRPC_UNAUTHENTICATED => 401,
        GRPC_PERMISSION_DENIED => 403,
        GRPC_ALREADY_EXISTS | GRPC_ABORTED => 409,
        GRPC_CANCELLED => 499,
        // Invalid argument (e.g. wrong vector size), failed precondition and the rest
        _ => 400,
    };
    RagError::Upstream {
        stage,
        status: Some(status),
        message: format!("gRPC {}: {}", code, message),
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(self.classify(Stage::Index, ""))?;
        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<CreateOutcome> {
        let exists = self
            .client
            .collection_exists(spec.name.as_str())
            .await
            .map_err(self.classify(Stage::Index, spec.name.as_str()))?;
        if exists {
            debug!(collection = %spec.name, "qdrant collection already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(spec.name.as_str()).vectors_config(VectorParamsBuilder::new(
                    spec.dimension as u64,
                    metric_to_distance(spec.metric),
                )),
            )
            .await
            .map_err(self.classify(Stage::Index, spec.name.as_str()))?;

        info!(collection = %spec.name, dimension = spec.dimension, "created qdrant collection");
        Ok(CreateOutcome::Created)
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexStats>> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(self.classify(Stage::Index, name))?;
        if !exists {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(self.classify(Stage::Index, name))?
            .result;

        let params = info
            .as_ref()
            .and_then(|i| i.config.as_ref())
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|v| v.config.as_ref())
            .and_then(|c| match c {
                VectorsConfigKind::Params(params) => Some(params),
                _ => None,
            });

        Ok(Some(IndexStats {
            name: name.to_string(),
            dimension: params.map(|p| p.size as usize),
            metric: params
                .and_then(|p| Distance::try_from(p.distance).ok())
                .and_then(distance_to_metric),
            vector_count: info.and_then(|i| i.points_count).unwrap_or(0),
        }))
    }

    async fn upsert(&self, name: &str, entries: &[IndexEntry]) -> Result<usize> {
        let points: Vec<PointStruct> = entries
            .iter()
            .map(|entry| {
                let mut payload = Payload::new();
                for (key, value) in &entry.metadata {
                    payload.insert(key.clone(), json_to_qdrant_value(value.to_json()));
                }
                payload.insert(ID_KEY, entry.id.clone());
                PointStruct::new(point_uuid(&entry.id), entry.vector.as_slice().to_vec(), payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(self.classify(Stage::Upload, name))?;

        Ok(entries.len())
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(
                    name,
                    request.vector.as_slice().to_vec(),
                    request.top_k as u64,
                )
                .with_payload(true),
            )
            .await
            .map_err(self.classify(Stage::Query, name))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = point
                    .payload
                    .get(ID_KEY)
                    .and_then(qdrant_value_to_string)
                    .unwrap_or_else(|| point_id_to_string(&point.id));

                let metadata: Metadata = if request.include_metadata {
                    point
                        .payload
                        .iter()
                        .filter(|(key, _)| key.as_str() != ID_KEY)
                        .filter_map(|(key, value)| {
                            qdrant_to_json_value(value)
                                .and_then(|json| MetadataValue::from_json(&json))
                                .map(|v| (key.clone(), v))
                        })
                        .collect()
                } else {
                    Metadata::new()
                };

                QueryMatch {
                    id,
                    score: point.score,
                    metadata,
                }
            })
            .collect())
    }
}

/// Stable UUID for a caller-supplied id
pub fn point_uuid(id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()
}

fn metric_to_distance(metric: SimilarityMetric) -> Distance {
    match metric {
        SimilarityMetric::Cosine => Distance::Cosine,
        SimilarityMetric::Euclidean => Distance::Euclid,
        SimilarityMetric::Dotproduct => Distance::Dot,
    }
}

fn distance_to_metric(distance: Distance) -> Option<SimilarityMetric> {
    match distance {
        Distance::Cosine => Some(SimilarityMetric::Cosine),
        Distance::Euclid => Some(SimilarityMetric::Euclidean),
        Distance::Dot => Some(SimilarityMetric::Dotproduct),
        _ => None,
    }
}

fn json_to_qdrant_value(json: JsonValue) -> QdrantValue {
    match json {
        JsonValue::String(s) => QdrantValue::from(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                QdrantValue::from(i)
            } else {
                QdrantValue::from(n.as_f64().unwrap_or_default())
            }
        }
        JsonValue::Bool(b) => QdrantValue::from(b),
        _ => QdrantValue::from(""),
    }
}

fn qdrant_to_json_value(value: &QdrantValue) -> Option<JsonValue> {
    value.kind.as_ref().and_then(|kind| match kind {
        Kind::StringValue(s) => Some(JsonValue::String(s.clone())),
        Kind::IntegerValue(i) => Some(JsonValue::Number((*i).into())),
        Kind::DoubleValue(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
        Kind::BoolValue(b) => Some(JsonValue::Bool(*b)),
        _ => None,
    })
}

fn qdrant_value_to_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn point_id_to_string(point_id: &Option<PointId>) -> String {
    match point_id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(u)) => u.clone(),
        None => "unknown".to_string(),
    }
}
