//! In-process vector index
//!
//! Exact search over a `HashMap` per index behind a tokio `RwLock`.
//! Used by `--offline` mode and the test suite.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::errors::{RagError, Result};
use crate::index::VectorIndex;
use crate::types::{CreateOutcome, IndexEntry, IndexSpec, IndexStats, QueryMatch, QueryRequest};

struct Collection {
    spec: IndexSpec,
    entries: HashMap<String, IndexEntry>,
}

#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<CreateOutcome> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(&spec.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        collections.insert(
            spec.name.clone(),
            Collection {
                spec: spec.clone(),
                entries: HashMap::new(),
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexStats>> {
        let collections = self.collections.read().await;
        Ok(collections.get(name).map(|c| IndexStats {
            name: name.to_string(),
            dimension: Some(c.spec.dimension),
            metric: Some(c.spec.metric),
            vector_count: c.entries.len() as u64,
        }))
    }

    async fn upsert(&self, name: &str, entries: &[IndexEntry]) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| RagError::IndexNotFound {
            name: name.to_string(),
        })?;

        // Validate the whole batch before touching the map
        if let Some(bad) = entries
            .iter()
            .find(|e| e.vector.len() != collection.spec.dimension)
        {
            return Err(RagError::IndexWriteFailure {
                failed: entries.len(),
                total: entries.len(),
                reason: format!(
                    "entry '{}' has {} dimensions, index '{}' has {}",
                    bad.id,
                    bad.vector.len(),
                    name,
                    collection.spec.dimension
                ),
            });
        }

        for entry in entries {
            collection.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(&self, name: &str, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| RagError::IndexNotFound {
            name: name.to_string(),
        })?;

        let metric = collection.spec.metric;
        let mut scored: Vec<QueryMatch> = collection
            .entries
            .values()
            .map(|entry| QueryMatch {
                id: entry.id.clone(),
                score: metric.score(entry.vector.as_slice(), request.vector.as_slice()),
                metadata: if request.include_metadata {
                    entry.metadata.clone()
                } else {
                    Default::default()
                },
            })
            .collect();

        scored.retain(|m| !m.score.is_nan());
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(request.top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmbeddingVector, Metadata, MetadataValue, SimilarityMetric};

    fn spec(name: &str, metric: SimilarityMetric) -> IndexSpec {
        IndexSpec {
            name: name.to_string(),
            dimension: 2,
            metric,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn entry(id: &str, v: [f32; 2], text: &str) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert("text".to_string(), MetadataValue::from(text));
        IndexEntry::new(id, EmbeddingVector::new(v.to_vec()), metadata)
    }

    fn request(v: [f32; 2], top_k: usize) -> QueryRequest {
        QueryRequest {
            vector: EmbeddingVector::new(v.to_vec()),
            top_k,
            include_metadata: true,
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let index = MemoryIndex::new();
        let s = spec("demo", SimilarityMetric::Cosine);
        assert_eq!(index.create_index(&s).await.unwrap(), CreateOutcome::Created);
        assert_eq!(index.create_index(&s).await.unwrap(), CreateOutcome::AlreadyExists);
        assert_eq!(index.list_indexes().await.unwrap(), vec!["demo".to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = MemoryIndex::new();
        index.create_index(&spec("demo", SimilarityMetric::Cosine)).await.unwrap();
        index.upsert("demo", &[entry("a", [1.0, 0.0], "first")]).await.unwrap();
        index.upsert("demo", &[entry("a", [0.0, 1.0], "second")]).await.unwrap();

        let stats = index.describe("demo").await.unwrap().unwrap();
        assert_eq!(stats.vector_count, 1);

        let hits = index.query("demo", &request([0.0, 1.0], 5)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text(), Some("second"));
    }

    #[tokio::test]
    async fn test_describe_missing() {
        let index = MemoryIndex::new();
        assert!(index.describe("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_validates_whole_batch() {
        let index = MemoryIndex::new();
        index.create_index(&spec("demo", SimilarityMetric::Cosine)).await.unwrap();
        let bad = IndexEntry::new("bad", EmbeddingVector::new(vec![1.0]), Metadata::new());
        assert!(index.upsert("demo", &[entry("good", [1.0, 0.0], "g"), bad]).await.is_err());
        assert_eq!(index.describe("demo").await.unwrap().unwrap().vector_count, 0);
    }

    #[tokio::test]
    async fn test_euclidean_ranking() {
        let index = MemoryIndex::new();
        index.create_index(&spec("demo", SimilarityMetric::Euclidean)).await.unwrap();
        index
            .upsert(
                "demo",
                &[entry("near", [1.0, 1.0], "n"), entry("far", [10.0, 10.0], "f")],
            )
            .await
            .unwrap();
        let hits = index.query("demo", &request([0.0, 0.0], 2)).await.unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_metadata_omitted_when_not_requested() {
        let index = MemoryIndex::new();
        index.create_index(&spec("demo", SimilarityMetric::Dotproduct)).await.unwrap();
        index.upsert("demo", &[entry("a", [1.0, 0.0], "t")]).await.unwrap();
        let mut req = request([1.0, 0.0], 1);
        req.include_metadata = false;
        let hits = index.query("demo", &req).await.unwrap();
        assert!(hits[0].metadata.is_empty());
    }

    #[tokio::test]
    async fn test_nan_scores_are_not_ranked() {
        let index = MemoryIndex::new();
        index.create_index(&spec("demo", SimilarityMetric::Dotproduct)).await.unwrap();
        index
            .upsert(
                "demo",
                &[
                    entry("nan", [f32::NAN, 0.0], "n"),
                    entry("a", [1.0, 0.0], "a"),
                    entry("b", [0.5, 0.0], "b"),
                ],
            )
            .await
            .unwrap();
        let hits = index.query("demo", &request([1.0, 0.0], 3)).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
