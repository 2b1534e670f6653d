//! Vector, index entry and query result types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::types::document::{Metadata, SOURCE_KEY, TEXT_KEY};

/// Fixed-length embedding produced by an embedder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Similarity metric an index ranks with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    Cosine,
    Euclidean,
    Dotproduct,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Euclidean => "euclidean",
            SimilarityMetric::Dotproduct => "dotproduct",
        }
    }

    /// Score two vectors; higher always means more similar.
    ///
    /// Euclidean distance d is reported as `1 / (1 + d)`.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => {
                let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a * norm_b)
            }
            SimilarityMetric::Dotproduct => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
            SimilarityMetric::Euclidean => {
                let distance: f32 = a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "euclidean" | "euclid" => Ok(SimilarityMetric::Euclidean),
            "dotproduct" | "dot" => Ok(SimilarityMetric::Dotproduct),
            other => Err(format!("unknown similarity metric: {}", other)),
        }
    }
}

/// Parameters for creating an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub cloud: String,
    pub region: String,
}

/// Outcome of a create-index request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Index description returned by `describe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub dimension: Option<usize>,
    pub metric: Option<SimilarityMetric>,
    pub vector_count: u64,
}

/// A vector plus metadata stored under an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: EmbeddingVector,
    pub metadata: Metadata,
}

impl IndexEntry {
    pub fn new(id: impl Into<String>, vector: EmbeddingVector, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }
}

/// Backend-level query parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: EmbeddingVector,
    pub top_k: usize,
    pub include_metadata: bool,
}

/// One ranked hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl QueryMatch {
    /// Source text stored alongside the vector
    pub fn text(&self) -> Option<&str> {
        self.metadata.get(TEXT_KEY).and_then(|v| v.as_str())
    }

    /// Originating document id, falling back to the entry id
    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.id)
    }
}

/// Ranked matches for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub matches: Vec<QueryMatch>,
    /// True when the index exists but holds no vectors
    pub index_empty: bool,
}

impl QueryResult {
    /// Normalize backend output: descending score, unique ids, at most `top_k`
    ///
    /// Matches with a NaN score cannot be ranked and are dropped.
    pub fn ranked(mut matches: Vec<QueryMatch>, top_k: usize) -> Self {
        matches.retain(|m| !m.score.is_nan());
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut seen = HashSet::new();
        matches.retain(|m| seen.insert(m.id.clone()));
        matches.truncate(top_k);

        Self {
            matches,
            index_empty: false,
        }
    }

    pub fn empty_index() -> Self {
        Self {
            matches: Vec::new(),
            index_empty: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn top(&self) -> Option<&QueryMatch> {
        self.matches.first()
    }
}
