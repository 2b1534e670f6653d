//! Property tests for index ranking and upsert semantics
//!
//! quickcheck drives the in-memory index and the index reader/writer
//! synchronously through `tokio_test::block_on`.

use quickcheck::{Arbitrary, Gen, TestResult};
use quickcheck_macros::quickcheck;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ragline::index::{IndexReader, IndexWriter, MemoryIndex, VectorIndex};
use ragline::retry::RetryManager;
use ragline::types::{EmbeddingVector, IndexEntry, IndexSpec, Metadata, SimilarityMetric};

const DIM: usize = 8;

/// Small finite vector with at least one non-zero component
#[derive(Debug, Clone)]
struct Vector(Vec<f32>);

impl Arbitrary for Vector {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut values: Vec<f32> = (0..DIM)
            .map(|_| (i8::arbitrary(g) as f32) / 16.0)
            .collect();
        if values.iter().all(|v| *v == 0.0) {
            values[0] = 1.0;
        }
        Vector(values)
    }
}

#[derive(Debug, Clone, Copy)]
struct Metric(SimilarityMetric);

impl Arbitrary for Metric {
    fn arbitrary(g: &mut Gen) -> Self {
        let metrics = [
            SimilarityMetric::Cosine,
            SimilarityMetric::Euclidean,
            SimilarityMetric::Dotproduct,
        ];
        Metric(*g.choose(&metrics).unwrap_or(&SimilarityMetric::Cosine))
    }
}

fn retry() -> RetryManager {
    RetryManager::with_config(1, 1, Duration::from_secs(5))
}

fn setup(metric: SimilarityMetric) -> (Arc<MemoryIndex>, IndexWriter, IndexReader) {
    let index = Arc::new(MemoryIndex::new());
    let spec = IndexSpec {
        name: "props".to_string(),
        dimension: DIM,
        metric,
        cloud: "aws".to_string(),
        region: "us-east-1".to_string(),
    };
    tokio_test::block_on(index.create_index(&spec)).unwrap();

    let writer = IndexWriter::new(index.clone(), "props", DIM, retry());
    let reader = IndexReader::new(index.clone(), "props", DIM, retry());
    (index, writer, reader)
}

fn entries(vectors: &[Vector]) -> Vec<IndexEntry> {
    vectors
        .iter()
        .enumerate()
        .map(|(i, v)| {
            IndexEntry::new(
                format!("id-{}", i % 7),
                EmbeddingVector::new(v.0.clone()),
                Metadata::new(),
            )
        })
        .collect()
}

#[quickcheck]
fn prop_query_is_ranked_unique_and_bounded(
    stored: Vec<Vector>,
    query: Vector,
    k: u8,
    metric: Metric,
) -> TestResult {
    let k = (k % 10) as usize + 1;
    if stored.is_empty() {
        return TestResult::discard();
    }

    let (_, writer, reader) = setup(metric.0);
    // Ids repeat every 7 entries, so later writes replace earlier ones
    for entry in entries(&stored) {
        tokio_test::block_on(writer.write(&[entry])).unwrap();
    }

    let result = tokio_test::block_on(reader.query(&EmbeddingVector::new(query.0), k)).unwrap();
    let distinct = stored.len().min(7);

    let sorted = result
        .matches
        .windows(2)
        .all(|w| w[0].score >= w[1].score);
    let unique = result.matches.iter().map(|m| &m.id).collect::<HashSet<_>>().len() == result.len();

    TestResult::from_bool(sorted && unique && result.len() == k.min(distinct) && !result.index_empty)
}

#[quickcheck]
fn prop_second_upsert_wins(first: Vector, second: Vector) -> bool {
    let (index, writer, reader) = setup(SimilarityMetric::Cosine);

    let entry = |v: &Vector| IndexEntry::new("same", EmbeddingVector::new(v.0.clone()), Metadata::new());
    tokio_test::block_on(writer.write(&[entry(&first)])).unwrap();
    tokio_test::block_on(writer.write(&[entry(&second)])).unwrap();

    let stats = tokio_test::block_on(index.describe("props")).unwrap().unwrap();
    let result = tokio_test::block_on(reader.query(&EmbeddingVector::new(second.0.clone()), 3)).unwrap();

    stats.vector_count == 1
        && result.len() == 1
        && (result.matches[0].score - 1.0).abs() < 1e-4
}
