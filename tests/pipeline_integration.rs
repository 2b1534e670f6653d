//! End-to-end pipeline tests over the offline providers
//!
//! Uses the hashing embedder and the in-memory index, so no API keys or
//! network access are needed. Timeout cases talk to a loopback listener.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use ragline::cli::Config;
use ragline::dataset::sample_documents;
use ragline::embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
use ragline::index::{MemoryIndex, VectorIndex};
use ragline::rag::{Answer, ChatModel, RagPipeline};
use ragline::telemetry::TelemetryCollector;
use ragline::types::{Document, EmbeddingVector};
use ragline::{RagError, Result, Stage};

const DIM: usize = 512;

fn offline_config() -> Config {
    let mut config = Config::default().offline();
    config.embedding.dimension = DIM;
    config.index.dimension = DIM;
    config.network.max_retries = 1;
    config.network.base_delay_ms = 1;
    config
}

fn pipeline_with(config: &Config, embedder: Arc<dyn Embedder>) -> (RagPipeline, Arc<MemoryIndex>) {
    let index = Arc::new(MemoryIndex::new());
    let pipeline = RagPipeline::new(config, embedder, index.clone(), TelemetryCollector::new());
    (pipeline, index)
}

fn offline_pipeline() -> (RagPipeline, Arc<MemoryIndex>) {
    pipeline_with(&offline_config(), Arc::new(HashingEmbedder::new(DIM)))
}

/// Fails for any text containing a marker word
struct FlakyEmbedder {
    inner: HashingEmbedder,
    marker: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(self.marker) {
            return Err(RagError::EmbeddingFailure("provider rejected input".to_string()));
        }
        self.inner.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model(&self) -> &str {
        "flaky"
    }
}

struct CannedChat;

#[async_trait]
impl ChatModel for CannedChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        assert!(user.contains("Question: What is OneLake?"));
        Ok("OneLake is the unified data lake for Microsoft Fabric [1].".to_string())
    }

    fn model(&self) -> &str {
        "canned"
    }
}

#[tokio::test]
async fn test_end_to_end_sample_question() {
    let (mut pipeline, _) = offline_pipeline();

    let report = pipeline.ingest(&sample_documents()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.committed, vec!["fabric_intro", "power_bi", "data_factory", "onelake"]);

    let outcome = pipeline.ask("What is OneLake?").await.unwrap();
    let top = outcome.result.top().expect("at least one match");
    assert_eq!(top.source(), "onelake");
    assert!(top.text().unwrap().contains("OneLake"));
    assert!(outcome.result.len() <= pipeline.top_k());
}

#[tokio::test]
async fn test_end_to_end_with_answer() {
    let (pipeline, _) = offline_pipeline();
    let mut pipeline = pipeline.with_chat(Arc::new(CannedChat));
    pipeline.ingest(&sample_documents()).await.unwrap();

    let outcome = pipeline.ask("What is OneLake?").await.unwrap();
    assert!(outcome.synthesis_error.is_none());
    match outcome.answer {
        Some(Answer::Generated { text, model, sources }) => {
            assert!(text.contains("OneLake"));
            assert_eq!(model, "canned");
            assert_eq!(sources.first().map(String::as_str), Some("onelake"));
        }
        other => panic!("unexpected answer: {:?}", other),
    }
    assert!(pipeline.state().is_idle());
}

#[tokio::test]
async fn test_long_top_document_still_grounds_an_answer() {
    let (pipeline, _) = offline_pipeline();
    let mut pipeline = pipeline.with_chat(Arc::new(CannedChat));

    // Longer than the default context budget
    let text = "OneLake is the single data lake for the whole organization. ".repeat(125);
    assert!(text.chars().count() > 6_000);
    pipeline.ingest(&[Document::new("onelake", text).unwrap()]).await.unwrap();

    let outcome = pipeline.ask("What is OneLake?").await.unwrap();
    assert_eq!(outcome.result.len(), 1);
    match outcome.answer {
        Some(Answer::Generated { sources, .. }) => assert_eq!(sources, vec!["onelake"]),
        other => panic!("expected a generated answer, got {:?}", other),
    }
}

#[tokio::test]
async fn test_query_before_ingest_is_empty_index() {
    let (mut pipeline, _) = offline_pipeline();
    let outcome = pipeline.ask("What is OneLake?").await.unwrap();
    assert!(outcome.result.is_empty());
    assert!(outcome.result.index_empty);
}

#[tokio::test]
async fn test_query_on_empty_existing_index() {
    let (pipeline, index) = offline_pipeline();
    pipeline.ensure_index().await.unwrap();
    assert_eq!(index.describe(pipeline.index_name()).await.unwrap().unwrap().vector_count, 0);

    let result = pipeline.retrieve("anything at all", 3).await.unwrap();
    assert!(result.index_empty);
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_reingest_overwrites_by_id() {
    let (mut pipeline, index) = offline_pipeline();

    let first = Document::new("doc", "Lakehouse tables live in OneLake").unwrap();
    let second = Document::new("doc", "Power BI dashboards visualize reports").unwrap();
    pipeline.ingest(&[first]).await.unwrap();
    pipeline.ingest(&[second]).await.unwrap();

    let stats = index.describe(pipeline.index_name()).await.unwrap().unwrap();
    assert_eq!(stats.vector_count, 1);

    let result = pipeline.retrieve("Power BI dashboards", 5).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.matches[0].text(), Some("Power BI dashboards visualize reports"));
}

#[tokio::test]
async fn test_round_trip_each_document_ranks_itself_first() {
    let (mut pipeline, _) = offline_pipeline();
    let documents = sample_documents();
    pipeline.ingest(&documents).await.unwrap();

    for document in &documents {
        let result = pipeline.retrieve(&document.text, 1).await.unwrap();
        assert_eq!(result.top().map(|m| m.id.as_str()), Some(document.id.as_str()));
    }
}

#[tokio::test]
async fn test_partial_failure_keeps_committed_documents() {
    let embedder = Arc::new(FlakyEmbedder {
        inner: HashingEmbedder::new(DIM),
        marker: "Power BI",
        calls: AtomicUsize::new(0),
    });
    let (mut pipeline, index) = pipeline_with(&offline_config(), embedder.clone());

    let report = pipeline.ingest(&sample_documents()).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.total, 4);
    assert_eq!(report.committed, vec!["fabric_intro", "data_factory", "onelake"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "power_bi");
    assert_eq!(report.failures[0].stage, Stage::Embed);
    assert!(report.failures[0].message.starts_with("[embed]"));

    // Permanent failures are not retried
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);

    let stats = index.describe(pipeline.index_name()).await.unwrap().unwrap();
    assert_eq!(stats.vector_count, 3);
    assert!(pipeline.state().is_idle());
}

#[tokio::test]
async fn test_concurrent_ingest_reports_in_dataset_order() {
    let mut config = offline_config();
    config.ingest.concurrency = 4;
    let (mut pipeline, _) = pipeline_with(&config, Arc::new(HashingEmbedder::new(DIM)));

    let documents: Vec<Document> = (0..20)
        .map(|i| Document::new(format!("doc-{:02}", i), format!("document number {} about topic {}", i, i * 7)).unwrap())
        .collect();
    let report = pipeline.ingest(&documents).await.unwrap();

    let expected: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
    assert_eq!(report.committed, expected);
}

#[tokio::test]
async fn test_dimension_mismatch_is_reported_per_document() {
    // Embedder produces the wrong length for this index
    let (mut pipeline, _) = pipeline_with(&offline_config(), Arc::new(HashingEmbedder::new(DIM / 2)));

    let report = pipeline.ingest(&sample_documents()).await.unwrap();
    assert!(report.committed.is_empty());
    assert_eq!(report.failures.len(), 4);
    assert!(report.failures.iter().all(|f| f.stage == Stage::Upload));
}

#[tokio::test]
async fn test_telemetry_counts_pipeline_events() {
    let (mut pipeline, _) = offline_pipeline();
    pipeline.ingest(&sample_documents()).await.unwrap();
    pipeline.ask("What is OneLake?").await.unwrap();

    let stats = pipeline.telemetry().get_stats();
    assert_eq!(stats.embeddings, 5);
    assert_eq!(stats.entries_upserted, 4);
    assert_eq!(stats.queries, 1);
}

/// Accepts connections and never answers
async fn silent_listener() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

#[tokio::test]
async fn test_stalled_embedding_provider_reports_timeout() {
    let addr = silent_listener().await;
    let mut config = offline_config();
    config.embedding.base_url = format!("http://{}", addr);

    let embedder =
        OpenAiEmbedder::new("sk-test", &config.embedding, Duration::from_millis(200)).unwrap();
    let (mut pipeline, _) = pipeline_with(&config, Arc::new(embedder));

    let documents = vec![Document::new("onelake", "OneLake stores data").unwrap()];
    let report = pipeline.ingest(&documents).await.unwrap();
    assert!(report.committed.is_empty());
    assert_eq!(report.failures[0].stage, Stage::Embed);
    assert!(report.failures[0].message.contains("timed out"));

    match pipeline.retrieve("What is OneLake?", 1).await.unwrap_err() {
        RagError::Timeout { stage, duration_ms } => {
            assert_eq!(stage, Stage::Embed);
            assert_eq!(duration_ms, 200);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
}
