//! End-to-end ingest and query pipeline
//!
//! Ingest: dataset → embed → upsert, one document per unit of work.
//! Query: embed question → top-k → optional grounded answer.

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cli::config::{Config, Credentials, SynthesisConfig, OPENAI_API_KEY_ENV};
use crate::embedding::{self, Embedder};
use crate::errors::{RagError, Result, Stage};
use crate::index::{self, IndexReader, IndexWriter, VectorIndex};
use crate::rag::state::{PipelineEvent, PipelineState};
use crate::rag::synthesis::{Answer, AnswerSynthesizer, ChatModel, OpenAiChat};
use crate::retry::RetryManager;
use crate::telemetry::{TelemetryCollector, TelemetryEvent};
use crate::types::{
    CreateOutcome, Document, EmbeddingVector, IndexEntry, IndexSpec, IndexStats, QueryResult,
};

/// A document that could not be committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub id: String,
    pub stage: Stage,
    pub message: String,
}

impl IngestFailure {
    fn new(id: &str, error: &RagError) -> Self {
        Self {
            id: id.to_string(),
            stage: error.stage(),
            message: error.user_message(),
        }
    }
}

/// Per-document outcome of one ingest run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub total: usize,
    /// Ids written, in dataset order
    pub committed: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.committed.len() == self.total
    }
}

/// Result of asking one question
#[derive(Debug)]
pub struct AskOutcome {
    pub question: String,
    pub result: QueryResult,
    /// `None` when synthesis is off
    pub answer: Option<Answer>,
    /// Synthesis failed; matches are still valid
    pub synthesis_error: Option<RagError>,
}

/// Ingest and query pipeline over one index
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    writer: IndexWriter,
    reader: IndexReader,
    synthesizer: Option<AnswerSynthesizer>,
    synthesis_enabled: bool,
    retry: RetryManager,
    spec: IndexSpec,
    top_k: usize,
    concurrency: usize,
    state: PipelineState,
    telemetry: TelemetryCollector,
    synthesis_config: SynthesisConfig,
    timeout: Duration,
}

impl RagPipeline {
    /// Wire up providers from config; fails fast on missing credentials
    pub fn from_config(
        config: &Config,
        credentials: &Credentials,
        telemetry: TelemetryCollector,
    ) -> Result<Self> {
        config.validate_credentials(credentials)?;

        let embedder = embedding::from_config(config, credentials)?;
        let index = index::from_config(config, credentials)?;
        let mut pipeline = Self::new(config, embedder, index, telemetry);

        if config.synthesis.enabled {
            let api_key = credentials.openai_api_key.clone().ok_or_else(|| {
                RagError::ConfigError(format!("{} is not set", OPENAI_API_KEY_ENV))
            })?;
            let chat = OpenAiChat::new(api_key, &config.synthesis, config.timeout())?;
            pipeline = pipeline.with_chat(Arc::new(chat));
        }

        Ok(pipeline)
    }

    /// Pipeline over explicit providers, synthesis off until a chat model is attached
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        telemetry: TelemetryCollector,
    ) -> Self {
        let retry = RetryManager::with_config(
            config.network.max_retries,
            config.network.base_delay_ms,
            config.timeout(),
        )
        .with_telemetry(telemetry.clone());
        let spec = config.index_spec();

        Self {
            writer: IndexWriter::new(index.clone(), &spec.name, spec.dimension, retry.clone()),
            reader: IndexReader::new(index.clone(), &spec.name, spec.dimension, retry.clone()),
            embedder,
            index,
            synthesizer: None,
            synthesis_enabled: false,
            retry,
            spec,
            top_k: config.retrieval.top_k,
            concurrency: config.ingest.concurrency.max(1),
            state: PipelineState::Idle,
            telemetry,
            synthesis_config: config.synthesis.clone(),
            timeout: config.timeout(),
        }
    }

    /// Attach a chat model and turn synthesis on
    pub fn with_chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.synthesizer = Some(AnswerSynthesizer::new(chat, &self.synthesis_config, self.timeout));
        self.synthesis_enabled = true;
        self
    }

    /// Create the configured index unless it already exists
    ///
    /// A newly created index is waited on until it is ready, so the
    /// first upsert never races its provisioning.
    pub async fn ensure_index(&self) -> Result<CreateOutcome> {
        let names = self.list_indexes().await?;
        if names.iter().any(|n| n == &self.spec.name) {
            debug!(index = %self.spec.name, "index already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }

        let index = &self.index;
        let spec = &self.spec;
        let outcome = self
            .retry
            .execute_with_retry(Stage::Index, || index.create_index(spec))
            .await?;
        if outcome == CreateOutcome::Created {
            index.wait_until_ready(&spec.name).await?;
        }
        info!(index = %spec.name, backend = index.backend(), ?outcome, "ensured index");
        Ok(outcome)
    }

    pub async fn list_indexes(&self) -> Result<Vec<String>> {
        let index = &self.index;
        self.retry
            .execute_with_retry(Stage::Index, || index.list_indexes())
            .await
    }

    pub async fn describe(&self) -> Result<Option<IndexStats>> {
        let index = &self.index;
        let name = self.spec.name.as_str();
        self.retry
            .execute_with_retry(Stage::Index, || index.describe(name))
            .await
    }

    /// Embed and upsert every document
    ///
    /// A failed document is reported and does not undo documents
    /// already committed. Only setup failures (no documents, index
    /// unavailable) fail the whole call.
    pub async fn ingest(&mut self, documents: &[Document]) -> Result<IngestReport> {
        self.advance(PipelineEvent::StartIngest)?;

        if documents.is_empty() {
            self.fail(Stage::Dataset);
            return Err(RagError::DatasetError("no documents to ingest".to_string()));
        }

        if let Err(e) = self.ensure_index().await {
            self.fail(e.stage());
            return Err(e);
        }

        let this: &Self = self;
        let outcomes: Vec<std::result::Result<String, IngestFailure>> = stream::iter(documents)
            .map(move |doc| this.ingest_one(doc))
            .buffered(this.concurrency)
            .collect()
            .await;

        let mut report = IngestReport {
            total: documents.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(id) => report.committed.push(id),
                Err(failure) => {
                    warn!(id = %failure.id, stage = %failure.stage, "document not ingested");
                    self.telemetry.record_failure(failure.stage);
                    report.failures.push(failure);
                }
            }
        }

        info!(
            total = report.total,
            committed = report.committed.len(),
            failed = report.failures.len(),
            "ingest finished"
        );
        self.advance(PipelineEvent::IngestFinished)?;
        Ok(report)
    }

    async fn ingest_one(&self, document: &Document) -> std::result::Result<String, IngestFailure> {
        let vector = self
            .embed(&document.text)
            .await
            .map_err(|e| IngestFailure::new(&document.id, &e))?;

        let entry = IndexEntry::new(document.id.clone(), vector, document.index_metadata());
        let written = self
            .writer
            .write(std::slice::from_ref(&entry))
            .await
            .map_err(|e| IngestFailure::new(&document.id, &e))?;

        self.telemetry.record(TelemetryEvent::EntriesUpserted {
            count: written,
            timestamp: Instant::now(),
        });
        Ok(document.id.clone())
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let started = Instant::now();
        let embedder = &self.embedder;
        let result = self
            .retry
            .execute_with_retry(Stage::Embed, || embedder.embed(text))
            .await;

        self.telemetry.record(TelemetryEvent::EmbeddingCompleted {
            duration_ms: started.elapsed().as_millis() as u64,
            success: result.is_ok(),
            timestamp: Instant::now(),
        });
        result
    }

    /// Embed a question and fetch the top-k matches, no state change
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<QueryResult> {
        let started = Instant::now();
        let vector = self.embed(question).await?;
        let result = match self.reader.query(&vector, top_k).await {
            Ok(result) => result,
            // Nothing ingested yet
            Err(RagError::IndexNotFound { name }) => {
                debug!(index = %name, "index missing, treating as empty");
                QueryResult::empty_index()
            }
            Err(e) => return Err(e),
        };

        self.telemetry.record(TelemetryEvent::QueryCompleted {
            matches: result.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Instant::now(),
        });
        Ok(result)
    }

    /// Retrieve matches and, when enabled, a grounded answer
    pub async fn ask(&mut self, question: &str) -> Result<AskOutcome> {
        self.advance(PipelineEvent::StartQuery)?;

        let result = match self.retrieve(question, self.top_k).await {
            Ok(result) => result,
            Err(e) => {
                self.fail(e.stage());
                return Err(e);
            }
        };

        if !self.synthesis_enabled() {
            self.advance(PipelineEvent::QueryFinished)?;
            return Ok(AskOutcome {
                question: question.to_string(),
                result,
                answer: None,
                synthesis_error: None,
            });
        }

        if result.is_empty() {
            self.advance(PipelineEvent::QueryFinished)?;
            return Ok(AskOutcome {
                question: question.to_string(),
                result,
                answer: Some(Answer::InsufficientContext),
                synthesis_error: None,
            });
        }

        self.advance(PipelineEvent::ContextReady)?;
        let started = Instant::now();
        let synthesized = match &self.synthesizer {
            Some(synthesizer) => synthesizer.synthesize(question, &result.matches).await,
            None => Err(RagError::SynthesisFailure("no chat model configured".to_string())),
        };

        self.telemetry.record(TelemetryEvent::AnswerSynthesized {
            duration_ms: started.elapsed().as_millis() as u64,
            success: synthesized.is_ok(),
            timestamp: Instant::now(),
        });

        match synthesized {
            Ok(answer) => {
                self.advance(PipelineEvent::AnswerFinished)?;
                Ok(AskOutcome {
                    question: question.to_string(),
                    result,
                    answer: Some(answer),
                    synthesis_error: None,
                })
            }
            Err(e) => {
                self.fail(Stage::Synthesize);
                Ok(AskOutcome {
                    question: question.to_string(),
                    result,
                    answer: None,
                    synthesis_error: Some(e),
                })
            }
        }
    }

    fn advance(&mut self, event: PipelineEvent) -> Result<()> {
        self.state = self.state.transition(event)?;
        Ok(())
    }

    /// Record a failed action and return to idle
    fn fail(&mut self, stage: Stage) {
        self.telemetry.record_failure(stage);
        if let Ok(next) = self.state.transition(PipelineEvent::Failed) {
            self.state = next;
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn set_top_k(&mut self, top_k: usize) -> Result<()> {
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than 0".to_string()));
        }
        self.top_k = top_k;
        Ok(())
    }

    /// Whether a chat model is attached at all
    pub fn synthesis_available(&self) -> bool {
        self.synthesizer.is_some()
    }

    pub fn synthesis_enabled(&self) -> bool {
        self.synthesis_enabled && self.synthesizer.is_some()
    }

    /// Toggle synthesis; returns the effective setting
    pub fn set_synthesis_enabled(&mut self, enabled: bool) -> bool {
        self.synthesis_enabled = enabled && self.synthesizer.is_some();
        self.synthesis_enabled
    }

    pub fn index_name(&self) -> &str {
        &self.spec.name
    }

    pub fn backend(&self) -> &'static str {
        self.index.backend()
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model()
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::index::MemoryIndex;

    fn offline_pipeline() -> RagPipeline {
        let mut config = Config::default().offline();
        config.embedding.dimension = 256;
        config.index.dimension = 256;
        RagPipeline::new(
            &config,
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(MemoryIndex::new()),
            TelemetryCollector::new(),
        )
    }

    #[tokio::test]
    async fn test_ask_before_ingest_is_empty_index() {
        let mut pipeline = offline_pipeline();
        let outcome = pipeline.ask("What is OneLake?").await.unwrap();
        assert!(outcome.result.is_empty());
        assert!(outcome.result.index_empty);
        assert!(pipeline.state().is_idle());
    }

    #[tokio::test]
    async fn test_ask_on_empty_index_is_flagged() {
        let mut pipeline = offline_pipeline();
        pipeline.ensure_index().await.unwrap();
        let outcome = pipeline.ask("What is OneLake?").await.unwrap();
        assert!(outcome.result.index_empty);
        assert!(outcome.answer.is_none());
    }

    #[tokio::test]
    async fn test_ingest_empty_dataset_fails() {
        let mut pipeline = offline_pipeline();
        let err = pipeline.ingest(&[]).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Dataset);
        assert!(pipeline.state().is_idle());
    }

    #[tokio::test]
    async fn test_ensure_index_is_idempotent() {
        let pipeline = offline_pipeline();
        assert_eq!(pipeline.ensure_index().await.unwrap(), CreateOutcome::Created);
        assert_eq!(pipeline.ensure_index().await.unwrap(), CreateOutcome::AlreadyExists);
    }

    /// Memory index that counts readiness waits
    struct CountingIndex {
        inner: MemoryIndex,
        waits: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VectorIndex for CountingIndex {
        fn backend(&self) -> &'static str {
            "counting"
        }

        async fn list_indexes(&self) -> Result<Vec<String>> {
            self.inner.list_indexes().await
        }

        async fn create_index(&self, spec: &IndexSpec) -> Result<CreateOutcome> {
            self.inner.create_index(spec).await
        }

        async fn wait_until_ready(&self, _name: &str) -> Result<()> {
            self.waits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn describe(&self, name: &str) -> Result<Option<IndexStats>> {
            self.inner.describe(name).await
        }

        async fn upsert(&self, name: &str, entries: &[IndexEntry]) -> Result<usize> {
            self.inner.upsert(name, entries).await
        }

        async fn query(&self, name: &str, request: &crate::types::QueryRequest) -> Result<Vec<crate::types::QueryMatch>> {
            self.inner.query(name, request).await
        }
    }

    #[tokio::test]
    async fn test_new_index_is_awaited_before_first_write() {
        let mut config = Config::default().offline();
        config.embedding.dimension = 64;
        config.index.dimension = 64;
        let index = Arc::new(CountingIndex {
            inner: MemoryIndex::new(),
            waits: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut pipeline = RagPipeline::new(
            &config,
            Arc::new(HashingEmbedder::new(64)),
            index.clone(),
            TelemetryCollector::new(),
        );

        pipeline.ingest(&crate::dataset::sample_documents()).await.unwrap();
        pipeline.ingest(&crate::dataset::sample_documents()).await.unwrap();

        // Only the run that created the index waits
        assert_eq!(index.waits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_top_k_and_synthesis_toggles() {
        let mut pipeline = offline_pipeline();
        assert!(pipeline.set_top_k(0).is_err());
        pipeline.set_top_k(5).unwrap();
        assert_eq!(pipeline.top_k(), 5);

        // No chat model attached, so synthesis cannot be turned on
        assert!(!pipeline.set_synthesis_enabled(true));
        assert!(!pipeline.synthesis_enabled());
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let result = RagPipeline::from_config(
            &Config::default(),
            &Credentials::default(),
            TelemetryCollector::new(),
        );
        assert!(matches!(result, Err(RagError::ConfigError(_))));
    }

    #[test]
    fn test_from_config_offline() {
        let pipeline = RagPipeline::from_config(
            &Config::default().offline(),
            &Credentials::default(),
            TelemetryCollector::new(),
        )
        .unwrap();
        assert_eq!(pipeline.backend(), "memory");
        assert_eq!(pipeline.embedding_model(), "hashing");
        assert!(!pipeline.synthesis_available());
    }
}
