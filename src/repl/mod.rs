//! REPL (Read-Eval-Print Loop) for interactive question answering
//!
//! Free text is a question run through the pipeline; `/`-prefixed
//! input is a built-in command. Errors are reported and the loop keeps
//! going unless the error is fatal.

pub mod commands;
pub mod display;
pub mod input;
pub mod session;

use anyhow::Result;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::dataset::{DatasetLoader, DatasetSource};
use crate::rag::RagPipeline;
use crate::repl::commands::{is_command, Command, CommandHandler, StatusInfo};
use crate::repl::input::{InputEvent, InputHandler};

pub use crate::repl::display::DisplayManager;
pub use crate::repl::session::{IngestRecord, QueryRecord, SessionManager};

/// Events listed by `/status` in verbose mode
const RECENT_EVENTS_SHOWN: usize = 8;

/// Configuration for REPL mode
#[derive(Debug, Clone)]
pub struct ReplConfig {
    pub history_file: Option<PathBuf>,
    pub show_progress: bool,
    /// Source used by a bare `/ingest`
    pub default_source: Option<String>,
    /// Timeout for dataset downloads
    pub timeout: Duration,
}

impl Default for ReplConfig {
    fn default() -> Self {
        ReplConfig {
            history_file: None,
            show_progress: true,
            default_source: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// REPL session coordinator
pub struct ReplSession {
    pipeline: RagPipeline,
    input_handler: InputHandler,
    command_handler: CommandHandler,
    session_manager: SessionManager,
    display_manager: DisplayManager,
    config: ReplConfig,
}

impl ReplSession {
    pub fn new(pipeline: RagPipeline, config: ReplConfig) -> Result<Self> {
        let input_handler = match &config.history_file {
            Some(path) => InputHandler::with_history(path.clone())?,
            None => InputHandler::new()?,
        };

        Ok(ReplSession {
            pipeline,
            input_handler,
            command_handler: CommandHandler::new(),
            session_manager: SessionManager::new(),
            display_manager: DisplayManager::new().with_progress(config.show_progress),
            config,
        })
    }

    pub fn show_welcome(&self, version: &str) {
        self.display_manager.show_banner(
            version,
            self.pipeline.backend(),
            self.pipeline.index_name(),
            self.pipeline.embedding_model(),
        );
    }

    /// Read and handle lines until exit, EOF or a fatal error
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let line = match self.input_handler.read_line()? {
                InputEvent::Line(line) => line,
                InputEvent::Interrupted => {
                    self.display_manager.show_info("Interrupted. Type /exit to quit.");
                    continue;
                }
                InputEvent::Eof => break,
            };

            match self.handle_input(&line).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    self.display_manager.finish_with_error(&e.user_message());
                    if e.is_fatal() {
                        self.save()?;
                        return Err(e.into());
                    }
                }
            }
        }

        self.save()
    }

    /// Handle one line; `Ok(false)` ends the session
    pub async fn handle_input(&mut self, input: &str) -> crate::errors::Result<bool> {
        if input.trim().is_empty() {
            return Ok(true);
        }

        if is_command(input) {
            let command = self.command_handler.parse(input);
            return self.execute(command).await;
        }

        self.ask(input.trim()).await?;
        Ok(true)
    }

    async fn execute(&mut self, command: Command) -> crate::errors::Result<bool> {
        match command {
            Command::Help => self.command_handler.show_help(),
            Command::Exit => {
                println!("Goodbye!");
                return Ok(false);
            }
            Command::History { limit } => {
                self.command_handler
                    .show_history(&self.session_manager, limit.unwrap_or(10));
            }
            Command::Status => self.show_status().await?,
            Command::Ingest { source } => {
                let source = source.or_else(|| self.config.default_source.clone());
                self.ingest(DatasetSource::parse(source.as_deref())).await?;
            }
            Command::Indexes => {
                let names = self.pipeline.list_indexes().await?;
                self.display_manager
                    .show_indexes(&names, self.pipeline.index_name());
            }
            Command::TopK { k: None } => {
                self.display_manager
                    .show_info(&format!("top-k is {}", self.pipeline.top_k()));
            }
            Command::TopK { k: Some(k) } => match self.pipeline.set_top_k(k) {
                Ok(()) => self.display_manager.show_info(&format!("top-k set to {}", k)),
                Err(e) => self.display_manager.show_error(&e.user_message()),
            },
            Command::Answer { enable } => {
                let wanted = enable.unwrap_or(!self.pipeline.synthesis_enabled());
                let effective = self.pipeline.set_synthesis_enabled(wanted);
                if wanted && !effective {
                    self.display_manager
                        .show_warning("Answer synthesis needs a chat model; set OPENAI_API_KEY.");
                } else {
                    let status = if effective { "on" } else { "off" };
                    self.display_manager
                        .show_info(&format!("Answer synthesis {}", status));
                }
            }
            Command::Reset => {
                self.session_manager.reset();
                self.display_manager.show_info("Question history cleared.");
            }
            Command::Verbose { enable } => {
                self.command_handler.set_verbose(enable);
                let status = if enable { "enabled" } else { "disabled" };
                self.display_manager
                    .show_info(&format!("Verbose mode {}", status));
            }
            Command::Clear => {
                if let Err(e) = self.display_manager.clear_screen() {
                    warn!(error = %e, "failed to clear screen");
                }
            }
            Command::Unknown { input } => {
                self.display_manager
                    .show_error(&format!("Unknown command: {}", input));
                println!("Type /help for available commands");
            }
        }
        Ok(true)
    }

    async fn ingest(&mut self, source: DatasetSource) -> crate::errors::Result<()> {
        let started = Instant::now();
        self.display_manager
            .start_stage(&format!("Loading {}", source));
        let loader = DatasetLoader::new(source.clone(), self.config.timeout);
        let documents = match loader.load().await {
            Ok(documents) => documents,
            Err(e) => {
                self.display_manager.finish_current();
                return Err(e);
            }
        };

        self.display_manager
            .start_stage(&format!("Embedding & uploading {} documents", documents.len()));
        let result = self.pipeline.ingest(&documents).await;
        self.display_manager.finish_current();
        let report = result?;

        self.display_manager.show_ingest_report(&report);
        self.display_manager.finish_with_success(
            &format!("Ingest into '{}' finished", self.pipeline.index_name()),
            started.elapsed().as_millis() as u64,
        );
        self.session_manager
            .record_ingest(IngestRecord::from_report(source.to_string(), &report));
        Ok(())
    }

    async fn ask(&mut self, question: &str) -> crate::errors::Result<()> {
        let started = Instant::now();
        self.display_manager.start_stage("Searching");
        let result = self.pipeline.ask(question).await;
        self.display_manager.finish_current();
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record(question, 0, None, false, false, duration_ms);
                return Err(e);
            }
        };

        self.display_manager.show_matches(&outcome.result);
        if let Some(answer) = &outcome.answer {
            self.display_manager.show_answer(answer);
        }
        if let Some(e) = &outcome.synthesis_error {
            self.display_manager.show_warning(&format!(
                "{} (matches above are still valid)",
                e.user_message()
            ));
        }

        let answered = outcome.answer.as_ref().is_some_and(|a| a.text().is_some());
        let top_source = outcome.result.top().map(|m| m.source().to_string());
        self.record(
            question,
            outcome.result.len(),
            top_source,
            answered,
            outcome.synthesis_error.is_none(),
            duration_ms,
        );
        Ok(())
    }

    fn record(
        &mut self,
        question: &str,
        matches: usize,
        top_source: Option<String>,
        answered: bool,
        success: bool,
        duration_ms: u64,
    ) {
        self.session_manager.record_query(QueryRecord {
            question: question.to_string(),
            matches,
            top_source,
            answered,
            success,
            duration_ms,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn show_status(&self) -> crate::errors::Result<()> {
        let info = StatusInfo {
            backend: self.pipeline.backend().to_string(),
            index_name: self.pipeline.index_name().to_string(),
            embedding_model: self.pipeline.embedding_model().to_string(),
            top_k: self.pipeline.top_k(),
            synthesis_enabled: self.pipeline.synthesis_enabled(),
            synthesis_available: self.pipeline.synthesis_available(),
            telemetry: self.pipeline.telemetry().get_stats(),
            recent_events: if self.is_verbose() {
                self.pipeline.telemetry().recent_events(RECENT_EVENTS_SHOWN)
            } else {
                Vec::new()
            },
        };
        self.command_handler.show_status(&self.session_manager, &info);

        match self.pipeline.describe().await {
            Ok(stats) => self
                .display_manager
                .show_index_stats(stats.as_ref(), &info.index_name),
            Err(e) => self.display_manager.show_warning(&e.user_message()),
        }
        println!();
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        self.input_handler.save_history()
    }

    pub fn session(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }

    pub fn is_verbose(&self) -> bool {
        self.command_handler.is_verbose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::{Config, Credentials};
    use crate::errors::RagError;
    use crate::telemetry::TelemetryCollector;

    fn offline_session() -> ReplSession {
        let pipeline = RagPipeline::from_config(
            &Config::default().offline(),
            &Credentials::default(),
            TelemetryCollector::new(),
        )
        .unwrap();
        let config = ReplConfig {
            show_progress: false,
            ..Default::default()
        };
        ReplSession::new(pipeline, config).unwrap()
    }

    #[tokio::test]
    async fn test_handle_exit_and_help() {
        let mut session = offline_session();
        assert!(session.handle_input("/help").await.unwrap());
        assert!(!session.handle_input("/exit").await.unwrap());
    }

    #[tokio::test]
    async fn test_handle_empty_input() {
        let mut session = offline_session();
        assert!(session.handle_input("").await.unwrap());
        assert!(session.handle_input("   ").await.unwrap());
        assert_eq!(session.session().query_count(), 0);
    }

    #[tokio::test]
    async fn test_question_before_ingest() {
        let mut session = offline_session();
        assert!(session.handle_input("What is OneLake?").await.unwrap());
        assert_eq!(session.session().query_count(), 1);
        let record = session.session().get_history(1)[0].clone();
        assert_eq!(record.matches, 0);
        assert!(record.top_source.is_none());
    }

    #[tokio::test]
    async fn test_missing_dataset_is_recoverable() {
        let mut session = offline_session();
        let err = session
            .handle_input("/ingest /nonexistent/ragline.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DatasetError(_)));
        assert!(!err.is_fatal());
        assert!(session.pipeline().state().is_idle());
    }

    #[tokio::test]
    async fn test_ingest_then_ask() {
        let mut session = offline_session();
        assert!(session.handle_input("/ingest").await.unwrap());
        assert_eq!(session.session().last_ingest().unwrap().committed, 4);

        assert!(session.handle_input("What is OneLake?").await.unwrap());
        let record = session.session().get_history(1)[0].clone();
        assert!(record.success);
        assert_eq!(record.top_source.as_deref(), Some("onelake"));
        assert!(!record.answered);
    }

    #[tokio::test]
    async fn test_top_k_command() {
        let mut session = offline_session();
        assert!(session.handle_input("/topk 2").await.unwrap());
        assert_eq!(session.pipeline().top_k(), 2);

        // Rejected value leaves the setting alone and keeps the session alive
        assert!(session.handle_input("/topk 0").await.unwrap());
        assert_eq!(session.pipeline().top_k(), 2);
    }

    #[tokio::test]
    async fn test_answer_toggle_without_chat_model() {
        let mut session = offline_session();
        assert!(session.handle_input("/answer on").await.unwrap());
        assert!(!session.pipeline().synthesis_enabled());
    }

    #[tokio::test]
    async fn test_verbose_and_status() {
        let mut session = offline_session();
        assert!(!session.is_verbose());
        session.handle_input("/verbose on").await.unwrap();
        assert!(session.is_verbose());
        assert!(session.handle_input("/status").await.unwrap());
        assert!(session.handle_input("/indexes").await.unwrap());
    }
}
