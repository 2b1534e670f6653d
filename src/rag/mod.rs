//! Retrieval-augmented question answering
//!
//! - State: one action at a time per session
//! - Context: bounded, numbered passages from the matches
//! - Synthesis: one chat call grounded in that context
//! - Pipeline: ingest and query orchestration

pub mod context;
pub mod pipeline;
pub mod state;
pub mod synthesis;

pub use context::{AssembledContext, ContextBuilder};
pub use pipeline::{AskOutcome, IngestFailure, IngestReport, RagPipeline};
pub use state::{PipelineEvent, PipelineState};
pub use synthesis::{Answer, AnswerSynthesizer, ChatModel, OpenAiChat};
