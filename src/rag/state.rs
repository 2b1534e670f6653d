//! Session state machine
//!
//! One pipeline action runs at a time. Valid transitions:
//! - Idle      → Ingesting  (on: StartIngest)
//! - Ingesting → Idle       (on: IngestFinished | Failed)
//! - Idle      → Querying   (on: StartQuery)
//! - Querying  → Answering  (on: ContextReady)
//! - Querying  → Idle       (on: QueryFinished | Failed)
//! - Answering → Idle       (on: AnswerFinished | Failed)
//!
//! Everything else is rejected with `InvalidTransition`.

use serde::{Deserialize, Serialize};

use crate::errors::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Ingesting,
    Querying,
    Answering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    StartIngest,
    IngestFinished,
    StartQuery,
    /// Matches retrieved and synthesis is enabled
    ContextReady,
    /// Retrieval done, no synthesis to run
    QueryFinished,
    AnswerFinished,
    /// The running action failed
    Failed,
}

impl PipelineState {
    pub fn transition(&self, event: PipelineEvent) -> Result<PipelineState> {
        use PipelineEvent::*;
        use PipelineState::*;

        let next = match (self, event) {
            (Idle, StartIngest) => Ingesting,
            (Ingesting, IngestFinished) => Idle,

            (Idle, StartQuery) => Querying,
            (Querying, ContextReady) => Answering,
            (Querying, QueryFinished) => Idle,
            (Answering, AnswerFinished) => Idle,

            (Ingesting | Querying | Answering, Failed) => Idle,

            (from, event) => {
                return Err(RagError::InvalidTransition {
                    from: format!("{:?}", from),
                    event: format!("{:?}", event),
                });
            }
        };

        Ok(next)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PipelineState::Idle)
    }

    /// Human-readable state name
    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Ingesting => "Embedding & uploading",
            PipelineState::Querying => "Searching",
            PipelineState::Answering => "Answering",
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState::Idle
    }
}
