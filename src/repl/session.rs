//! Session manager for REPL question history
//!
//! Keeps a bounded record of questions asked and ingest runs made
//! during one interactive session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::rag::IngestReport;

/// Maximum number of questions to keep in history
const MAX_HISTORY_SIZE: usize = 1000;

/// Record of one asked question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub question: String,
    pub matches: usize,
    /// Source of the best match, if any
    pub top_source: Option<String>,
    pub answered: bool,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Summary of the last ingest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub source: String,
    pub total: usize,
    pub committed: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

impl IngestRecord {
    pub fn from_report(source: impl Into<String>, report: &IngestReport) -> Self {
        Self {
            source: source.into(),
            total: report.total,
            committed: report.committed.len(),
            failed: report.failures.len(),
            timestamp: Utc::now(),
        }
    }
}

/// Session manager maintaining REPL state
pub struct SessionManager {
    /// Question history (FIFO queue, max 1000 entries)
    history: VecDeque<QueryRecord>,

    last_ingest: Option<IngestRecord>,

    session_start: DateTime<Utc>,

    /// Total questions asked, including evicted ones
    query_count: usize,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            history: VecDeque::with_capacity(64),
            last_ingest: None,
            session_start: Utc::now(),
            query_count: 0,
        }
    }

    pub fn record_query(&mut self, record: QueryRecord) {
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(record);
        self.query_count += 1;
    }

    pub fn record_ingest(&mut self, record: IngestRecord) {
        self.last_ingest = Some(record);
    }

    /// Question history, newest first
    pub fn get_history(&self, limit: usize) -> Vec<&QueryRecord> {
        self.history.iter().rev().take(limit).collect()
    }

    pub fn last_ingest(&self) -> Option<&IngestRecord> {
        self.last_ingest.as_ref()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_ingest = None;
        self.query_count = 0;
        self.session_start = Utc::now();
    }

    pub fn query_count(&self) -> usize {
        self.query_count
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Session duration in seconds
    pub fn session_duration(&self) -> u64 {
        (Utc::now() - self.session_start).num_seconds().max(0) as u64
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
