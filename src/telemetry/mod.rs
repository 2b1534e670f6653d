//! Telemetry system for ragline
//!
//! Counts pipeline events for the session summary and `/status`. Only the
//! most recent events are kept; the counters cover the whole session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::errors::Stage;

/// Telemetry event types
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    EmbeddingCompleted {
        duration_ms: u64,
        success: bool,
        timestamp: Instant,
    },
    EntriesUpserted {
        count: usize,
        timestamp: Instant,
    },
    QueryCompleted {
        matches: usize,
        duration_ms: u64,
        timestamp: Instant,
    },
    AnswerSynthesized {
        duration_ms: u64,
        success: bool,
        timestamp: Instant,
    },
    RetryAttempt {
        stage: Stage,
        attempt: u32,
        timestamp: Instant,
    },
    StageFailed {
        stage: Stage,
        timestamp: Instant,
    },
}

impl TelemetryEvent {
    fn timestamp(&self) -> Instant {
        match self {
            TelemetryEvent::EmbeddingCompleted { timestamp, .. }
            | TelemetryEvent::EntriesUpserted { timestamp, .. }
            | TelemetryEvent::QueryCompleted { timestamp, .. }
            | TelemetryEvent::AnswerSynthesized { timestamp, .. }
            | TelemetryEvent::RetryAttempt { timestamp, .. }
            | TelemetryEvent::StageFailed { timestamp, .. } => *timestamp,
        }
    }

    /// One line for `/status`, with the event's age
    pub fn describe(&self) -> String {
        let what = match self {
            TelemetryEvent::EmbeddingCompleted { duration_ms, success, .. } => {
                format!("embedding {} in {}ms", outcome(*success), duration_ms)
            }
            TelemetryEvent::EntriesUpserted { count, .. } => format!("upserted {} entries", count),
            TelemetryEvent::QueryCompleted { matches, duration_ms, .. } => {
                format!("query returned {} matches in {}ms", matches, duration_ms)
            }
            TelemetryEvent::AnswerSynthesized { duration_ms, success, .. } => {
                format!("answer {} in {}ms", outcome(*success), duration_ms)
            }
            TelemetryEvent::RetryAttempt { stage, attempt, .. } => {
                format!("retry {} of {}", attempt, stage)
            }
            TelemetryEvent::StageFailed { stage, .. } => format!("{} failed", stage),
        };
        format!("{:>6.1}s ago  {}", self.timestamp().elapsed().as_secs_f64(), what)
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "ok"
    } else {
        "failed"
    }
}

/// Events kept for `/status`
pub const MAX_RECENT_EVENTS: usize = 100;

/// Telemetry statistics
#[derive(Debug, Clone, Default)]
pub struct TelemetryStats {
    pub embeddings: usize,
    pub embedding_failures: usize,
    pub entries_upserted: usize,
    pub queries: usize,
    pub answers: usize,
    pub synthesis_failures: usize,
    pub retry_attempts: usize,
    pub stage_failures: usize,
}

/// Telemetry collector
#[derive(Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<VecDeque<TelemetryEvent>>>,
    stats: Arc<Mutex<TelemetryStats>>,
    start_time: Instant,
}

impl TelemetryCollector {
    /// Create a new telemetry collector
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_RECENT_EVENTS))),
            stats: Arc::new(Mutex::new(TelemetryStats::default())),
            start_time: Instant::now(),
        }
    }

    /// Record an event
    pub fn record(&self, event: TelemetryEvent) {
        if let Ok(mut stats) = self.stats.lock() {
            match &event {
                TelemetryEvent::EmbeddingCompleted { success, .. } => {
                    if *success {
                        stats.embeddings += 1;
                    } else {
                        stats.embedding_failures += 1;
                    }
                }
                TelemetryEvent::EntriesUpserted { count, .. } => {
                    stats.entries_upserted += count;
                }
                TelemetryEvent::QueryCompleted { .. } => {
                    stats.queries += 1;
                }
                TelemetryEvent::AnswerSynthesized { success, .. } => {
                    if *success {
                        stats.answers += 1;
                    } else {
                        stats.synthesis_failures += 1;
                    }
                }
                TelemetryEvent::RetryAttempt { .. } => {
                    stats.retry_attempts += 1;
                }
                TelemetryEvent::StageFailed { .. } => {
                    stats.stage_failures += 1;
                }
            }
        }

        if let Ok(mut events) = self.events.lock() {
            if events.len() == MAX_RECENT_EVENTS {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    /// Convenience for a failed stage
    pub fn record_failure(&self, stage: Stage) {
        self.record(TelemetryEvent::StageFailed {
            stage,
            timestamp: Instant::now(),
        });
    }

    /// Get current statistics
    pub fn get_stats(&self) -> TelemetryStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self, n: usize) -> Vec<TelemetryEvent> {
        match self.events.lock() {
            Ok(events) => {
                let start = events.len().saturating_sub(n);
                events.iter().skip(start).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Share of embedding calls that succeeded
    pub fn embedding_success_rate(&self) -> f64 {
        let stats = self.get_stats();
        let total = stats.embeddings + stats.embedding_failures;
        if total == 0 {
            1.0
        } else {
            stats.embeddings as f64 / total as f64
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Session summary printer
pub struct TelemetryDisplay {
    collector: TelemetryCollector,
    verbosity: crate::cli::Verbosity,
}

impl TelemetryDisplay {
    pub fn new(collector: TelemetryCollector, verbosity: crate::cli::Verbosity) -> Self {
        Self {
            collector,
            verbosity,
        }
    }

    /// Display summary statistics
    pub fn display_summary(&self) {
        if !self.verbosity.show_progress() {
            return;
        }

        let stats = self.collector.get_stats();
        let elapsed = self.collector.elapsed();

        println!("\nSession Summary");
        println!("─────────────────────────────────────");
        println!("Duration:          {:.1}s", elapsed.as_secs_f64());
        println!("Embeddings:        {}", stats.embeddings);
        println!("Embed success:     {:.1}%", self.collector.embedding_success_rate() * 100.0);
        println!("Entries upserted:  {}", stats.entries_upserted);
        println!("Queries:           {}", stats.queries);
        println!("Answers:           {}", stats.answers);
        println!("Retries:           {}", stats.retry_attempts);
        println!("Failures:          {}", stats.stage_failures);
        println!();
    }
}
