//! Display manager for terminal output
//!
//! Spinners for the slow stages plus formatted matches, answers and
//! ingest reports. Shared by the REPL and the one-shot subcommands.

use colored::*;
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::time::Duration;

use crate::rag::{Answer, IngestReport};
use crate::types::{IndexStats, QueryMatch, QueryResult};

/// Longest passage preview printed per match
const PREVIEW_CHARS: usize = 240;

pub struct DisplayManager {
    current_bar: Option<ProgressBar>,
    update_interval: Duration,
    /// Spinners off in quiet mode
    show_progress: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        DisplayManager {
            current_bar: None,
            update_interval: Duration::from_millis(100),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn show_banner(&self, version: &str, backend: &str, index: &str, model: &str) {
        let width = 64;
        let rule = "=".repeat(width);
        println!("\n{}", rule.cyan());
        println!("{}", format!("  ragline {} - Ask your documents", version).bold().cyan());
        println!(
            "{}",
            format!("  Index: {} ({}) | Embeddings: {}", index, backend, model).dimmed()
        );
        println!("{}\n", rule.cyan());
        println!(
            "Type a question (or {} for commands, {} to quit)\n",
            "/help".green(),
            "/exit".green()
        );
    }

    /// Start a spinner for a pipeline stage, replacing any running one
    pub fn start_stage(&mut self, message: &str) -> Option<ProgressBar> {
        self.finish_current();
        if !self.show_progress {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(self.update_interval);

        self.current_bar = Some(pb.clone());
        Some(pb)
    }

    pub fn finish_current(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_and_clear();
        }
    }

    pub fn finish_with_success(&mut self, message: &str, duration_ms: u64) {
        self.finish_current();
        if self.show_progress {
            println!("{} {} {}", "✓".green(), message, format!("({}ms)", duration_ms).dimmed());
        }
    }

    pub fn finish_with_error(&mut self, message: &str) {
        self.finish_current();
        println!("{} {}", "✗".red(), message.red());
    }

    /// Ranked matches, best first
    pub fn show_matches(&self, result: &QueryResult) {
        if result.index_empty {
            self.show_warning("The index is empty. Run /ingest (or `ragline ingest`) first.");
            return;
        }
        if result.is_empty() {
            self.show_info("No matches found.");
            return;
        }

        self.show_section(&format!("Top {} matches", result.len()));
        for (i, m) in result.matches.iter().enumerate() {
            println!("{}", format_match(i + 1, m));
        }
        println!();
    }

    pub fn show_answer(&self, answer: &Answer) {
        match answer {
            Answer::Generated { text, model, sources } => {
                self.show_section("Answer");
                println!("{}", text);
                let cited = if sources.is_empty() {
                    "none".to_string()
                } else {
                    sources.join(", ")
                };
                println!("\n{}", format!("model: {} | sources: {}", model, cited).dimmed());
                println!();
            }
            Answer::InsufficientContext => {
                self.show_warning("Not enough context in the index to answer that question.");
            }
        }
    }

    pub fn show_ingest_report(&self, report: &IngestReport) {
        let summary = format!(
            "Ingested {}/{} documents",
            report.committed.len(),
            report.total
        );
        if report.is_complete() {
            println!("{} {}", "✓".green(), summary.green());
        } else {
            println!("{} {}", "!".yellow(), summary.yellow());
            for failure in &report.failures {
                println!("  {} {}: {}", "✗".red(), failure.id.bold(), failure.message);
            }
        }
    }

    pub fn show_indexes(&self, names: &[String], current: &str) {
        if names.is_empty() {
            self.show_info("No indexes found.");
            return;
        }
        self.show_section(&format!("Indexes ({})", names.len()));
        for name in names {
            if name == current {
                println!("  {} {}", "•".green(), name.green().bold());
            } else {
                println!("  {} {}", "•".cyan(), name);
            }
        }
        println!();
    }

    pub fn show_index_stats(&self, stats: Option<&IndexStats>, name: &str) {
        match stats {
            Some(stats) => {
                let dimension = stats
                    .dimension
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let metric = stats.metric.map(|m| m.as_str()).unwrap_or("?");
                println!("  Index:            {}", stats.name.green());
                println!("  Vectors:          {}", stats.vector_count.to_string().green());
                println!("  Dimension:        {}", dimension.green());
                println!("  Metric:           {}", metric.green());
            }
            None => {
                println!("  Index:            {} {}", name.yellow(), "(not created yet)".dimmed());
            }
        }
    }

    pub fn show_error(&self, error: &str) {
        println!("{} {}", "Error:".red().bold(), error.red());
    }

    pub fn show_warning(&self, warning: &str) {
        println!("{} {}", "Warning:".yellow().bold(), warning.yellow());
    }

    pub fn show_info(&self, info: &str) {
        println!("{} {}", "Info:".cyan(), info);
    }

    pub fn clear_screen(&self) -> io::Result<()> {
        execute!(io::stdout(), Clear(ClearType::All), cursor::MoveTo(0, 0))
    }

    pub fn show_section(&self, title: &str) {
        println!("\n{}", title.bold().cyan());
        println!("{}", "-".repeat(60).cyan());
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

/// One match as `"  n. [score] source\n     preview"`
pub fn format_match(rank: usize, m: &QueryMatch) -> String {
    let mut line = format!(
        "  {}. [{:.4}] {}",
        rank.to_string().cyan(),
        m.score,
        m.source().bold()
    );
    if let Some(text) = m.text() {
        line.push_str("\n     ");
        line.push_str(&preview(text, PREVIEW_CHARS));
    }
    line
}

/// First `max` characters of `text` on one line, with an ellipsis when cut
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut cut: String = flat.chars().take(max).collect();
    cut.push('…');
    cut
}
