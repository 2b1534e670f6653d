//! Command parsing for REPL built-in commands
//!
//! Anything starting with `/` is a command; everything else is a question.

use colored::*;

use crate::repl::session::SessionManager;
use crate::telemetry::{TelemetryEvent, TelemetryStats};

/// REPL command types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    History { limit: Option<usize> },
    Status,
    /// Re-run ingestion, optionally from another source
    Ingest { source: Option<String> },
    Indexes,
    /// Show (None) or set the number of matches
    TopK { k: Option<usize> },
    /// Toggle (None) or set answer synthesis
    Answer { enable: Option<bool> },
    Reset,
    Exit,
    Verbose { enable: bool },
    Clear,
    Unknown { input: String },
}

/// Snapshot of pipeline settings shown by `/status`
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub backend: String,
    pub index_name: String,
    pub embedding_model: String,
    pub top_k: usize,
    pub synthesis_enabled: bool,
    pub synthesis_available: bool,
    pub telemetry: TelemetryStats,
    /// Latest pipeline events, filled in verbose mode
    pub recent_events: Vec<TelemetryEvent>,
}

pub struct CommandHandler {
    verbose: bool,
}

impl CommandHandler {
    pub fn new() -> Self {
        CommandHandler { verbose: false }
    }

    pub fn parse(&self, input: &str) -> Command {
        let trimmed = input.trim();
        let unknown = || Command::Unknown {
            input: input.to_string(),
        };

        let Some(rest) = trimmed.strip_prefix('/') else {
            return unknown();
        };
        let parts: Vec<&str> = rest.split_whitespace().collect();
        let Some(name) = parts.first() else {
            return unknown();
        };

        match name.to_lowercase().as_str() {
            "help" | "h" => Command::Help,
            "exit" | "quit" | "q" => Command::Exit,
            "history" => Command::History {
                limit: parts.get(1).and_then(|s| s.parse().ok()),
            },
            "status" => Command::Status,
            "ingest" => Command::Ingest {
                source: parts.get(1).map(|s| s.to_string()),
            },
            "indexes" | "indices" => Command::Indexes,
            "topk" | "k" => match parts.get(1) {
                None => Command::TopK { k: None },
                Some(s) => match s.parse() {
                    Ok(k) => Command::TopK { k: Some(k) },
                    Err(_) => unknown(),
                },
            },
            "answer" => match parts.get(1).map(|s| s.to_lowercase()) {
                None => Command::Answer { enable: None },
                Some(s) => match parse_switch(&s) {
                    Some(enable) => Command::Answer {
                        enable: Some(enable),
                    },
                    None => unknown(),
                },
            },
            "reset" => Command::Reset,
            "verbose" => Command::Verbose {
                enable: parts
                    .get(1)
                    .map(|s| parse_switch(&s.to_lowercase()).unwrap_or(false))
                    .unwrap_or(true),
            },
            "clear" | "cls" => Command::Clear,
            _ => unknown(),
        }
    }

    pub fn show_help(&self) {
        println!("\n{}", "Available Commands:".bold().cyan());
        println!("{}", "=".repeat(60).cyan());

        let commands = [
            ("/help, /h", "Show this help message"),
            ("/ingest [source]", "Embed and upload documents (samples, demo, path, URL)"),
            ("/indexes", "List indexes on the backend"),
            ("/status", "Show index and session statistics"),
            ("/topk [n]", "Show or set the number of matches"),
            ("/answer [on|off]", "Toggle answer synthesis"),
            ("/history [n]", "Show last n questions (default: 10)"),
            ("/reset", "Clear question history"),
            ("/verbose [on|off]", "Toggle verbose output"),
            ("/clear, /cls", "Clear screen"),
            ("/exit, /quit, /q", "Exit REPL"),
        ];

        for (cmd, desc) in commands {
            println!("  {:<20} {}", cmd.green(), desc);
        }

        println!("\n{}", "Usage:".bold());
        println!("  - Type a question directly (no / prefix)");
        println!("  - Use {} for input history", "UP/DOWN arrows".cyan());
        println!("  - Press {} or {} to exit", "Ctrl-D".cyan(), "/exit".cyan());
        println!();
    }

    pub fn show_history(&self, session: &SessionManager, limit: usize) {
        let history = session.get_history(limit);
        if history.is_empty() {
            println!("{}", "No questions in history yet.".yellow());
            return;
        }

        println!(
            "\n{}",
            format!("Question History (last {}):", history.len()).bold().cyan()
        );
        println!("{}", "=".repeat(60).cyan());

        for (i, record) in history.iter().enumerate() {
            let index = history.len() - i;
            let status_icon = if record.success { "✓".green() } else { "✗".red() };
            let duration = format!("({}ms)", record.duration_ms).dimmed();

            println!(
                "  {}. {} {} {}",
                index.to_string().cyan(),
                status_icon,
                record.question,
                duration
            );

            if self.verbose {
                let top = record.top_source.as_deref().unwrap_or("-");
                println!(
                    "     {}",
                    format!(
                        "{} matches, top: {}, answered: {}",
                        record.matches,
                        top,
                        if record.answered { "yes" } else { "no" }
                    )
                    .dimmed()
                );
            }
        }
        println!();
    }

    pub fn show_status(&self, session: &SessionManager, info: &StatusInfo) {
        println!("\n{}", "Session Status:".bold().cyan());
        println!("{}", "=".repeat(60).cyan());

        println!("  Backend:          {}", info.backend.green());
        println!("  Embeddings:       {}", info.embedding_model.green());
        println!("  Top-k:            {}", info.top_k.to_string().green());
        let answers = match (info.synthesis_available, info.synthesis_enabled) {
            (false, _) => "Unavailable".dimmed(),
            (true, true) => "On".green(),
            (true, false) => "Off".red(),
        };
        println!("  Answers:          {}", answers);
        println!("  Questions:        {}", session.query_count().to_string().green());
        if let Some(ingest) = session.last_ingest() {
            println!(
                "  Last ingest:      {}/{} from {}",
                ingest.committed.to_string().green(),
                ingest.total,
                ingest.source
            );
        }
        println!(
            "  Embeddings made:  {}",
            info.telemetry.embeddings.to_string().green()
        );
        println!(
            "  Entries upserted: {}",
            info.telemetry.entries_upserted.to_string().green()
        );
        println!("  Retries:          {}", info.telemetry.retry_attempts);
        println!("  Session Duration: {}", format_duration(session.session_duration()).green());
        println!("  Verbose Mode:     {}", if self.verbose { "On".green() } else { "Off".red() });

        if !info.recent_events.is_empty() {
            println!("\n{}", "Recent events:".bold());
            for event in &info.recent_events {
                println!("  {}", event.describe().dimmed());
            }
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, enable: bool) {
        self.verbose = enable;
    }
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if input is a command (starts with /)
pub fn is_command(input: &str) -> bool {
    input.trim().starts_with('/')
}

fn parse_switch(s: &str) -> Option<bool> {
    match s {
        "on" | "1" | "true" | "yes" => Some(true),
        "off" | "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
