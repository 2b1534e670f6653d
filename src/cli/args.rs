//! Command-line argument parsing for ragline
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ragline - Ingest documents into a vector index and ask questions over them
#[derive(Parser, Debug)]
#[command(name = "ragline")]
#[command(version)]
#[command(about = "Retrieval-augmented question answering over a vector index", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the local hashing embedder and in-memory index (no API keys needed)
    #[arg(long)]
    pub offline: bool,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress everything but results)
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand, defaults to `start`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Start interactive REPL mode
    Start,

    /// Embed a dataset and upsert it into the index
    Ingest {
        /// "samples", "demo", a CSV path or an http(s) URL
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Ask one question and exit
    Ask {
        /// The question to retrieve context for
        #[arg(value_name = "QUESTION", required = true, num_args = 1..)]
        question: Vec<String>,

        /// Number of matches to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Skip answer synthesis and only show matches
        #[arg(long)]
        no_answer: bool,
    },

    /// List indexes visible to the configured backend
    Indexes,

    /// Display current configuration
    Config {
        /// Write the configuration to the config file path
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}

impl Commands {
    /// Question words joined back into one string
    pub fn question_text(&self) -> Option<String> {
        match self {
            Commands::Ask { question, .. } => Some(question.join(" ").trim().to_string()),
            _ => None,
        }
    }
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Check if should show spinners and summaries
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }

    /// Check if should show per-stage details
    pub fn show_events(&self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::VeryVerbose)
    }

    /// Tracing filter directive for this level
    pub fn log_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "ragline=info",
            Verbosity::VeryVerbose => "ragline=debug",
        }
    }
}
