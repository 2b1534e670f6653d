//! ragline - Main CLI Entry Point

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use ragline::cli::{Args, Commands, Config, Credentials, Verbosity};
use ragline::dataset::{DatasetLoader, DatasetSource};
use ragline::rag::RagPipeline;
use ragline::repl::{DisplayManager, ReplConfig, ReplSession};
use ragline::telemetry::{TelemetryCollector, TelemetryDisplay};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();
    init_tracing(verbosity);

    let result = run(&args, verbosity).await;
    if let Err(e) = &result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: &Args, verbosity: Verbosity) -> Result<()> {
    let command = args.command();
    let mut config = match (&command, &args.config) {
        // --init may target a file that does not exist yet
        (Commands::Config { init: true, .. }, Some(path)) if !path.exists() => Config::default(),
        _ => Config::load(args.config.clone())?,
    };
    if args.offline {
        config = config.offline();
    }
    config.validate()?;

    // Credentials are only needed once a pipeline is built
    let credentials = Credentials::from_env();
    let telemetry = TelemetryCollector::new();
    let build = || RagPipeline::from_config(&config, &credentials, telemetry.clone());

    match &command {
        Commands::Config { init: false, .. } => return show_config(&config),
        Commands::Config { init: true, force } => {
            return init_config(&config, args.config.clone(), *force)
        }
        Commands::Start => run_repl(&config, build()?, verbosity).await?,
        Commands::Ingest { source } => {
            let source = source.clone().or_else(|| config.ingest.source.clone());
            let mut pipeline = build()?;
            run_ingest(&config, &mut pipeline, DatasetSource::parse(source.as_deref()), verbosity)
                .await?
        }
        Commands::Ask { top_k, no_answer, .. } => {
            let question = command.question_text().unwrap_or_default();
            if question.is_empty() {
                bail!("question must not be empty");
            }
            let mut pipeline = build()?;
            if let Some(k) = top_k {
                pipeline.set_top_k(*k)?;
            }
            if *no_answer {
                pipeline.set_synthesis_enabled(false);
            }
            run_ask(&mut pipeline, &question, verbosity).await?
        }
        Commands::Indexes => {
            let pipeline = build()?;
            let names = pipeline.list_indexes().await?;
            DisplayManager::new().show_indexes(&names, pipeline.index_name());
        }
    }

    TelemetryDisplay::new(telemetry, verbosity).display_summary();
    Ok(())
}

async fn run_repl(config: &Config, pipeline: RagPipeline, verbosity: Verbosity) -> Result<()> {
    let repl_config = ReplConfig {
        history_file: Some(config.history_path()),
        show_progress: verbosity.show_progress(),
        default_source: config.ingest.source.clone(),
        timeout: config.timeout(),
    };

    let mut session = ReplSession::new(pipeline, repl_config)?;
    session.show_welcome(env!("CARGO_PKG_VERSION"));
    session.run().await
}

async fn run_ingest(
    config: &Config,
    pipeline: &mut RagPipeline,
    source: DatasetSource,
    verbosity: Verbosity,
) -> Result<()> {
    let started = Instant::now();
    let mut display = DisplayManager::new().with_progress(verbosity.show_progress());

    display.start_stage(&format!("Loading {}", source));
    let documents = DatasetLoader::new(source.clone(), config.timeout())
        .load()
        .await
        .with_context(|| format!("failed to load dataset from {}", source))?;

    display.start_stage(&format!("Embedding & uploading {} documents", documents.len()));
    let report = pipeline.ingest(&documents).await;
    display.finish_current();
    let report = report?;

    display.show_ingest_report(&report);
    if !report.is_complete() {
        bail!(
            "{} of {} documents were not ingested",
            report.failures.len(),
            report.total
        );
    }

    display.finish_with_success(
        &format!("Index '{}' is ready", pipeline.index_name()),
        started.elapsed().as_millis() as u64,
    );
    Ok(())
}

async fn run_ask(pipeline: &mut RagPipeline, question: &str, verbosity: Verbosity) -> Result<()> {
    let mut display = DisplayManager::new().with_progress(verbosity.show_progress());

    display.start_stage("Searching");
    let outcome = pipeline.ask(question).await;
    display.finish_current();
    let outcome = outcome?;

    display.show_matches(&outcome.result);
    if let Some(answer) = &outcome.answer {
        display.show_answer(answer);
    }
    if let Some(e) = outcome.synthesis_error {
        bail!(e.user_message());
    }
    Ok(())
}

fn init_config(config: &Config, path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path
        .or_else(Config::default_path)
        .context("no home directory; pass --config <path>")?;
    config.init(&path, force)?;
    println!("{} wrote {}", "✓".green(), path.display());
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;

    println!("{}", "ragline configuration".bold().cyan());
    println!("{}", "-".repeat(60).cyan());
    println!("{}", rendered);
    println!("{}", "Credentials".bold());
    println!("  {:?}", Credentials::from_env());
    println!("  History file: {}", config.history_path().display());
    Ok(())
}
