//! Doctran CLI entry point.
//!
//! Loads [`doctran::config::DoctranConfig`], submits one translation job to
//! a freshly built [`doctran::job::Orchestrator`], and polls it to
//! completion -- a thin one-shot surface for local testing, not a daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use doctran::config::DoctranConfig;
use doctran::job::{DocumentKind, JobConfig, JobStatus, Orchestrator};

/// Doctran -- LLM-backed translation of plain text, EPUB and SRT documents.
#[derive(Parser)]
#[command(name = "doctran", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Translate a single document and write the result to disk.
    Translate(TranslateArgs),
}

/// Which document format the `--input` file holds.
#[derive(Clone, Copy, ValueEnum)]
enum DocumentKindArg {
    /// Plain UTF-8 text.
    Text,
    /// EPUB container.
    Epub,
    /// SubRip subtitles.
    Srt,
}

impl From<DocumentKindArg> for DocumentKind {
    fn from(arg: DocumentKindArg) -> Self {
        match arg {
            DocumentKindArg::Text => DocumentKind::PlainText,
            DocumentKindArg::Epub => DocumentKind::Epub,
            DocumentKindArg::Srt => DocumentKind::Srt,
        }
    }
}

#[derive(clap::Args)]
struct TranslateArgs {
    /// Document format of `--input`.
    #[arg(long, value_enum)]
    kind: DocumentKindArg,
    /// Path to the source document.
    #[arg(long)]
    input: PathBuf,
    /// Path the translated document is written to.
    #[arg(long)]
    output: PathBuf,
    /// Source language name.
    #[arg(long, default_value = "English")]
    source_language: String,
    /// Target language name.
    #[arg(long)]
    target_language: String,
    /// Run a second LLM pass to improve fluidity after each unit translates.
    #[arg(long)]
    post_process: bool,
    /// Directory structured JSON logs are written to. Console-only logging if omitted.
    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Translate(args) => handle_translate(args).await,
    }
}

async fn handle_translate(args: TranslateArgs) -> anyhow::Result<()> {
    let _logging_guard = match &args.logs_dir {
        Some(dir) => Some(doctran::logging::init_production(dir)?),
        None => {
            doctran::logging::init_cli();
            None
        }
    };

    let config = DoctranConfig::load().context("failed to load doctran config")?;

    let source = std::fs::read(&args.input)
        .with_context(|| format!("failed to read input file {}", args.input.display()))?;

    let job_config = JobConfig {
        kind: args.kind.into(),
        source,
        output_path: args.output.clone(),
        source_language: args.source_language,
        target_language: args.target_language,
        custom_instructions: String::new(),
        enable_post_processing: args.post_process,
        post_processing_instructions: String::new(),
    };

    let orchestrator = Arc::new(Orchestrator::new(config));
    let id = orchestrator.submit(job_config).await;
    tracing::info!(job_id = %id, "submitted translation job");

    loop {
        let snapshot = orchestrator
            .status(id)
            .await
            .context("job vanished from the orchestrator while polling")?;
        tracing::info!(
            job_id = %id,
            progress = snapshot.progress,
            completed = snapshot.stats.completed,
            failed = snapshot.stats.failed,
            total = snapshot.stats.total,
            "translation progress"
        );
        match snapshot.status {
            JobStatus::Queued | JobStatus::Running => {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            JobStatus::Completed => {
                println!("translation complete: {}", args.output.display());
                return Ok(());
            }
            JobStatus::Interrupted => {
                anyhow::bail!("translation was interrupted");
            }
            JobStatus::Error => {
                anyhow::bail!("translation failed: {}", snapshot.error.unwrap_or_default());
            }
        }
    }
}
