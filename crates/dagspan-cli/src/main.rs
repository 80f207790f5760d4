mod github;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dagspan_config::{github_env_attributes, PipelineConfig};
use dagspan_engine::PipelineEngine;
use dagspan_monitor::{SpanRecorder, Spans, TraceStore};
use dagspan_parser::{make_mermaid_dag, make_mermaid_gantt, write_to_output_dir, PlainHtmlRenderer};
use tracing::info;

use crate::github::GithubArtifacts;

#[derive(Parser)]
#[command(name = "dagspan", version, about = "Run notebook pipelines and inspect their traces")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a pipeline configuration and write its span trace
    Run {
        #[arg(long)]
        pipeline: PathBuf,
        #[arg(long)]
        spans_out: PathBuf,
        #[arg(long, env = "DAGSPAN_WORKERS")]
        workers: Option<usize>,
        /// Also archive the trace into this SQLite database
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Export tasks, runs and artifacts of a span trace
    Parse {
        #[arg(long)]
        input_span_file: PathBuf,
        #[arg(long)]
        output_directory: Option<PathBuf>,
        #[arg(long)]
        output_filepath_mermaid_gantt: Option<PathBuf>,
        #[arg(long)]
        output_filepath_mermaid_dag: Option<PathBuf>,
    },
    /// GitHub Actions artifacts of a repository
    Artifacts {
        #[command(subcommand)]
        command: ArtifactsCommand,
    },
}

#[derive(Subcommand)]
enum ArtifactsCommand {
    List {
        #[arg(long)]
        repo: String,
    },
    Download {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    match Cli::parse().command {
        Command::Run {
            pipeline,
            spans_out,
            workers,
            db,
        } => run(&pipeline, &spans_out, workers, db.as_deref()).await,
        Command::Parse {
            input_span_file,
            output_directory,
            output_filepath_mermaid_gantt,
            output_filepath_mermaid_dag,
        } => parse(
            &input_span_file,
            output_directory.as_deref(),
            output_filepath_mermaid_gantt.as_deref(),
            output_filepath_mermaid_dag.as_deref(),
        ),
        Command::Artifacts { command } => artifacts(command).await,
    }
}

async fn run(pipeline: &Path, spans_out: &Path, workers: Option<usize>, db: Option<&Path>) -> Result<()> {
    let mut config = PipelineConfig::from_file(pipeline)
        .with_context(|| format!("Failed to load pipeline {}", pipeline.display()))?;
    config.engine.apply_env_overrides()?;
    if let Some(workers) = workers {
        config.engine.workers = workers;
    }

    let engine = PipelineEngine::from_config(&config)?.pipeline_attributes(github_env_attributes());
    let recorder = SpanRecorder::new();
    let outcome = engine.run(&recorder).await?;

    let spans = recorder.spans();
    std::fs::write(spans_out, serde_json::to_string_pretty(&spans)?)
        .with_context(|| format!("Failed to write spans to {}", spans_out.display()))?;
    info!("Wrote {} spans to {}", spans.len(), spans_out.display());

    if let Some(db) = db {
        let store = TraceStore::new(db).with_context(|| format!("Failed to open {}", db.display()))?;
        let inserted = store.insert_spans(&spans)?;
        info!("Archived {} spans of trace {} into {}", inserted, recorder.trace_id(), db.display());
    }

    if !outcome.is_success() {
        bail!("Pipeline {} failed tasks: {}", config.id, outcome.failed().join(", "));
    }
    Ok(())
}

fn parse(
    input_span_file: &Path,
    output_directory: Option<&Path>,
    gantt: Option<&Path>,
    dag: Option<&Path>,
) -> Result<()> {
    let json = std::fs::read_to_string(input_span_file)
        .with_context(|| format!("Failed to read {}", input_span_file.display()))?;
    let spans = Spans::from_json(&json).context("Span file is not a JSON list of spans")?;
    info!("Number of spans loaded {}", spans.len());

    if let Some(dir) = output_directory {
        let dir = std::path::absolute(dir)?;
        write_to_output_dir(&spans, &dir, &PlainHtmlRenderer)?;
    }
    if let Some(path) = gantt {
        std::fs::write(path, make_mermaid_gantt(&spans)?)?;
    }
    if let Some(path) = dag {
        std::fs::write(path, make_mermaid_dag(&spans)?)?;
    }
    Ok(())
}

async fn artifacts(command: ArtifactsCommand) -> Result<()> {
    match command {
        ArtifactsCommand::List { repo } => {
            let client = GithubArtifacts::from_env(&repo)?;
            for artifact in client.list().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    artifact.id,
                    artifact.name,
                    artifact.size_in_bytes,
                    if artifact.expired { "expired" } else { "available" }
                );
            }
        }
        ArtifactsCommand::Download { repo, id, out } => {
            let client = GithubArtifacts::from_env(&repo)?;
            match client.download(id).await? {
                Some(bytes) => {
                    std::fs::write(&out, &bytes)
                        .with_context(|| format!("Failed to write {}", out.display()))?;
                    info!("Downloaded artifact {} ({} bytes) to {}", id, bytes.len(), out.display());
                }
                None => bail!("Artifact {} has expired", id),
            }
        }
    }
    Ok(())
}
