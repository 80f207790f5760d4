//! Writes the pipeline hierarchy of a trace into a browsable directory tree.
//!
//! ```text
//! <out_root>/pipeline.json
//! <out_root>/jupytext-notebook-task--<notebook>--<span id>--<OK|FAILED>/task.json
//! <out_root>/.../run=<retry_nr>--<span id>--<OK|FAILED>/run.json
//! <out_root>/.../run=<retry_nr>--<span id>--<OK|FAILED>/<artifact name>
//! ```

use crate::extract::{pipeline_iterators, Artifact, ExtractError, TaskRecord};
use crate::notebook::{add_html_notebook_artifacts, NotebookRenderer};
use dagspan_core::Payload;
use dagspan_monitor::Spans;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Refusing to write outside the output directory: {0}")]
    UnsafePath(PathBuf),
}

/// Counts of what an export wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub tasks: usize,
    pub runs: usize,
    pub artifacts: usize,
}

/// Joins `relative` onto the absolute `root`, rejecting anything that could
/// leave it.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, ReportError> {
    let joined = root.join(relative);
    let escapes = !root.is_absolute()
        || Path::new(relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ReportError::UnsafePath(joined));
    }
    Ok(joined)
}

fn sanitize(segment: &str) -> String {
    segment.replace(['/', '.'], "-")
}

fn task_dir_name(task: &TaskRecord) -> String {
    let span_id = &task.span.span_id;
    let outcome = task.span.outcome();
    match (task.task_type(), task.notebook()) {
        (Some("jupytext"), Some(notebook)) => format!(
            "jupytext-notebook-task--{}--{}--{}",
            sanitize(notebook),
            span_id,
            outcome
        ),
        (task_type, _) => format!(
            "{}-task--{}--{}--{}",
            sanitize(task_type.unwrap_or("unknown")),
            sanitize(task.task_id().unwrap_or("unnamed")),
            span_id,
            outcome
        ),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn write_artifact(path: &Path, artifact: &Artifact) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match &artifact.content {
        Payload::Text(text) => std::fs::write(path, text)?,
        Payload::Bytes(bytes) => std::fs::write(path, bytes)?,
        structured => std::fs::write(path, serde_json::to_string_pretty(structured)?)?,
    }
    Ok(())
}

/// Exports every task, run and artifact of `spans` below `out_root`, adding
/// an HTML duplicate of each logged notebook.
pub fn write_to_output_dir(
    spans: &Spans,
    out_root: &Path,
    renderer: &dyn NotebookRenderer,
) -> Result<ExportSummary, ReportError> {
    if !out_root.is_absolute() {
        return Err(ReportError::UnsafePath(out_root.to_path_buf()));
    }
    info!("Writing tasks in trace to {}", out_root.display());

    let (pipeline, tasks) = pipeline_iterators(spans)?;
    write_json(&safe_join(out_root, "pipeline.json")?, &pipeline)?;

    let mut summary = ExportSummary::default();
    for (task, runs) in tasks {
        let task_dir = safe_join(out_root, &task_dir_name(&task))?;
        write_json(&task_dir.join("task.json"), &task)?;
        summary.tasks += 1;
        debug!(task = %task_dir.display(), "Exported task");

        for run in runs {
            let (run, artifacts) = run?;
            let retry_nr = run
                .retry_nr()
                .ok_or_else(|| ExtractError::MissingAttribute {
                    span_id: run.span.span_id.clone(),
                    key: "run.retry_nr".into(),
                })?;
            let run_dir = safe_join(
                &task_dir,
                &format!("run={}--{}--{}", retry_nr, run.span.span_id, run.span.outcome()),
            )?;
            write_json(&run_dir.join("run.json"), &run)?;
            summary.runs += 1;

            let artifacts = artifacts.collect::<Result<Vec<_>, _>>()?;
            for artifact in add_html_notebook_artifacts(artifacts, renderer) {
                let path = safe_join(&run_dir, &artifact.name)?;
                write_artifact(&path, &artifact)?;
                summary.artifacts += 1;
                debug!(artifact = %artifact.name, type_name = %artifact.type_name, "Exported artifact");
            }
        }
    }

    info!(
        tasks = summary.tasks,
        runs = summary.runs,
        artifacts = summary.artifacts,
        "Export complete"
    );
    Ok(summary)
}
