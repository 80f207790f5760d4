//! Reads pipeline structure back out of a frozen span collection.
//!
//! - [`pipeline_iterators`] / [`extract_pipeline`]: pipeline → task → run → artifact records
//! - [`write_to_output_dir`]: directory export of the same hierarchy
//! - [`make_mermaid_gantt`] / [`make_mermaid_dag`]: diagram input text
//! - [`add_html_notebook_artifacts`]: HTML duplicates of logged notebooks
//!
//! # Example
//!
//! ```rust,no_run
//! use dagspan_monitor::Spans;
//! use dagspan_parser::extract_pipeline;
//!
//! let spans = Spans::from_json(&std::fs::read_to_string("spans.json")?)?;
//! for task in extract_pipeline(&spans)?.tasks {
//!     println!("{:?}: {} runs", task.task.notebook(), task.runs.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod export;
mod extract;
mod mermaid;
mod notebook;

#[cfg(test)]
mod fixtures;

pub use export::{safe_join, write_to_output_dir, ExportSummary, ReportError};
pub use extract::{
    extract_pipeline, pipeline_iterators, Artifact, ArtifactIter, ExtractError, LoggedValue,
    PipelineRecord, PipelineSummary, RunIter, RunRecord, RunSummary, SpanSummary, TaskIter,
    TaskRecord, TaskSummary,
};
pub use mermaid::{make_mermaid_dag, make_mermaid_gantt, render_seconds};
pub use notebook::{add_html_notebook_artifacts, NotebookRenderer, PlainHtmlRenderer};
