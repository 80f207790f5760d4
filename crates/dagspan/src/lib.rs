//! # dagspan
//!
//! Runs dependency-ordered notebook and code tasks with retry and timeout
//! guards, records every step as a span, and reads the resulting trace back
//! as pipeline → task → run → artifact records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dagspan::prelude::*;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PipelineEngine::new("quickstart", 2)
//!     .task(Task::from_fn("ingest", |ctx: RunContext| async move {
//!         ctx.log_value("rows", &1200)?;
//!         ctx.log_artefact("summary.txt", "1200 rows ingested")?;
//!         Ok::<(), TaskError>(())
//!     }))
//!     .task(Task::from_fn("train", |_ctx| async { Ok(()) }).depends_on(["ingest"]));
//!
//! let recorder = SpanRecorder::new();
//! engine.run(&recorder).await?;
//!
//! let summary = extract_pipeline(&recorder.spans())?;
//! assert_eq!(summary.tasks.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`core`]: attribute values and the logged value codec
//! - [`config`]: pipeline configuration files
//! - [`monitor`]: span recording, span collections, the tree index and the trace store
//! - [`engine`]: the scheduler and the retry/timeout guards
//! - [`parser`]: record extraction, directory export and diagrams

pub use dagspan_config as config;
pub use dagspan_core as core;
pub use dagspan_engine as engine;
pub use dagspan_monitor as monitor;
pub use dagspan_parser as parser;

pub use dagspan_config::{ConfigError, PipelineConfig, PipelineRegistry, TaskConfig, TaskType};
pub use dagspan_core::{AttributeValue, Attributes, CodecError, Payload, SerializedData};
pub use dagspan_engine::{
    EngineError, NotebookWork, PipelineEngine, PipelineOutcome, RunContext, Task, TaskError,
    TaskFailure, TaskState, Work, WorkerPool,
};
pub use dagspan_monitor::{DirectedTrees, Span, SpanRecorder, SpanStatus, Spans, TraceStore};
pub use dagspan_parser::{
    extract_pipeline, pipeline_iterators, write_to_output_dir, ExtractError, PlainHtmlRenderer,
    ReportError,
};

/// Commonly used types.
pub mod prelude {
    pub use dagspan_config::{PipelineConfig, TaskType};
    pub use dagspan_core::{AttributeValue, Attributes, Payload};
    pub use dagspan_engine::{PipelineEngine, RunContext, Task, TaskError, Work};
    pub use dagspan_monitor::{SpanRecorder, Spans};
    pub use dagspan_parser::{extract_pipeline, pipeline_iterators};
}
