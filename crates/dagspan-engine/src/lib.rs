//! DAG task execution with retry and timeout guards.
//!
//! Every step of a run is recorded as a span in a shared [`SpanRecorder`]:
//!
//! ```rust,no_run
//! use dagspan_engine::{PipelineEngine, RunContext, Task, TaskError};
//! use dagspan_monitor::SpanRecorder;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PipelineEngine::new("demo", 2)
//!     .task(Task::from_fn("extract", |ctx: RunContext| async move {
//!         ctx.log_value("rows", &42)?;
//!         Ok::<(), TaskError>(())
//!     }))
//!     .task(Task::from_fn("report", |_ctx| async { Ok(()) }).depends_on(["extract"]));
//!
//! let recorder = SpanRecorder::new();
//! let outcome = engine.run(&recorder).await?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! [`SpanRecorder`]: dagspan_monitor::SpanRecorder

mod engine;
mod error;
mod guard;
mod notebook;
mod pool;
mod task;

pub use engine::{PipelineEngine, PipelineOutcome, TaskState};
pub use error::{AttemptFailure, EngineError, TaskError, TaskFailure};
pub use notebook::{NotebookWork, OUTPUT_NOTEBOOK_ARTIFACT};
pub use pool::{JobError, JobHandle, Scheduler, WorkerPool};
pub use task::{FnWork, LogKind, RunContext, Task, Work};
