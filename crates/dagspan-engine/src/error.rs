//! Engine, task and attempt errors.

use dagspan_config::ConfigError;
use dagspan_core::CodecError;
use thiserror::Error;

/// Rejections raised before any task is scheduled.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task dependencies contain a cycle")]
    CyclicDependencies,

    #[error("Task {0}: max_nr_retries must be at least 1")]
    InvalidRetries(String),

    #[error("Task {0}: {1}")]
    InvalidTask(String, String),
}

/// Failure of a unit of work inside one attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("Notebook runner exited with {status}: {stderr}")]
    Notebook { status: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Exception type recorded on the failed `retry-call` span.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Failed(_) => "TaskError",
            TaskError::Notebook { .. } => "NotebookError",
            TaskError::Io(_) => "IoError",
            TaskError::Codec(_) => "CodecError",
        }
    }
}

/// Why a single attempt ended in ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("{kind}: {message}")]
    Error { kind: String, message: String },

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("Timeout")]
    Timeout,
}

impl AttemptFailure {
    pub fn kind(&self) -> &str {
        match self {
            AttemptFailure::Error { kind, .. } => kind,
            AttemptFailure::Panicked(_) => "Panic",
            AttemptFailure::Timeout => "TimeoutError",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AttemptFailure::Error { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<TaskError> for AttemptFailure {
    fn from(e: TaskError) -> Self {
        AttemptFailure::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Final failure of a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("Dependency not satisfied")]
    DependencyNotSatisfied,

    #[error("Failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: AttemptFailure },
}
