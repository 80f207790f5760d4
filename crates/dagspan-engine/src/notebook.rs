//! Notebook-backed work: runs an external notebook executor per attempt.

use crate::error::TaskError;
use crate::task::{RunContext, Work};
use async_trait::async_trait;
use dagspan_config::NotebookRunnerConfig;
use dagspan_core::{AttributeValue, Attributes};
use dagspan_monitor::descriptions;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Name of the artifact holding the executed notebook.
pub const OUTPUT_NOTEBOOK_ARTIFACT: &str = "notebook.ipynb";

pub struct NotebookWork {
    notebook: PathBuf,
    parameters: Attributes,
    runner: NotebookRunnerConfig,
}

impl NotebookWork {
    pub fn new(notebook: impl Into<PathBuf>, runner: NotebookRunnerConfig) -> Self {
        Self {
            notebook: notebook.into(),
            parameters: Attributes::new(),
            runner,
        }
    }

    pub fn with_parameters(mut self, parameters: Attributes) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn notebook(&self) -> &Path {
        &self.notebook
    }

    fn command(&self, output: &Path) -> Command {
        let mut cmd = Command::new(&self.runner.program);
        cmd.args(&self.runner.args)
            .arg(&self.notebook)
            .arg(output)
            .kill_on_drop(true);
        for (name, value) in &self.parameters {
            cmd.arg("-p").arg(name).arg(value.to_string());
        }
        cmd
    }

    async fn execute(&self, ctx: &RunContext, work_dir: &Path) -> Result<(), TaskError> {
        let output = work_dir.join(format!(
            "{}--retry{}.ipynb",
            ctx.task_id().replace(['/', '.'], "-"),
            ctx.retry_nr()
        ));

        tracing::debug!(
            task_id = %ctx.task_id(),
            program = %self.runner.program,
            notebook = %self.notebook.display(),
            "Running notebook"
        );
        let result = self.command(&output).output().await?;

        // the executed notebook is kept even when the run failed
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            let content = tokio::fs::read(&output).await?;
            match String::from_utf8(content) {
                Ok(text) => ctx.log_artefact(OUTPUT_NOTEBOOK_ARTIFACT, &text)?,
                Err(e) => ctx.log_bytes(OUTPUT_NOTEBOOK_ARTIFACT, e.as_bytes()),
            }
        }

        if result.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
        Err(TaskError::Notebook {
            status: result.status.to_string(),
            stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
        })
    }
}

#[async_trait]
impl Work for NotebookWork {
    fn task_type(&self) -> &str {
        "jupytext"
    }

    fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(
            "task.notebook".into(),
            AttributeValue::from(self.notebook.display().to_string()),
        );
        for (name, value) in &self.parameters {
            attrs.insert(format!("task.parameters.{}", name), value.clone());
        }
        attrs
    }

    fn failure_description(&self) -> &str {
        descriptions::NOTEBOOK_TASK_FAILED
    }

    async fn run(&self, ctx: RunContext) -> Result<(), TaskError> {
        match &self.runner.work_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                self.execute(&ctx, dir).await
            }
            None => {
                let dir = tempfile::tempdir()?;
                self.execute(&ctx, dir.path()).await
            }
        }
    }
}
