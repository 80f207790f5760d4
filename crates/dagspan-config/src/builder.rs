//! Fluent construction of pipeline configs.

use crate::{EngineSettings, PipelineConfig, TaskConfig, TaskType};
use dagspan_core::{AttributeValue, Attributes};
use std::path::PathBuf;

pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            config: PipelineConfig {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                attributes: Attributes::new(),
                tasks: Vec::new(),
                engine: EngineSettings::default(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.config.attributes.insert(key.into(), value.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.engine.workers = workers;
        self
    }

    pub fn notebook_runner(mut self, program: impl Into<String>) -> Self {
        self.config.engine.notebook_runner.program = program.into();
        self
    }

    /// Starts a task; finish it with [`TaskBuilder::done`].
    pub fn task(self, id: impl Into<String>, task_type: TaskType) -> TaskBuilder {
        TaskBuilder {
            parent: self,
            task: TaskConfig::new(id, task_type),
        }
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

pub struct TaskBuilder {
    parent: PipelineBuilder,
    task: TaskConfig,
}

impl TaskBuilder {
    pub fn notebook(mut self, path: impl Into<PathBuf>) -> Self {
        self.task.notebook = Some(path.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.task.parameters.insert(name.into(), value.into());
        self
    }

    pub fn max_nr_retries(mut self, n: u32) -> Self {
        self.task.max_nr_retries = n;
        self
    }

    pub fn timeout_s(mut self, seconds: f64) -> Self {
        self.task.timeout_s = Some(seconds);
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn done(mut self) -> PipelineBuilder {
        self.parent.config.tasks.push(self.task);
        self.parent
    }
}
