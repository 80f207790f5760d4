//! Pipeline configuration schema for dagspan.
//!
//! A pipeline is a JSON document listing tasks and their dependencies:
//!
//! ```json
//! {
//!   "id": "nightly",
//!   "name": "Nightly report",
//!   "tasks": [
//!     { "id": "ingest", "type": "jupytext", "notebook": "notebooks/ingest.py" },
//!     { "id": "report", "type": "jupytext", "notebook": "notebooks/report.py",
//!       "depends_on": ["ingest"], "max_nr_retries": 3, "timeout_s": 600 }
//!   ]
//! }
//! ```

mod builder;
mod env;

pub use builder::{PipelineBuilder, TaskBuilder};
pub use env::{github_env_attributes, github_env_attributes_from};

use dagspan_core::{AttributeValue, Attributes};
use dagspan_monitor::DirectedTrees;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_WORKERS: &str = "DAGSPAN_WORKERS";
pub const ENV_NOTEBOOK_RUNNER: &str = "DAGSPAN_NOTEBOOK_RUNNER";

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task dependencies contain a cycle")]
    Cycle,
}

// ─────────────────────────────────────────────────────────────────────────────
// Task Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Jupytext,
    Python,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Jupytext => "jupytext",
            TaskType::Python => "python",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Structs
// ─────────────────────────────────────────────────────────────────────────────

fn default_max_nr_retries() -> u32 {
    1
}

fn default_workers() -> usize {
    2
}

fn default_runner_program() -> String {
    "papermill".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub notebook: Option<PathBuf>,
    /// Notebook parameters, recorded as `task.parameters.<name>`.
    #[serde(default)]
    pub parameters: Attributes,
    #[serde(default = "default_max_nr_retries")]
    pub max_nr_retries: u32,
    #[serde(default)]
    pub timeout_s: Option<f64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskConfig {
    pub fn new(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type,
            notebook: None,
            parameters: Attributes::new(),
            max_nr_retries: default_max_nr_retries(),
            timeout_s: None,
            depends_on: Vec::new(),
        }
    }
}

/// External notebook executor invoked for `jupytext` tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookRunnerConfig {
    #[serde(default = "default_runner_program")]
    pub program: String,
    /// Arguments placed before the notebook paths.
    #[serde(default)]
    pub args: Vec<String>,
    /// Where output notebooks are written; a temporary directory when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl Default for NotebookRunnerConfig {
    fn default() -> Self {
        Self {
            program: default_runner_program(),
            args: Vec::new(),
            work_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub notebook_runner: NotebookRunnerConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            notebook_runner: NotebookRunnerConfig::default(),
        }
    }
}

impl EngineSettings {
    /// Applies `DAGSPAN_WORKERS` / `DAGSPAN_NOTEBOOK_RUNNER` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{}={}", ENV_WORKERS, workers)))?;
            tracing::debug!(workers = self.workers, "Worker count overridden from environment");
        }
        if let Some(program) = lookup(ENV_NOTEBOOK_RUNNER).filter(|p| !p.trim().is_empty()) {
            tracing::debug!(program = %program, "Notebook runner overridden from environment");
            self.notebook_runner.program = program;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Extra pipeline attributes; recorded under the `pipeline.` prefix.
    #[serde(default)]
    pub attributes: Attributes,
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl PipelineConfig {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(id, name)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn task(&self, id: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// `pipeline.*` attributes attached to every task span.
    pub fn pipeline_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("pipeline.id".into(), AttributeValue::from(&self.id));
        attrs.insert("pipeline.name".into(), AttributeValue::from(&self.name));
        for (key, value) in &self.attributes {
            let key = if key.starts_with("pipeline.") {
                key.clone()
            } else {
                format!("pipeline.{}", key)
            };
            attrs.insert(key, value.clone());
        }
        attrs
    }

    /// Dependency edges as `(dependency, dependent)` pairs over task ids.
    pub fn dependency_graph(&self) -> DirectedTrees<String> {
        let edges = self.tasks.iter().flat_map(|task| {
            task.depends_on
                .iter()
                .map(move |dep| (dep.clone(), task.id.clone()))
        });
        DirectedTrees::with_nodes(self.tasks.iter().map(|t| t.id.clone()), edges)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.workers == 0 {
            return Err(ConfigError::Invalid("engine.workers must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.is_empty() {
                return Err(ConfigError::Invalid("task id must not be empty".into()));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ConfigError::DuplicateTask(task.id.clone()));
            }
            if task.max_nr_retries == 0 {
                return Err(ConfigError::Invalid(format!(
                    "task {}: max_nr_retries must be at least 1",
                    task.id
                )));
            }
            if let Some(t) = task.timeout_s.filter(|t| !(t.is_finite() && *t > 0.0)) {
                return Err(ConfigError::Invalid(format!(
                    "task {}: timeout_s must be positive, got {}",
                    task.id, t
                )));
            }
            if task.task_type == TaskType::Jupytext && task.notebook.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "task {}: jupytext tasks need a notebook",
                    task.id
                )));
            }
        }

        for task in &self.tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(ConfigError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        if !self.dependency_graph().is_acyclic() {
            return Err(ConfigError::Cycle);
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, PipelineConfig>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` pipeline in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        let entries = fs::read_dir(dir)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let config = PipelineConfig::from_file(&path)?;
                tracing::debug!(id = %config.id, path = %path.display(), "Loaded pipeline config");
                registry.pipelines.insert(config.id.clone(), config);
            }
        }

        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(id)
    }

    pub fn list(&self) -> Vec<&PipelineConfig> {
        self.pipelines.values().collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.pipelines.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIGHTLY: &str = r#"{
        "id": "nightly",
        "name": "Nightly report",
        "attributes": {"owner": "data-team"},
        "tasks": [
            {"id": "ingest", "type": "jupytext", "notebook": "notebooks/ingest.py",
             "parameters": {"date": "2024-01-01"}},
            {"id": "report", "notebook": "notebooks/report.py",
             "depends_on": ["ingest"], "max_nr_retries": 3, "timeout_s": 600}
        ]
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = PipelineConfig::from_json(NIGHTLY).unwrap();
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.engine.notebook_runner.program, "papermill");

        let ingest = config.task("ingest").unwrap();
        assert_eq!(ingest.max_nr_retries, 1);
        assert_eq!(ingest.timeout_s, None);
        assert_eq!(ingest.parameters["date"], AttributeValue::from("2024-01-01"));

        let report = config.task("report").unwrap();
        assert_eq!(report.task_type, TaskType::Jupytext);
        assert_eq!(report.timeout_s, Some(600.0));
        config.validate().unwrap();
    }

    #[test]
    fn test_pipeline_attributes_are_prefixed() {
        let config = PipelineConfig::from_json(NIGHTLY).unwrap();
        let attrs = config.pipeline_attributes();
        assert_eq!(attrs["pipeline.id"], AttributeValue::from("nightly"));
        assert_eq!(attrs["pipeline.owner"], AttributeValue::from("data-team"));
        assert!(attrs.keys().all(|k| k.starts_with("pipeline.")));
    }

    #[test]
    fn test_validate_rejects_bad_graphs() {
        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.tasks[0].depends_on.push("report".into());
        assert!(matches!(config.validate(), Err(ConfigError::Cycle)));

        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.tasks[1].depends_on.push("missing".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownDependency { dependency, .. }) if dependency == "missing"
        ));

        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.tasks[1].id = "ingest".into();
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateTask(_))));
    }

    #[test]
    fn test_validate_rejects_bad_tasks() {
        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.tasks[0].max_nr_retries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.tasks[0].timeout_s = Some(-1.0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.tasks[0].notebook = None;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::from_json(NIGHTLY).unwrap();
        config.engine.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = EngineSettings::default();
        settings
            .apply_overrides_from(|key| match key {
                ENV_WORKERS => Some("8".into()),
                ENV_NOTEBOOK_RUNNER => Some("/usr/local/bin/papermill".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.notebook_runner.program, "/usr/local/bin/papermill");

        let err = settings
            .apply_overrides_from(|key| (key == ENV_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_registry_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nightly.json"), NIGHTLY).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a pipeline").unwrap();

        let registry = PipelineRegistry::load_from_dir(dir.path()).unwrap();
        assert_eq!(registry.ids(), vec!["nightly"]);
        assert_eq!(registry.get("nightly").unwrap().name, "Nightly report");
        assert_eq!(registry.list().len(), 1);

        fs::write(dir.path().join("broken.json"), "{").unwrap();
        assert!(matches!(
            PipelineRegistry::load_from_dir(dir.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::from_json(NIGHTLY).unwrap();
        let back = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
