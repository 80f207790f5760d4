//! Dependency-ordered pipeline execution.

use crate::error::{AttemptFailure, EngineError, TaskFailure};
use crate::guard;
use crate::notebook::NotebookWork;
use crate::pool::{Scheduler, WorkerPool};
use crate::task::Task;
use dagspan_config::{PipelineConfig, TaskType};
use dagspan_core::{AttributeValue, Attributes};
use dagspan_monitor::{names, DirectedTrees, SpanId, SpanRecorder, SpanStatus};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// Outcome Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded { attempts: u32 },
    Failed(TaskFailure),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded { .. } | TaskState::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub states: BTreeMap<String, TaskState>,
    /// `execute-task` span id of every task.
    pub task_span_ids: HashMap<String, SpanId>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.states
            .values()
            .all(|s| matches!(s, TaskState::Succeeded { .. }))
    }

    pub fn state(&self, task_id: &str) -> Option<&TaskState> {
        self.states.get(task_id)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| matches!(s, TaskState::Failed(_)))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline Engine
// ─────────────────────────────────────────────────────────────────────────────

type Completion = (String, Result<u32, TaskFailure>);

pub struct PipelineEngine<S: Scheduler = WorkerPool> {
    name: String,
    tasks: Vec<Task>,
    pipeline_attributes: Attributes,
    scheduler: S,
}

impl PipelineEngine<WorkerPool> {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self::with_scheduler(name, WorkerPool::new(workers))
    }

    /// Builds notebook tasks from a validated pipeline config.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let mut engine = Self::new(&config.name, config.engine.workers);
        engine.pipeline_attributes = config.pipeline_attributes();

        for tc in &config.tasks {
            let notebook = match (tc.task_type, &tc.notebook) {
                (TaskType::Jupytext, Some(notebook)) => notebook,
                (TaskType::Jupytext, None) => {
                    return Err(EngineError::InvalidTask(tc.id.clone(), "missing notebook".into()))
                }
                (TaskType::Python, _) => {
                    return Err(EngineError::InvalidTask(
                        tc.id.clone(),
                        "python tasks are registered in code, not in config".into(),
                    ))
                }
            };
            let work = NotebookWork::new(notebook, config.engine.notebook_runner.clone())
                .with_parameters(tc.parameters.clone());

            let mut task = Task::new(&tc.id, work)
                .depends_on(tc.depends_on.iter().cloned())
                .max_nr_retries(tc.max_nr_retries);
            if let Some(t) = tc.timeout_s {
                task = task.timeout_s(t);
            }
            engine.tasks.push(task);
        }

        Ok(engine)
    }
}

impl<S: Scheduler> PipelineEngine<S> {
    pub fn with_scheduler(name: impl Into<String>, scheduler: S) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            pipeline_attributes: Attributes::new(),
            scheduler,
        }
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Adds a pipeline attribute; keys are placed under `pipeline.` unless already there.
    pub fn pipeline_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        let key = key.into();
        let key = if key.starts_with("pipeline.") {
            key
        } else {
            format!("pipeline.{}", key)
        };
        self.pipeline_attributes.insert(key, value.into());
        self
    }

    pub fn pipeline_attributes(mut self, attributes: Attributes) -> Self {
        self.pipeline_attributes.extend(attributes);
        self
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Dependency graph with `(dependency, dependent)` edges.
    pub fn dependency_graph(&self) -> DirectedTrees<String> {
        let edges = self.tasks.iter().flat_map(|task| {
            task.depends_on
                .iter()
                .map(move |dep| (dep.clone(), task.id.clone()))
        });
        DirectedTrees::with_nodes(self.tasks.iter().map(|t| t.id.clone()), edges)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(EngineError::DuplicateTask(task.id.clone()));
            }
            if task.max_nr_retries == 0 {
                return Err(EngineError::InvalidRetries(task.id.clone()));
            }
            if let Some(seconds) = task.invalid_timeout_s {
                return Err(EngineError::InvalidTask(
                    task.id.clone(),
                    format!("timeout_s must be a non-negative finite number, got {}", seconds),
                ));
            }
        }
        for task in &self.tasks {
            if let Some(dep) = task.depends_on.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(EngineError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if !self.dependency_graph().is_acyclic() {
            return Err(EngineError::CyclicDependencies);
        }
        Ok(())
    }

    /// Runs every task once its dependencies succeeded, recording all spans
    /// into `recorder`.
    pub async fn run(&self, recorder: &Arc<SpanRecorder>) -> Result<PipelineOutcome, EngineError> {
        self.validate()?;

        info!("╔══════════════════════════════════════════════════════════════");
        info!("║ PIPELINE: {}", self.name);
        info!("║ Tasks: {}", self.tasks.len());
        info!("╠══════════════════════════════════════════════════════════════");

        let by_id: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let task_span_ids: HashMap<String, SpanId> = self
            .tasks
            .iter()
            .map(|t| (t.id.clone(), SpanRecorder::generate_span_id()))
            .collect();

        self.record_dependencies(&task_span_ids, recorder);

        let graph = self.dependency_graph();
        let mut remaining: HashMap<&str, usize> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), graph.parents(&t.id).len()))
            .collect();
        let mut states: BTreeMap<String, TaskState> = self
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskState::Pending))
            .collect();

        let mut ready: VecDeque<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .collect();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();
        let mut step = 0usize;

        loop {
            while let Some(task) = ready.pop_front() {
                step += 1;
                info!("╠──────────────────────────────────────────────────────────────");
                info!("║ [{}] TASK: {} ({})", step, task.id, task.work.task_type());
                states.insert(task.id.clone(), TaskState::Running);
                in_flight.push(self.submit(task, &task_span_ids, recorder));
            }

            let Some((task_id, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(attempts) => {
                    info!("║     ✓ {} succeeded after {} attempt(s)", task_id, attempts);
                    states.insert(task_id.clone(), TaskState::Succeeded { attempts });

                    for child in graph.children(&task_id) {
                        let Some(count) = remaining.get_mut(child.as_str()) else {
                            continue;
                        };
                        *count -= 1;
                        if *count == 0 && states.get(child) == Some(&TaskState::Pending) {
                            states.insert(child.clone(), TaskState::Ready);
                            if let Some(task) = by_id.get(child.as_str()) {
                                ready.push_back(*task);
                            }
                        }
                    }
                }
                Err(failure) => {
                    info!("║     ✗ {} failed: {}", task_id, failure);
                    states.insert(task_id.clone(), TaskState::Failed(failure));

                    for blocked in graph.descendants(&task_id) {
                        if states.get(&blocked) != Some(&TaskState::Pending) {
                            continue;
                        }
                        info!("║     ✗ {} blocked: dependency {} failed", blocked, task_id);
                        if let (Some(task), Some(span_id)) =
                            (by_id.get(blocked.as_str()), task_span_ids.get(&blocked))
                        {
                            guard::record_blocked_task(
                                task,
                                span_id.clone(),
                                &self.pipeline_attributes,
                                recorder,
                            );
                        }
                        states.insert(blocked, TaskState::Failed(TaskFailure::DependencyNotSatisfied));
                    }
                }
            }
        }

        let outcome = PipelineOutcome {
            states,
            task_span_ids,
        };
        info!(
            "║ Pipeline complete: {} task(s), {} failed",
            outcome.states.len(),
            outcome.failed().len()
        );
        info!("╚══════════════════════════════════════════════════════════════");
        Ok(outcome)
    }

    fn submit(
        &self,
        task: &Task,
        task_span_ids: &HashMap<String, SpanId>,
        recorder: &Arc<SpanRecorder>,
    ) -> BoxFuture<'static, Completion> {
        let task = task.clone();
        let span_id = task_span_ids
            .get(&task.id)
            .cloned()
            .unwrap_or_else(SpanRecorder::generate_span_id);
        let attributes = self.pipeline_attributes.clone();
        let recorder = Arc::clone(recorder);
        let task_id = task.id.clone();

        let handle = self.scheduler.submit(async move {
            guard::execute_task(&task, span_id, &attributes, &recorder).await
        });

        async move {
            let result = handle.await.unwrap_or_else(|e| {
                Err(TaskFailure::RetriesExhausted {
                    attempts: 0,
                    last: AttemptFailure::Panicked(e.to_string()),
                })
            });
            (task_id, result)
        }
        .boxed()
    }

    /// One `task-dependency` span per edge, linking pre-allocated task span ids.
    fn record_dependencies(&self, task_span_ids: &HashMap<String, SpanId>, recorder: &Arc<SpanRecorder>) {
        for task in &self.tasks {
            for dep in &task.depends_on {
                let (Some(from), Some(to)) = (task_span_ids.get(dep), task_span_ids.get(&task.id)) else {
                    continue;
                };
                let mut span = recorder.start_span(names::TASK_DEPENDENCY, None);
                span.set_attribute("from_task_span_id", from.as_str());
                span.set_attribute("to_task_span_id", to.as_str());
                span.end_with_status(SpanStatus::ok());
            }
        }
    }
}
