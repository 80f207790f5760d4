//! Pipeline → task → run → artifact records, reconstructed from a frozen trace.
//!
//! Every level is a lazy, single pass iterator over the level below it:
//!
//! ```text
//! pipeline_iterators(spans)  -> (PipelineRecord, TaskIter)
//! TaskIter                   -> (TaskRecord, RunIter)
//! RunIter                    -> Result<(RunRecord, ArtifactIter)>
//! ArtifactIter               -> Result<Artifact>
//! ```

use chrono::{DateTime, Utc};
use dagspan_core::{AttributeValue, Attributes, CodecError, Payload, SerializedData};
use dagspan_monitor::{
    names, one, timestamp, DirectedTrees, InvariantError, Span, SpanId, SpanStatus, Spans,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

const TASK_PREFIXES: &[&str] = &["task.", "pipeline."];
const RUN_PREFIXES: &[&str] = &["run.", "task.", "pipeline."];
const LOGGED_KEYS: [&str; 4] = ["content_encoded", "encoding", "name", "type"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("Run {run_span_id} logged value {name} more than once")]
    DuplicateNamedValue { run_span_id: SpanId, name: String },

    #[error("Span {span_id} has unexpected attributes {keys:?}")]
    UnexpectedAttributes { span_id: SpanId, keys: Vec<String> },

    #[error("Span {span_id} is missing string attribute {key}")]
    MissingAttribute { span_id: SpanId, key: String },

    #[error("Failed to decode payload: {0}")]
    Codec(#[from] CodecError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Identity, timing and outcome shared by task and run records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanSummary {
    pub span_id: SpanId,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub end_time: DateTime<Utc>,
    pub duration_s: f64,
    pub status: SpanStatus,
}

impl SpanSummary {
    pub fn of(span: &Span) -> Self {
        Self {
            span_id: span.span_id().to_string(),
            start_time: span.start_time,
            end_time: span.end_time,
            duration_s: span.duration_s(),
            status: span.status.clone(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// `OK` or `FAILED`.
    pub fn outcome(&self) -> &'static str {
        if self.is_ok() {
            "OK"
        } else {
            "FAILED"
        }
    }

    pub fn duration_range_us(&self) -> std::ops::Range<i64> {
        self.start_time.timestamp_micros()..self.end_time.timestamp_micros()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRecord {
    /// `(from, to)` execute-task span ids, sorted and deduplicated.
    pub task_dependencies: Vec<(SpanId, SpanId)>,
    pub attributes: Attributes,
}

impl PipelineRecord {
    pub fn dependency_graph(&self) -> DirectedTrees<SpanId> {
        DirectedTrees::from_edges(self.task_dependencies.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    #[serde(flatten)]
    pub span: SpanSummary,
    pub attributes: Attributes,
}

impl TaskRecord {
    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_str)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.attr_str("task.task_id")
    }

    pub fn task_type(&self) -> Option<&str> {
        self.attr_str("task.task_type")
    }

    pub fn notebook(&self) -> Option<&str> {
        self.attr_str("task.notebook")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedValue {
    pub value: Payload,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub span: SpanSummary,
    pub attributes: Attributes,
    pub logged_values: BTreeMap<String, LoggedValue>,
}

impl RunRecord {
    pub fn retry_nr(&self) -> Option<i64> {
        self.attributes.get("run.retry_nr").and_then(AttributeValue::as_i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub content: Payload,
}

// ─────────────────────────────────────────────────────────────────────────────
// Iterators
// ─────────────────────────────────────────────────────────────────────────────

/// Reads the pipeline record and returns a lazy iterator over its tasks.
pub fn pipeline_iterators(spans: &Spans) -> Result<(PipelineRecord, TaskIter<'_>), ExtractError> {
    let mut task_dependencies = Vec::new();
    for span in &spans.filter(&["name"], names::TASK_DEPENDENCY) {
        task_dependencies.push((
            string_attribute(span, "from_task_span_id")?,
            string_attribute(span, "to_task_span_id")?,
        ));
    }
    task_dependencies.sort();
    task_dependencies.dedup();

    let task_spans = spans.filter(&["name"], names::EXECUTE_TASK);
    for (from, to) in &task_dependencies {
        for endpoint in [from, to] {
            one(task_spans.iter().filter(|s| s.span_id() == endpoint.as_str()))?;
        }
    }

    let pipeline = PipelineRecord {
        task_dependencies,
        attributes: spans.get_attributes(&["pipeline."]),
    };

    let tasks = spans
        .filter(&["name"], names::EXECUTE_TASK)
        .sort_by_start_time()
        .into_vec()
        .into_iter();

    Ok((pipeline, TaskIter { spans, tasks }))
}

pub struct TaskIter<'a> {
    spans: &'a Spans,
    tasks: std::vec::IntoIter<Span>,
}

impl<'a> Iterator for TaskIter<'a> {
    type Item = (TaskRecord, RunIter<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.tasks.next()?;
        let attributes = self.spans.bound_inclusive(&task).get_attributes(TASK_PREFIXES);

        let runs = self
            .spans
            .bound_under(&task)
            .filter(&["name"], names::RETRY_CALL)
            .sort_by_start_time()
            .into_vec()
            .into_iter();

        let record = TaskRecord {
            span: SpanSummary::of(&task),
            attributes: attributes.clone(),
        };
        let runs = RunIter {
            spans: self.spans,
            task,
            inherited: attributes,
            runs,
        };
        Some((record, runs))
    }
}

pub struct RunIter<'a> {
    spans: &'a Spans,
    task: Span,
    inherited: Attributes,
    runs: std::vec::IntoIter<Span>,
}

impl RunIter<'_> {
    /// A task with runs has one `retry-wrapper`; every run has one
    /// `timeout-guard` directly below it.
    fn check_structure(&self, run: &Span) -> Result<(), InvariantError> {
        let wrappers = self
            .spans
            .bound_under(&self.task)
            .filter(&["name"], names::RETRY_WRAPPER);
        one(wrappers.iter())?;

        let guards = self
            .spans
            .bound_under(run)
            .filter_by(|s| s.name == names::TIMEOUT_GUARD && run.is_parent_of(s));
        one(guards.iter())?;
        Ok(())
    }

    fn extract(&self, run: &Span) -> Result<(RunRecord, ArtifactIter), ExtractError> {
        self.check_structure(run)?;

        let mut attributes = self.inherited.clone();
        attributes.extend(self.spans.bound_inclusive(run).get_attributes(RUN_PREFIXES));

        let below = self.spans.bound_under(run);
        let record = RunRecord {
            span: SpanSummary::of(run),
            attributes,
            logged_values: logged_values(&below, run)?,
        };

        let artifacts = below
            .filter(&["name"], names::ARTEFACT)
            .filter(&["status", "status_code"], "OK")
            .into_vec()
            .into_iter();

        Ok((record, ArtifactIter { artifacts }))
    }
}

impl Iterator for RunIter<'_> {
    type Item = Result<(RunRecord, ArtifactIter), ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        let run = self.runs.next()?;
        Some(self.extract(&run))
    }
}

pub struct ArtifactIter {
    artifacts: std::vec::IntoIter<Span>,
}

impl Iterator for ArtifactIter {
    type Item = Result<Artifact, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.artifacts.next()?;
        Some(read_serialized(&span).and_then(|(name, data)| {
            Ok(Artifact {
                name,
                content: data.decode()?,
                type_name: data.type_name,
            })
        }))
    }
}

fn logged_values(below: &Spans, run: &Span) -> Result<BTreeMap<String, LoggedValue>, ExtractError> {
    let mut values = BTreeMap::new();

    for span in &below
        .filter(&["name"], names::NAMED_VALUE)
        .filter(&["status", "status_code"], "OK")
    {
        let keys: Vec<&str> = span.attributes.keys().map(String::as_str).collect();
        if keys != LOGGED_KEYS {
            return Err(ExtractError::UnexpectedAttributes {
                span_id: span.span_id().to_string(),
                keys: keys.into_iter().map(str::to_string).collect(),
            });
        }

        let (name, data) = read_serialized(span)?;
        if values.contains_key(&name) {
            return Err(ExtractError::DuplicateNamedValue {
                run_span_id: run.span_id().to_string(),
                name,
            });
        }
        let value = LoggedValue {
            value: data.decode()?,
            type_name: data.type_name,
        };
        values.insert(name, value);
    }

    Ok(values)
}

fn string_attribute(span: &Span, key: &str) -> Result<String, ExtractError> {
    span.attribute(key)
        .and_then(AttributeValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| ExtractError::MissingAttribute {
            span_id: span.span_id().to_string(),
            key: key.to_string(),
        })
}

fn read_serialized(span: &Span) -> Result<(String, SerializedData), ExtractError> {
    let name = string_attribute(span, "name")?;
    let data = SerializedData::new(
        string_attribute(span, "type")?,
        string_attribute(span, "encoding")?,
        string_attribute(span, "content_encoded")?,
    );
    Ok((name, data))
}

// ─────────────────────────────────────────────────────────────────────────────
// Eager Extraction
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run: RunRecord,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub task: TaskRecord,
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub pipeline: PipelineRecord,
    pub tasks: Vec<TaskSummary>,
}

/// Materializes the whole hierarchy; fails on the first invariant violation.
pub fn extract_pipeline(spans: &Spans) -> Result<PipelineSummary, ExtractError> {
    let (pipeline, task_it) = pipeline_iterators(spans)?;

    let mut tasks = Vec::new();
    for (task, run_it) in task_it {
        let mut runs = Vec::new();
        for run in run_it {
            let (run, artifact_it) = run?;
            let artifacts = artifact_it.collect::<Result<Vec<_>, _>>()?;
            runs.push(RunSummary { run, artifacts });
        }
        tasks.push(TaskSummary { task, runs });
    }

    tracing::debug!(tasks = tasks.len(), "Extracted pipeline");
    Ok(PipelineSummary { pipeline, tasks })
}
