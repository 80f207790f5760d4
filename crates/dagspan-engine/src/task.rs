//! Tasks, units of work and the per-attempt run context.

use crate::error::TaskError;
use async_trait::async_trait;
use dagspan_core::{AttributeValue, Attributes, SerializedData};
use dagspan_monitor::{descriptions, names, ActiveSpan, SpanContext, SpanRecorder, SpanStatus};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Work
// ─────────────────────────────────────────────────────────────────────────────

/// The unit of work executed by each attempt of a task.
#[async_trait]
pub trait Work: Send + Sync {
    /// Recorded as `task.task_type`.
    fn task_type(&self) -> &str;

    /// Extra `task.*` attributes.
    fn attributes(&self) -> Attributes {
        Attributes::new()
    }

    /// Description on the `execute-task` span once every attempt failed.
    fn failure_description(&self) -> &str {
        descriptions::REMOTE_CALL_FAILED
    }

    async fn run(&self, ctx: RunContext) -> Result<(), TaskError>;
}

/// Closure-backed work, recorded with task type `python`.
pub struct FnWork<F> {
    f: F,
}

impl<F> FnWork<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Work for FnWork<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn task_type(&self) -> &str {
        "python"
    }

    async fn run(&self, ctx: RunContext) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Task {
    pub(crate) id: String,
    pub(crate) depends_on: Vec<String>,
    pub(crate) max_nr_retries: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) invalid_timeout_s: Option<f64>,
    pub(crate) attributes: Attributes,
    pub(crate) work: Arc<dyn Work>,
}

impl Task {
    pub fn new(id: impl Into<String>, work: impl Work + 'static) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            max_nr_retries: 1,
            timeout: None,
            invalid_timeout_s: None,
            attributes: Attributes::new(),
            work: Arc::new(work),
        }
    }

    pub fn from_fn<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self::new(id, FnWork::new(f))
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn max_nr_retries(mut self, n: u32) -> Self {
        self.max_nr_retries = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.invalid_timeout_s = None;
        self
    }

    /// Negative, NaN or overflowing values leave the task without a timeout
    /// and are reported by [`PipelineEngine::validate`](crate::PipelineEngine::validate).
    pub fn timeout_s(mut self, seconds: f64) -> Self {
        match Duration::try_from_secs_f64(seconds) {
            Ok(timeout) => self.timeout = Some(timeout),
            Err(_) => self.invalid_timeout_s = Some(seconds),
        }
        self
    }

    /// Adds a task attribute; keys are placed under `task.` unless already there.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        let key = key.into();
        let key = if key.starts_with("task.") {
            key
        } else {
            format!("task.{}", key)
        };
        self.attributes.insert(key, value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn work(&self) -> &Arc<dyn Work> {
        &self.work
    }

    /// All `task.*` attributes recorded on the `execute-task` span.
    pub fn task_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("task.task_id".into(), AttributeValue::from(&self.id));
        attrs.insert("task.task_type".into(), self.work.task_type().into());
        attrs.insert("task.max_nr_retries".into(), self.max_nr_retries.into());
        if let Some(timeout) = self.timeout {
            attrs.insert("task.timeout_s".into(), timeout.as_secs_f64().into());
        }
        attrs.extend(self.work.attributes());
        attrs.extend(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        attrs
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.work.task_type())
            .field("depends_on", &self.depends_on)
            .field("max_nr_retries", &self.max_nr_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run Context
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Artefact,
    NamedValue,
}

impl LogKind {
    pub fn span_name(&self) -> &'static str {
        match self {
            LogKind::Artefact => names::ARTEFACT,
            LogKind::NamedValue => names::NAMED_VALUE,
        }
    }
}

/// Handle given to one attempt of a task; spans opened through it nest
/// under the attempt's `timeout-guard` span.
///
/// Once the attempt has timed out the context is cancelled and further
/// logged values are dropped.
#[derive(Clone)]
pub struct RunContext {
    recorder: Arc<SpanRecorder>,
    parent: SpanContext,
    task_id: String,
    retry_nr: u32,
    cancelled: Arc<Mutex<bool>>,
}

impl RunContext {
    pub fn new(
        recorder: Arc<SpanRecorder>,
        parent: SpanContext,
        task_id: impl Into<String>,
        retry_nr: u32,
    ) -> Self {
        Self {
            recorder,
            parent,
            task_id: task_id.into(),
            retry_nr,
            cancelled: Arc::new(Mutex::new(false)),
        }
    }

    /// Marks the attempt as abandoned; waits for any log call in progress.
    pub(crate) fn cancel(&self) {
        match self.cancelled.lock() {
            Ok(mut cancelled) => *cancelled = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.lock().map(|c| *c).unwrap_or(true)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 0-based attempt ordinal.
    pub fn retry_nr(&self) -> u32 {
        self.retry_nr
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.parent
    }

    pub fn recorder(&self) -> &Arc<SpanRecorder> {
        &self.recorder
    }

    /// Opens a work span below the attempt.
    pub fn start_span(&self, name: impl Into<String>) -> ActiveSpan {
        self.recorder.start_span(name, Some(&self.parent))
    }

    /// Records one `artefact` or `named-value` span carrying `data`.
    pub fn log(&self, kind: LogKind, name: &str, data: &SerializedData) {
        let Ok(cancelled) = self.cancelled.lock() else {
            tracing::warn!(task_id = %self.task_id, value_name = name, "Failed to acquire cancel lock, dropping value");
            return;
        };
        if *cancelled {
            tracing::warn!(
                task_id = %self.task_id,
                retry_nr = self.retry_nr,
                value_name = name,
                "Attempt already timed out, dropping logged value"
            );
            return;
        }

        let mut span = self.start_span(kind.span_name());
        span.set_attribute("name", name);
        span.set_attribute("type", data.type_name.as_str());
        span.set_attribute("encoding", data.encoding.as_str());
        span.set_attribute("content_encoded", data.encoded_content.as_str());
        tracing::debug!(
            task_id = %self.task_id,
            retry_nr = self.retry_nr,
            kind = kind.span_name(),
            value_name = name,
            "Logged value"
        );
        span.end_with_status(SpanStatus::ok());
        drop(cancelled);
    }

    pub fn log_value<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), TaskError> {
        let data = SerializedData::encode(value)?;
        self.log(LogKind::NamedValue, name, &data);
        Ok(())
    }

    /// Logs a text or structured artifact.
    pub fn log_artefact<T: Serialize + ?Sized>(&self, name: &str, content: &T) -> Result<(), TaskError> {
        let data = SerializedData::encode(content)?;
        self.log(LogKind::Artefact, name, &data);
        Ok(())
    }

    pub fn log_bytes(&self, name: &str, content: &[u8]) {
        self.log(LogKind::Artefact, name, &SerializedData::encode_bytes(content));
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("task_id", &self.task_id)
            .field("retry_nr", &self.retry_nr)
            .field("parent", &self.parent.span_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagspan_core::Payload;

    #[test]
    fn test_task_attributes() {
        let task = Task::from_fn("t1", |_ctx| async { Ok(()) })
            .max_nr_retries(3)
            .timeout_s(1.5)
            .attribute("owner", "ops")
            .attribute("task.tier", 2i64);

        let attrs = task.task_attributes();
        assert_eq!(attrs["task.task_id"], AttributeValue::from("t1"));
        assert_eq!(attrs["task.task_type"], AttributeValue::from("python"));
        assert_eq!(attrs["task.max_nr_retries"], AttributeValue::Int(3));
        assert_eq!(attrs["task.timeout_s"], AttributeValue::Float(1.5));
        assert_eq!(attrs["task.owner"], AttributeValue::from("ops"));
        assert_eq!(attrs["task.tier"], AttributeValue::Int(2));
        assert!(attrs.keys().all(|k| k.starts_with("task.")));
    }

    #[test]
    fn test_log_records_serialized_spans() {
        let recorder = SpanRecorder::new();
        let parent = recorder.start_span("timeout-guard", None);
        let ctx = RunContext::new(Arc::clone(&recorder), parent.context(), "t1", 0);

        ctx.log_value("x", &1.23).unwrap();
        ctx.log_artefact("a.txt", "hi").unwrap();
        ctx.log_bytes("blob.bin", &[0, 1, 2]);
        assert!(ctx.log_value("nothing", &Option::<i32>::None).is_err());
        parent.end();

        let spans = recorder.spans();
        let value = spans.filter(&["name"], names::NAMED_VALUE).one().unwrap().clone();
        assert!(value.status.is_ok());
        assert_eq!(value.attributes.len(), 4);
        assert_eq!(value.attribute("type"), Some(&"float".into()));
        assert_eq!(value.attribute("content_encoded"), Some(&"1.23".into()));

        let artefacts = spans.filter(&["name"], names::ARTEFACT);
        assert_eq!(artefacts.len(), 2);
        let blob = artefacts.filter(&["attributes", "name"], "blob.bin").one().unwrap().clone();
        let data = SerializedData::new(
            blob.attribute("type").unwrap().to_string(),
            blob.attribute("encoding").unwrap().to_string(),
            blob.attribute("content_encoded").unwrap().to_string(),
        );
        assert_eq!(data.decode().unwrap(), Payload::Bytes(vec![0, 1, 2]));

        let guard = spans.filter(&["name"], "timeout-guard").one().unwrap().clone();
        assert!(spans.iter().filter(|s| s.name != "timeout-guard").all(|s| guard.is_parent_of(s)));
    }

    #[test]
    fn test_cancelled_context_drops_logs() {
        let recorder = SpanRecorder::new();
        let parent = recorder.start_span("timeout-guard", None);
        let ctx = RunContext::new(Arc::clone(&recorder), parent.context(), "t1", 0);
        let clone = ctx.clone();

        ctx.log_artefact("before.txt", "kept").unwrap();
        ctx.cancel();
        assert!(clone.is_cancelled());
        clone.log_artefact("after.txt", "dropped").unwrap();
        clone.log_bytes("after.bin", &[1]);
        parent.end();

        let artefacts = recorder.spans().filter(&["name"], names::ARTEFACT);
        assert_eq!(artefacts.len(), 1);
        assert_eq!(artefacts.iter().next().unwrap().attribute("name"), Some(&"before.txt".into()));
    }

    #[test]
    fn test_invalid_timeout_s_is_kept_for_validation() {
        for seconds in [-1.0, f64::NAN, f64::INFINITY] {
            let task = Task::from_fn("t", |_ctx| async { Ok(()) }).timeout_s(seconds);
            assert_eq!(task.timeout, None);
            assert!(task.invalid_timeout_s.is_some());
        }
        let task = Task::from_fn("t", |_ctx| async { Ok(()) }).timeout_s(0.25);
        assert_eq!(task.timeout, Some(Duration::from_millis(250)));
        assert_eq!(task.invalid_timeout_s, None);
    }
}
