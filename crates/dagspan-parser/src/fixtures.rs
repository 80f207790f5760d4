//! Deterministic traces laid out the way the engine records them.

use chrono::{DateTime, TimeZone, Utc};
use dagspan_core::{AttributeValue, Attributes, SerializedData};
use dagspan_monitor::{
    descriptions, names, Span, SpanContext, SpanEvent, SpanId, SpanStatus, Spans, DEFAULT_KIND,
    EXCEPTION_EVENT,
};
use serde::Serialize;

pub(crate) const TRACE_ID: &str = "0x0000000000000000000000000000abcd";
const RUN_MS: i64 = 1_000;

pub(crate) enum Logged {
    Value(String, SerializedData),
    Artefact(String, SerializedData),
}

impl Logged {
    pub(crate) fn value<T: Serialize + ?Sized>(name: &str, value: &T) -> Self {
        Logged::Value(name.into(), SerializedData::encode(value).unwrap())
    }

    pub(crate) fn artefact<T: Serialize + ?Sized>(name: &str, content: &T) -> Self {
        Logged::Artefact(name.into(), SerializedData::encode(content).unwrap())
    }
}

pub(crate) struct Run {
    ok: bool,
    logged: Vec<Logged>,
}

impl Run {
    pub(crate) fn ok(logged: Vec<Logged>) -> Self {
        Self { ok: true, logged }
    }

    pub(crate) fn failed() -> Self {
        Self { ok: false, logged: Vec::new() }
    }
}

pub(crate) struct TraceBuilder {
    spans: Vec<Span>,
    clock_ms: i64,
    next_id: u64,
}

impl TraceBuilder {
    pub(crate) fn new() -> Self {
        Self {
            spans: Vec::new(),
            clock_ms: 0,
            next_id: 1,
        }
    }

    pub(crate) fn build(self) -> Spans {
        Spans::new(self.spans)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    fn allocate(&mut self) -> SpanId {
        let id = format!("0x{:016x}", self.next_id);
        self.next_id += 1;
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        span_id: SpanId,
        name: &str,
        parent: Option<&SpanId>,
        start_ms: i64,
        end_ms: i64,
        status: SpanStatus,
        attributes: Attributes,
    ) -> SpanId {
        self.spans.push(Span {
            name: name.into(),
            context: SpanContext {
                trace_id: TRACE_ID.into(),
                span_id: span_id.clone(),
            },
            kind: DEFAULT_KIND.into(),
            parent_id: parent.cloned(),
            start_time: Self::at(start_ms),
            end_time: Self::at(end_ms),
            status,
            attributes,
            events: Vec::new(),
            resource: Attributes::new(),
        });
        span_id
    }

    fn task_attributes(notebook: &str, max_nr_retries: usize) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("pipeline.name".into(), "demo".into());
        attrs.insert("task.task_id".into(), notebook.into());
        attrs.insert("task.task_type".into(), "jupytext".into());
        attrs.insert("task.notebook".into(), notebook.into());
        attrs.insert("task.max_nr_retries".into(), AttributeValue::Int(max_nr_retries as i64));
        attrs
    }

    /// Records one notebook task whose attempts run back to back, one second each.
    pub(crate) fn task(&mut self, notebook: &str, runs: Vec<Run>) -> SpanId {
        let task_id = self.allocate();
        let wrapper_id = self.allocate();
        let start = self.clock_ms;
        let ok = runs.iter().any(|r| r.ok);
        let nr_runs = runs.len();

        for (retry_nr, run) in runs.into_iter().enumerate() {
            let run_start = self.clock_ms;
            let run_end = run_start + RUN_MS;
            let call_id = self.allocate();
            let guard_id = self.allocate();

            for logged in run.logged {
                let (span_name, name, data) = match logged {
                    Logged::Value(name, data) => (names::NAMED_VALUE, name, data),
                    Logged::Artefact(name, data) => (names::ARTEFACT, name, data),
                };
                let mut attrs = Attributes::new();
                attrs.insert("name".into(), name.into());
                attrs.insert("type".into(), data.type_name.into());
                attrs.insert("encoding".into(), data.encoding.into());
                attrs.insert("content_encoded".into(), data.encoded_content.into());
                let id = self.allocate();
                self.push(id, span_name, Some(&guard_id), run_start, run_end, SpanStatus::ok(), attrs);
            }

            self.push(
                guard_id,
                names::TIMEOUT_GUARD,
                Some(&call_id),
                run_start,
                run_end,
                SpanStatus::ok(),
                Attributes::new(),
            );

            let mut attrs = Attributes::new();
            attrs.insert("run.retry_nr".into(), AttributeValue::Int(retry_nr as i64));
            let status = if run.ok {
                SpanStatus::ok()
            } else {
                SpanStatus::error(descriptions::RUN_FAILED)
            };
            self.push(call_id, names::RETRY_CALL, Some(&wrapper_id), run_start, run_end, status, attrs);
            if !run.ok {
                let mut event_attrs = Attributes::new();
                event_attrs.insert("exception.type".into(), "TaskError".into());
                event_attrs.insert("exception.message".into(), "boom".into());
                if let Some(span) = self.spans.last_mut() {
                    span.events.push(SpanEvent {
                        name: EXCEPTION_EVENT.into(),
                        timestamp: Self::at(run_end),
                        attributes: event_attrs,
                    });
                }
            }
            self.clock_ms = run_end;
        }

        let (wrapper_status, task_status) = if ok {
            (SpanStatus::ok(), SpanStatus::ok())
        } else {
            (
                SpanStatus::error(descriptions::REMOTE_CALL_FAILED),
                SpanStatus::error(descriptions::NOTEBOOK_TASK_FAILED),
            )
        };
        let end = self.clock_ms;
        self.push(
            wrapper_id,
            names::RETRY_WRAPPER,
            Some(&task_id),
            start,
            end,
            wrapper_status,
            Attributes::new(),
        );
        self.push(
            task_id,
            names::EXECUTE_TASK,
            None,
            start,
            end,
            task_status,
            Self::task_attributes(notebook, nr_runs),
        )
    }

    /// Records a task that never ran because an upstream task failed.
    pub(crate) fn blocked_task(&mut self, notebook: &str) -> SpanId {
        let id = self.allocate();
        let at = self.clock_ms;
        self.push(
            id,
            names::EXECUTE_TASK,
            None,
            at,
            at,
            SpanStatus::error(descriptions::DEPENDENCY_NOT_SATISFIED),
            Self::task_attributes(notebook, 1),
        )
    }

    pub(crate) fn dependency(&mut self, from: &SpanId, to: &SpanId) {
        let mut attrs = Attributes::new();
        attrs.insert("from_task_span_id".into(), from.as_str().into());
        attrs.insert("to_task_span_id".into(), to.as_str().into());
        let id = self.allocate();
        self.push(id, names::TASK_DEPENDENCY, None, 0, 0, SpanStatus::ok(), attrs);
    }

    /// Appends an arbitrary span below `parent`.
    pub(crate) fn child(&mut self, parent: &SpanId, name: &str, status: SpanStatus, attributes: Attributes) {
        let id = self.allocate();
        let at = self.clock_ms;
        self.push(id, name, Some(parent), at, at, status, attributes);
    }

    pub(crate) fn find(&self, name: &str) -> SpanId {
        self.spans
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.span_id().to_string())
            .unwrap()
    }
}
