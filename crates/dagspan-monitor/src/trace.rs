//! Span record types for pipeline traces.

use chrono::{DateTime, Utc};
use dagspan_core::{AttributeValue, Attributes};
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub type SpanId = String;
pub type TraceId = String;

/// Span names emitted by the engine and read back by the parser.
pub mod names {
    pub const EXECUTE_TASK: &str = "execute-task";
    pub const RETRY_WRAPPER: &str = "retry-wrapper";
    pub const RETRY_CALL: &str = "retry-call";
    pub const TIMEOUT_GUARD: &str = "timeout-guard";
    pub const ARTEFACT: &str = "artefact";
    pub const NAMED_VALUE: &str = "named-value";
    pub const TASK_DEPENDENCY: &str = "task-dependency";
}

/// Status descriptions downstream trace readers match on.
pub mod descriptions {
    pub const TIMEOUT: &str = "Timeout";
    pub const RUN_FAILED: &str = "Run failed";
    pub const REMOTE_CALL_FAILED: &str = "Remote function call failed";
    pub const DEPENDENCY_NOT_SATISFIED: &str = "Dependency not satisfied";
    pub const NOTEBOOK_TASK_FAILED: &str = "Jupytext notebook task failed";
}

pub const EXCEPTION_EVENT: &str = "exception";
pub const DEFAULT_KIND: &str = "SpanKind.INTERNAL";

/// ISO-8601 timestamps with microsecond precision, e.g. `2021-10-10T10:25:35.173367Z`.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
    }

    /// Microseconds since the unix epoch.
    pub fn to_epoch_us(s: &str) -> Result<i64, chrono::ParseError> {
        parse(s).map(|dt| dt.timestamp_micros())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome code of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    Ok,
    Error,
    Unset,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Error => "ERROR",
            StatusCode::Unset => "UNSET",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SpanStatus {
    pub fn ok() -> Self {
        Self { status_code: StatusCode::Ok, description: None }
    }

    pub fn unset() -> Self {
        Self { status_code: StatusCode::Unset, description: None }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::Error,
            description: Some(description.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == StatusCode::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// A timestamped event attached to a span. Exceptions are events named `exception`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn is_exception(&self) -> bool {
        self.name == EXCEPTION_EVENT
    }
}

/// One recorded unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    pub context: SpanContext,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub parent_id: Option<SpanId>,
    #[serde(with = "timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub end_time: DateTime<Utc>,
    pub status: SpanStatus,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub resource: Attributes,
}

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

impl Span {
    pub fn span_id(&self) -> &str {
        &self.context.span_id
    }

    pub fn trace_id(&self) -> &str {
        &self.context.trace_id
    }

    /// Half-open `[start, end)` range in epoch microseconds.
    pub fn duration_range_us(&self) -> Range<i64> {
        self.start_time.timestamp_micros()..self.end_time.timestamp_micros()
    }

    pub fn duration_s(&self) -> f64 {
        let range = self.duration_range_us();
        (range.end - range.start) as f64 / 1e6
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &SpanEvent> {
        self.events.iter().filter(|e| e.is_exception())
    }

    /// True when `child` names this span as its direct parent.
    pub fn is_parent_of(&self, child: &Span) -> bool {
        child.parent_id.as_deref() == Some(self.span_id())
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Reads the value at a path into the span's ingest shape, e.g.
    /// `["status", "status_code"]` or `["attributes", "task.notebook"]`.
    pub fn read_key(&self, path: &[&str]) -> Option<AttributeValue> {
        match path {
            ["name"] => Some(self.name.as_str().into()),
            ["kind"] => Some(self.kind.as_str().into()),
            ["parent_id"] => self.parent_id.as_deref().map(Into::into),
            ["context", "span_id"] => Some(self.span_id().into()),
            ["context", "trace_id"] => Some(self.trace_id().into()),
            ["status", "status_code"] => Some(self.status.status_code.as_str().into()),
            ["status", "description"] => self.status.description.as_deref().map(Into::into),
            ["attributes", key, rest @ ..] => read_nested(self.attributes.get(*key)?, rest),
            ["resource", key, rest @ ..] => read_nested(self.resource.get(*key)?, rest),
            _ => None,
        }
    }
}

fn read_nested(value: &AttributeValue, rest: &[&str]) -> Option<AttributeValue> {
    match rest.split_first() {
        None => Some(value.clone()),
        Some((key, tail)) => read_nested(value.as_map()?.get(*key)?, tail),
    }
}
