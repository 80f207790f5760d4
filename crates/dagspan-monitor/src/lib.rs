//! Span recording and querying for dagspan pipelines.
//!
//! - [`SpanRecorder`] collects spans while a pipeline runs
//! - [`Spans`] is the frozen, queryable collection the parser works on
//! - [`DirectedTrees`] indexes parent/child (or dependency) edges
//! - [`TraceStore`] archives finished traces in SQLite

mod collector;
mod spans;
mod store;
mod trace;
mod tree;

pub use collector::{ActiveSpan, SpanRecorder};
pub use spans::{one, InvariantError, Spans};
pub use store::{StoreError, TraceQuery, TraceStore, TraceSummary};
pub use trace::{
    descriptions, names, timestamp, Span, SpanContext, SpanEvent, SpanId, SpanStatus, StatusCode,
    TraceId, DEFAULT_KIND, EXCEPTION_EVENT,
};
pub use tree::DirectedTrees;
