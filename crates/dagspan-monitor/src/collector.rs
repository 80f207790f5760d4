//! Thread-safe span recorder shared by the engine and every running attempt.

use crate::spans::Spans;
use crate::trace::{Span, SpanContext, SpanEvent, SpanId, SpanStatus, TraceId, DEFAULT_KIND, EXCEPTION_EVENT};
use chrono::{DateTime, SubsecRound, Utc};
use dagspan_core::{AttributeValue, Attributes};
use std::sync::{Arc, Mutex};

/// Collects finished spans of one trace.
///
/// Spans are appended when they end; a span's fields are only touched by the
/// [`ActiveSpan`] that owns it.
pub struct SpanRecorder {
    trace_id: TraceId,
    resource: Attributes,
    spans: Mutex<Vec<Span>>,
}

impl SpanRecorder {
    pub fn new() -> Arc<Self> {
        Self::with_resource(Attributes::new())
    }

    /// Recorder whose spans carry `resource` metadata.
    pub fn with_resource(resource: Attributes) -> Arc<Self> {
        Arc::new(Self {
            trace_id: format!("0x{}", uuid::Uuid::new_v4().simple()),
            resource,
            spans: Mutex::new(Vec::new()),
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Fresh 64-bit span id, hex encoded.
    pub fn generate_span_id() -> SpanId {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("0x{}", &uuid[..16])
    }

    /// Opens a span under `parent` (a root span when `None`).
    pub fn start_span(
        self: &Arc<Self>,
        name: impl Into<String>,
        parent: Option<&SpanContext>,
    ) -> ActiveSpan {
        self.start_span_with_id(Self::generate_span_id(), name, parent)
    }

    /// Opens a span with a pre-allocated id, for spans referenced before they start.
    pub fn start_span_with_id(
        self: &Arc<Self>,
        span_id: SpanId,
        name: impl Into<String>,
        parent: Option<&SpanContext>,
    ) -> ActiveSpan {
        let now = now();
        let span = Span {
            name: name.into(),
            context: SpanContext {
                trace_id: self.trace_id.clone(),
                span_id,
            },
            kind: DEFAULT_KIND.to_string(),
            parent_id: parent.map(|p| p.span_id.clone()),
            start_time: now,
            end_time: now,
            status: SpanStatus::unset(),
            attributes: Attributes::new(),
            events: Vec::new(),
            resource: self.resource.clone(),
        };
        tracing::debug!(span_id = %span.span_id(), name = %span.name, "Span started");

        ActiveSpan {
            recorder: Arc::clone(self),
            span: Some(span),
        }
    }

    fn record(&self, span: Span) {
        let Ok(mut guard) = self.spans.lock() else {
            tracing::warn!(span_id = %span.span_id(), "Failed to acquire span lock, dropping span");
            return;
        };
        tracing::debug!(
            span_id = %span.span_id(),
            name = %span.name,
            status = span.status.status_code.as_str(),
            "Span recorded"
        );
        guard.push(span);
    }

    /// Snapshot of the spans finished so far, in end order.
    pub fn spans(&self) -> Spans {
        let Ok(guard) = self.spans.lock() else {
            tracing::warn!("Failed to acquire span lock");
            return Spans::default();
        };
        Spans::new(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.spans.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// An open span. Recorded when ended, or on drop with its current status
/// (e.g. when the owning attempt is cancelled).
pub struct ActiveSpan {
    recorder: Arc<SpanRecorder>,
    span: Option<Span>,
}

impl ActiveSpan {
    pub fn context(&self) -> SpanContext {
        self.span
            .as_ref()
            .map(|s| s.context.clone())
            .unwrap_or_else(|| SpanContext {
                trace_id: self.recorder.trace_id.clone(),
                span_id: SpanId::new(),
            })
    }

    pub fn span_id(&self) -> SpanId {
        self.context().span_id
    }

    pub fn recorder(&self) -> &Arc<SpanRecorder> {
        &self.recorder
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(span) = self.span.as_mut() {
            span.attributes.insert(key.into(), value.into());
        }
    }

    pub fn set_attributes(&mut self, attributes: &Attributes) {
        if let Some(span) = self.span.as_mut() {
            span.attributes
                .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Attributes) {
        if let Some(span) = self.span.as_mut() {
            span.events.push(SpanEvent {
                name: name.into(),
                timestamp: now(),
                attributes,
            });
        }
    }

    /// Adds an `exception` event.
    pub fn record_exception(&mut self, exception_type: &str, message: &str) {
        let mut attributes = Attributes::new();
        attributes.insert("exception.type".into(), exception_type.into());
        attributes.insert("exception.message".into(), message.into());
        self.add_event(EXCEPTION_EVENT, attributes);
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(span) = self.span.as_mut() {
            span.status = status;
        }
    }

    pub fn end(mut self) {
        self.finish();
    }

    pub fn end_with_status(mut self, status: SpanStatus) {
        self.set_status(status);
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.end_time = now().max(span.start_time);
            self.recorder.record(span);
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.finish();
    }
}
