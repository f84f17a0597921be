//! Span data model.
//!
//! A [`Span`] is the timed record of one unit of work. Its identity lives in
//! an immutable [`SpanContext`] that is copied into children, so parent
//! lookups never require ownership of the parent span - a parent may end and
//! be exported before its children.
//!
//! Mutation rules: attributes, events and status are append-only from start
//! through the on-end hooks. The tracer freezes the span once those hooks
//! have run; from then on the mutators are no-ops, so a stale reference
//! cannot corrupt an exported record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Returns the current wall clock as Unix nanoseconds.
pub(crate) fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Immutable span identity, propagated by value to children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// Trace identifier (128-bit, non-zero for valid contexts).
    pub trace_id: u128,
    /// Span identifier (64-bit, non-zero for valid contexts).
    pub span_id: u64,
    /// Parent span identifier, `None` for root spans.
    pub parent_span_id: Option<u64>,
    /// Sampling decision made at span start.
    pub sampled: bool,
}

impl SpanContext {
    /// A context is valid when both identifiers are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != 0 && self.span_id != 0
    }
}

/// Scalar attribute values for spans, events and log scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Span completion status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    /// No status recorded.
    #[default]
    Unset,
    /// Completed successfully.
    Ok,
    /// Completed with an error, optionally described.
    Error {
        description: Option<String>,
    },
}

impl SpanStatus {
    /// Error status with a description.
    pub fn error(description: impl Into<String>) -> Self {
        Self::Error {
            description: Some(description.into()),
        }
    }
}

/// Span kind, mirroring the usual tracing taxonomy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// A timestamped event attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    /// Event time (Unix nanoseconds).
    pub timestamp_nanos: u64,
    pub attributes: HashMap<String, AttributeValue>,
}

/// The unit of work record: context, name, timing, status, attributes and
/// an ordered event sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    context: SpanContext,
    name: String,
    kind: SpanKind,
    /// Start time (Unix nanoseconds).
    start_time_nanos: u64,
    /// End time (Unix nanoseconds), unset while the span is open.
    end_time_nanos: Option<u64>,
    status: SpanStatus,
    attributes: HashMap<String, AttributeValue>,
    events: Vec<SpanEvent>,
    /// Set by the tracer after the on-end hooks; disables all mutators.
    #[serde(skip)]
    frozen: bool,
}

impl Span {
    /// Creates an open span starting now. Called by the tracer; user code
    /// obtains spans through [`Tracer::start_span`](crate::Tracer::start_span).
    pub(crate) fn start(context: SpanContext, name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            context,
            name: name.into(),
            kind,
            start_time_nanos: unix_nanos_now(),
            end_time_nanos: None,
            status: SpanStatus::Unset,
            attributes: HashMap::new(),
            events: Vec::new(),
            frozen: false,
        }
    }

    pub fn context(&self) -> SpanContext {
        self.context
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn status(&self) -> &SpanStatus {
        &self.status
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    pub fn start_time_nanos(&self) -> u64 {
        self.start_time_nanos
    }

    /// End time, `None` while the span is open.
    pub fn end_time_nanos(&self) -> Option<u64> {
        self.end_time_nanos
    }

    pub fn is_ended(&self) -> bool {
        self.end_time_nanos.is_some()
    }

    /// Sets an attribute. No-op once the span is frozen.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if self.frozen {
            return;
        }
        self.attributes.insert(key.into(), value.into());
    }

    /// Sets the status. No-op once the span is frozen.
    pub fn set_status(&mut self, status: SpanStatus) {
        if self.frozen {
            return;
        }
        self.status = status;
    }

    /// Appends an event timestamped now. No-op once the span is frozen.
    pub fn add_event(&mut self, name: impl Into<String>) {
        self.add_event_with(name, HashMap::new());
    }

    /// Appends an event with attributes. No-op once the span is frozen.
    pub fn add_event_with(
        &mut self,
        name: impl Into<String>,
        attributes: HashMap<String, AttributeValue>,
    ) {
        if self.frozen {
            return;
        }
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp_nanos: unix_nanos_now(),
            attributes,
        });
    }

    /// Closes the span: stamps the end time and, when given, overrides the
    /// status. Idempotent; the first call wins.
    pub(crate) fn finalize(&mut self, status: Option<SpanStatus>) {
        if self.is_ended() {
            return;
        }
        if let Some(status) = status {
            self.status = status;
        }
        // Wall clock can step backwards; the end time never precedes start.
        self.end_time_nanos = Some(unix_nanos_now().max(self.start_time_nanos));
    }

    /// Disables all mutators. The tracer calls this after the on-end hooks,
    /// which are the last chance to enrich the span.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Span duration in nanoseconds; zero while the span is open.
    pub fn duration_nanos(&self) -> u64 {
        self.end_time_nanos
            .map(|end| end.saturating_sub(self.start_time_nanos))
            .unwrap_or(0)
    }
}

/// An ordered batch of ended spans handed to a sink in one call.
///
/// `Clone` so the batch exporter can re-send the whole batch on retry.
#[derive(Debug, Clone)]
pub struct SpanBatch {
    pub spans: Vec<Span>,
    /// Batch creation timestamp.
    pub created_at: SystemTime,
}

impl SpanBatch {
    pub fn new() -> Self {
        Self::with_spans(Vec::new())
    }

    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self {
            spans,
            created_at: SystemTime::now(),
        }
    }

    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_span(name: &str) -> Span {
        Span::start(
            SpanContext {
                trace_id: 1,
                span_id: 2,
                parent_span_id: None,
                sampled: true,
            },
            name,
            SpanKind::Internal,
        )
    }

    #[test]
    fn end_never_precedes_start() {
        let mut span = open_span("timing");
        span.finalize(None);
        assert!(span.end_time_nanos().unwrap() >= span.start_time_nanos());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut span = open_span("idempotent");
        span.finalize(Some(SpanStatus::Ok));
        let end = span.end_time_nanos();

        span.finalize(Some(SpanStatus::Unset));

        assert_eq!(span.end_time_nanos(), end);
        assert_eq!(span.status(), &SpanStatus::Ok);
    }

    #[test]
    fn mutators_still_work_after_finalize_until_frozen() {
        // On-end hooks run after finalize and must still be able to enrich.
        let mut span = open_span("enrich-window");
        span.finalize(Some(SpanStatus::Ok));
        span.set_attribute("tenant.id", "4711");
        assert!(span.attributes().contains_key("tenant.id"));
    }

    #[test]
    fn freeze_disables_all_mutators() {
        let mut span = open_span("freeze");
        span.set_attribute("before", true);
        span.finalize(Some(SpanStatus::Ok));
        span.freeze();

        span.set_attribute("after", true);
        span.add_event("late");
        span.set_status(SpanStatus::error("too late"));

        assert_eq!(span.status(), &SpanStatus::Ok);
        assert!(span.attributes().contains_key("before"));
        assert!(!span.attributes().contains_key("after"));
        assert!(span.events().is_empty());
    }

    #[test]
    fn events_keep_insertion_order() {
        let mut span = open_span("events");
        span.add_event("first");
        span.add_event("second");
        span.add_event("third");

        let names: Vec<_> = span.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn context_validity() {
        let ctx = SpanContext {
            trace_id: 0,
            span_id: 7,
            parent_span_id: None,
            sampled: true,
        };
        assert!(!ctx.is_valid());

        let ctx = SpanContext {
            trace_id: 9,
            span_id: 7,
            parent_span_id: Some(3),
            sampled: false,
        };
        assert!(ctx.is_valid());
    }

    #[test]
    fn span_serializes_with_untagged_attributes() {
        let mut span = open_span("serde");
        span.set_attribute("http.status_code", 200_i64);
        span.set_attribute("cache.hit", true);
        span.finalize(Some(SpanStatus::Ok));

        let json = serde_json::to_string(&span).unwrap();
        assert!(json.contains("\"http.status_code\":200"));
        assert!(json.contains("\"cache.hit\":true"));
    }
}
