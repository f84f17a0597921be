//! Tracer facade: the sole API surface for request-handling code.
//!
//! Starting a span generates identifiers, consults the sampler and runs the
//! processor chain's on-start hooks; ending it stamps the end time, runs the
//! on-end hooks (the last chance to mutate) and hands sampled spans to the
//! batch exporter. Nothing on this path performs I/O or awaits.
//!
//! There is no hidden "current span" state: [`SpanContext`] is `Copy` and is
//! threaded explicitly through call signatures, so children started after an
//! `.await` still nest correctly because the parent context lives on the
//! caller's stack.

use crate::batch::{BatchConfig, BatchExporter, ExportMetrics};
use crate::exporter::{NullExporter, SpanExporterBoxed};
use crate::processor::{AttributeStamper, ProcessorChain, SpanProcessor};
use crate::resource::ResourceDescriptor;
use crate::sampler::{AlwaysOnSampler, Sampler};
use crate::span::{AttributeValue, Span, SpanContext, SpanKind, SpanStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// API misuse errors. The tracer never fails on I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TraceError {
    /// The supplied parent context has a zero trace or span id.
    #[error("invalid parent span context")]
    InvalidParent,
}

struct TracerInner {
    sampler: Box<dyn Sampler>,
    chain: ProcessorChain,
    exporter: BatchExporter,
    resource: ResourceDescriptor,
}

/// The pipeline facade. Cheap to clone; all clones share one pipeline.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    pub fn builder(resource: ResourceDescriptor) -> TracerBuilder {
        TracerBuilder::new(resource)
    }

    /// Starts a root span: fresh trace id, no parent.
    pub fn start_span(&self, name: impl Into<String>) -> Span {
        // A `None` parent cannot be malformed.
        self.start_span_with(name, SpanKind::Internal, None)
            .expect("root span start cannot fail")
    }

    /// Starts a child span under the given parent context.
    pub fn start_child(
        &self,
        name: impl Into<String>,
        parent: &SpanContext,
    ) -> Result<Span, TraceError> {
        self.start_span_with(name, SpanKind::Internal, Some(*parent))
    }

    /// Starts a span with an explicit kind and optional parent context.
    ///
    /// Children inherit the parent's trace id and record its span id as
    /// their parent; roots get a fresh trace id. The sampler is consulted
    /// with the context-so-far and the decision is frozen into the new
    /// span's context.
    pub fn start_span_with(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        parent: Option<SpanContext>,
    ) -> Result<Span, TraceError> {
        self.start_span_with_attributes(
            name,
            kind,
            parent,
            std::iter::empty::<(String, AttributeValue)>(),
        )
    }

    /// Starts a span carrying initial attributes, set before the on-start
    /// hooks run so every processor observes them.
    pub fn start_span_with_attributes<K, V>(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        parent: Option<SpanContext>,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Span, TraceError>
    where
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        if let Some(parent) = &parent {
            if !parent.is_valid() {
                return Err(TraceError::InvalidParent);
            }
        }

        let name = name.into();
        let trace_id = match &parent {
            Some(parent) => parent.trace_id,
            None => random_trace_id(),
        };
        let parent_sampled = parent.as_ref().map(|p| p.sampled);
        let sampled = self
            .inner
            .sampler
            .should_sample(trace_id, &name, parent_sampled);

        let context = SpanContext {
            trace_id,
            span_id: random_span_id(),
            parent_span_id: parent.map(|p| p.span_id),
            sampled,
        };

        let mut span = Span::start(context, name, kind);
        for (key, value) in attributes {
            span.set_attribute(key, value);
        }
        self.inner.chain.on_start(&mut span);
        Ok(span)
    }

    /// Starts a span and wraps it in a guard that ends it on drop.
    pub fn span(&self, name: impl Into<String>) -> ActiveSpan {
        ActiveSpan {
            tracer: self.clone(),
            span: Some(self.start_span(name)),
        }
    }

    /// Starts a guarded child span under the given parent context.
    pub fn child_span(
        &self,
        name: impl Into<String>,
        parent: &SpanContext,
    ) -> Result<ActiveSpan, TraceError> {
        Ok(ActiveSpan {
            tracer: self.clone(),
            span: Some(self.start_child(name, parent)?),
        })
    }

    /// Ends a span, keeping whatever status it already carries.
    pub fn end(&self, span: Span) {
        self.end_with_status(span, None);
    }

    /// Ends a span: stamps the end time, finalizes the status, runs the
    /// on-end hooks and hands the span to the exporter when sampled.
    /// Unsampled spans are discarded without touching the exporter.
    pub fn end_with_status(&self, mut span: Span, status: Option<SpanStatus>) {
        span.finalize(status);
        self.inner.chain.on_end(&mut span);
        span.freeze();

        if !span.context().sampled {
            return;
        }
        if let Err(e) = self.inner.exporter.submit(span) {
            // After tracer shutdown telemetry is best-effort by definition.
            tracing::debug!(error = %e, "span discarded");
        }
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.inner.resource
    }

    pub fn metrics(&self) -> &ExportMetrics {
        self.inner.exporter.metrics()
    }

    /// Number of processor hook invocations that panicked and were isolated.
    pub fn processor_panics(&self) -> u64 {
        self.inner.chain.panic_count()
    }

    /// Flushes buffered spans and stops the pipeline, waiting at most
    /// `timeout`. Spans not delivered in time are dropped and counted.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.exporter.shutdown(timeout).await;
    }
}

/// RAII guard around an open span: ends it through the tracer on drop, so
/// the common path cannot leak an unended span.
pub struct ActiveSpan {
    tracer: Tracer,
    span: Option<Span>,
}

impl ActiveSpan {
    pub fn context(&self) -> SpanContext {
        self.span.as_ref().expect("span taken only on end").context()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(key, value);
        }
    }

    pub fn add_event(&mut self, name: impl Into<String>) {
        if let Some(span) = self.span.as_mut() {
            span.add_event(name);
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(span) = self.span.as_mut() {
            span.set_status(status);
        }
    }

    /// Ends the span with `Ok` status.
    pub fn end_ok(mut self) {
        if let Some(span) = self.span.take() {
            self.tracer.end_with_status(span, Some(SpanStatus::Ok));
        }
    }

    /// Ends the span with an error status and description.
    pub fn end_error(mut self, description: impl Into<String>) {
        if let Some(span) = self.span.take() {
            self.tracer
                .end_with_status(span, Some(SpanStatus::error(description)));
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            self.tracer.end(span);
        }
    }
}

/// Builder for assembling the pipeline: resource, sampler, processors,
/// sink and batching policy.
pub struct TracerBuilder {
    resource: ResourceDescriptor,
    sampler: Box<dyn Sampler>,
    processors: Vec<Box<dyn SpanProcessor>>,
    sink: Option<Arc<dyn SpanExporterBoxed>>,
    batch_config: BatchConfig,
}

impl TracerBuilder {
    pub fn new(resource: ResourceDescriptor) -> Self {
        Self {
            resource,
            sampler: Box::new(AlwaysOnSampler),
            processors: Vec::new(),
            sink: None,
            batch_config: BatchConfig::default(),
        }
    }

    pub fn with_sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// Appends a processor; chain order is registration order.
    pub fn with_processor(mut self, processor: impl SpanProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SpanExporterBoxed>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = config;
        self
    }

    /// Builds the tracer and spawns the export worker. Must be called
    /// within a tokio runtime. Without a sink, spans are discarded.
    pub fn build(self) -> Tracer {
        let mut chain = ProcessorChain::new();
        // Resource attributes ride every span from the start, ahead of
        // user processors so those can see and override them.
        chain.push(Box::new(AttributeStamper::new(self.resource.attributes())));
        for processor in self.processors {
            chain.push(processor);
        }

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(NullExporter::new()));
        let exporter = BatchExporter::new(self.batch_config, sink);

        Tracer {
            inner: Arc::new(TracerInner {
                sampler: self.sampler,
                chain,
                exporter,
                resource: self.resource,
            }),
        }
    }
}

fn random_trace_id() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn random_span_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::testing::RecordingExporter;
    use crate::processor::TenantEnricher;
    use crate::resource::FixedTenant;
    use crate::sampler::AlwaysOffSampler;

    fn test_tracer(sink: Arc<RecordingExporter>) -> Tracer {
        Tracer::builder(ResourceDescriptor::new("test-service", "0.0.0"))
            .with_sink(sink)
            .with_batch_config(BatchConfig {
                scheduled_delay: Duration::from_millis(20),
                ..BatchConfig::default()
            })
            .build()
    }

    #[tokio::test]
    async fn children_inherit_trace_and_parent_ids() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = test_tracer(sink);

        let parent = tracer.start_span("parent");
        let child = tracer.start_child("child", &parent.context()).unwrap();

        assert_eq!(child.context().trace_id, parent.context().trace_id);
        assert_eq!(
            child.context().parent_span_id,
            Some(parent.context().span_id)
        );
        assert_ne!(child.context().span_id, parent.context().span_id);
        tracer.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn invalid_parent_is_rejected() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = test_tracer(sink);

        let bogus = SpanContext {
            trace_id: 0,
            span_id: 0,
            parent_span_id: None,
            sampled: true,
        };
        assert_eq!(
            tracer.start_child("child", &bogus).unwrap_err(),
            TraceError::InvalidParent
        );
        tracer.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn unsampled_spans_never_reach_the_sink() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = Tracer::builder(ResourceDescriptor::new("test-service", "0.0.0"))
            .with_sampler(AlwaysOffSampler)
            .with_sink(sink.clone())
            .build();

        let span = tracer.start_span("dropped");
        assert!(!span.context().sampled);
        tracer.end(span);

        tracer.shutdown(Duration::from_secs(1)).await;
        assert_eq!(sink.exported_count(), 0);
    }

    #[tokio::test]
    async fn resource_attributes_ride_every_span() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = test_tracer(sink.clone());

        let span = tracer.start_span("op");
        tracer.end(span);
        tracer.shutdown(Duration::from_secs(1)).await;

        let spans = sink.all_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].attributes().get("service.name"),
            Some(&AttributeValue::String("test-service".to_string()))
        );
    }

    #[tokio::test]
    async fn tenant_enricher_runs_before_export() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = Tracer::builder(ResourceDescriptor::new("test-service", "0.0.0"))
            .with_processor(TenantEnricher::new(Arc::new(FixedTenant::new("4711"))))
            .with_sink(sink.clone())
            .build();

        let span = tracer.start_span("op");
        tracer.end(span);
        tracer.shutdown(Duration::from_secs(1)).await;

        let spans = sink.all_spans();
        assert_eq!(
            spans[0].attributes().get("tenant.id"),
            Some(&AttributeValue::String("4711".to_string()))
        );
    }

    #[tokio::test]
    async fn initial_attributes_precede_on_start_hooks() {
        struct RequireMethod;

        impl crate::processor::SpanProcessor for RequireMethod {
            fn on_start(&self, span: &mut Span) {
                let seen = span.attributes().contains_key("http.method");
                span.set_attribute("method.seen", seen);
            }

            fn name(&self) -> &str {
                "require_method"
            }
        }

        let sink = Arc::new(RecordingExporter::new());
        let tracer = Tracer::builder(ResourceDescriptor::new("test-service", "0.0.0"))
            .with_processor(RequireMethod)
            .with_sink(sink.clone())
            .build();

        let span = tracer
            .start_span_with_attributes(
                "request",
                SpanKind::Server,
                None,
                [("http.method", AttributeValue::from("GET"))],
            )
            .unwrap();
        assert_eq!(
            span.attributes().get("method.seen"),
            Some(&AttributeValue::Bool(true))
        );
        tracer.end(span);
        tracer.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn guard_ends_span_on_drop() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = test_tracer(sink.clone());

        {
            let mut active = tracer.span("guarded");
            active.set_attribute("step", 1_i64);
        }
        tracer.shutdown(Duration::from_secs(1)).await;

        let spans = sink.all_spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].is_ended());
    }

    #[tokio::test]
    async fn guard_status_helpers() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = test_tracer(sink.clone());

        tracer.span("ok").end_ok();
        tracer.span("bad").end_error("backend unavailable");
        tracer.shutdown(Duration::from_secs(1)).await;

        let spans = sink.all_spans();
        assert_eq!(spans.len(), 2);
        let ok = spans.iter().find(|s| s.name() == "ok").unwrap();
        let bad = spans.iter().find(|s| s.name() == "bad").unwrap();
        assert_eq!(ok.status(), &SpanStatus::Ok);
        assert_eq!(
            bad.status(),
            &SpanStatus::error("backend unavailable")
        );
    }

    #[tokio::test]
    async fn context_survives_await_suspension() {
        let sink = Arc::new(RecordingExporter::new());
        let tracer = test_tracer(sink.clone());

        let parent = tracer.start_span("outer");
        let parent_ctx = parent.context();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let child = tracer.start_child("inner", &parent_ctx).unwrap();

        assert_eq!(child.context().trace_id, parent_ctx.trace_id);
        tracer.end(child);
        tracer.end(parent);
        tracer.shutdown(Duration::from_secs(1)).await;
        assert_eq!(sink.exported_count(), 2);
    }
}
