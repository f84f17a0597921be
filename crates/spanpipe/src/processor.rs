//! Span lifecycle processors.
//!
//! Processors observe every span at start and end, in a fixed order, and may
//! mutate attributes, events and status - never identifiers or timestamps
//! (the span type does not expose setters for those). Hooks run synchronously
//! on the caller's task, so they must not block.
//!
//! A panicking processor is isolated: the panic is caught, reported and
//! counted, and the remaining processors still run. A broken enrichment step
//! must never break the request path it observes.

use crate::resource::TenantSource;
use crate::span::{AttributeValue, Span};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer hook invoked on span start and end.
pub trait SpanProcessor: Send + Sync {
    fn on_start(&self, _span: &mut Span) {}

    fn on_end(&self, _span: &mut Span) {}

    /// Processor name for diagnostics.
    fn name(&self) -> &str;
}

/// An ordered set of processors. Earlier processors' mutations are visible
/// to later ones and to the exporter.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn SpanProcessor>>,
    // Relaxed: statistical counter, no control flow depends on it.
    panics: AtomicU64,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: Box<dyn SpanProcessor>) {
        self.processors.push(processor);
    }

    /// Inserts a processor ahead of the existing ones.
    pub fn push_front(&mut self, processor: Box<dyn SpanProcessor>) {
        self.processors.insert(0, processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Number of hook invocations that panicked and were swallowed.
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    pub fn on_start(&self, span: &mut Span) {
        for processor in &self.processors {
            self.run_hook("on_start", processor.as_ref(), |p| p.on_start(span));
        }
    }

    pub fn on_end(&self, span: &mut Span) {
        for processor in &self.processors {
            self.run_hook("on_end", processor.as_ref(), |p| p.on_end(span));
        }
    }

    fn run_hook<F>(&self, hook: &str, processor: &dyn SpanProcessor, f: F)
    where
        F: FnOnce(&dyn SpanProcessor),
    {
        let name = processor.name().to_string();
        if catch_unwind(AssertUnwindSafe(|| f(processor))).is_err() {
            self.panics.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(processor = %name, hook, "span processor panicked; continuing chain");
        }
    }
}

/// Stamps the process-wide tenant id onto every span at end - the last
/// chance to mutate, after the business logic has already run.
pub struct TenantEnricher {
    source: Arc<dyn TenantSource>,
}

impl TenantEnricher {
    pub fn new(source: Arc<dyn TenantSource>) -> Self {
        Self { source }
    }
}

impl SpanProcessor for TenantEnricher {
    fn on_end(&self, span: &mut Span) {
        span.set_attribute("tenant.id", self.source.current_tenant());
    }

    fn name(&self) -> &str {
        "tenant_enricher"
    }
}

/// Stamps a fixed attribute set onto every span at start. The tracer uses
/// one of these to carry resource attributes.
pub struct AttributeStamper {
    attributes: Vec<(String, AttributeValue)>,
}

impl AttributeStamper {
    pub fn new(attributes: Vec<(String, AttributeValue)>) -> Self {
        Self { attributes }
    }
}

impl SpanProcessor for AttributeStamper {
    fn on_start(&self, span: &mut Span) {
        for (key, value) in &self.attributes {
            span.set_attribute(key.clone(), value.clone());
        }
    }

    fn name(&self) -> &str {
        "attribute_stamper"
    }
}
