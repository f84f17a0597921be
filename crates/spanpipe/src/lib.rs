//! Span-processing and export pipeline.
//!
//! A minimal tracing SDK core: request code starts and ends spans through a
//! [`Tracer`]; a [`Sampler`] gates recording at start; an ordered
//! [`ProcessorChain`] observes and enriches spans at start and end; ended,
//! sampled spans flow into a [`BatchExporter`] that flushes bounded,
//! ordered batches to a pluggable sink with retry, drop-on-overflow and
//! graceful shutdown. A parallel [`ScopeStack`] carries key/value context
//! for log records.
//!
//! Telemetry is best-effort by design: sampler, processor and exporter
//! failures are isolated from the request path, and nothing in the hot
//! path (`start_span`, attribute writes, `end`) blocks on I/O.

pub mod batch;
pub mod exporter;
pub mod processor;
pub mod resource;
pub mod sampler;
pub mod scope;
pub mod span;
pub mod tracer;

// Re-export main types
pub use batch::{BatchConfig, BatchExporter, ExportMetrics, RetryConfig, SubmitError};
pub use exporter::{
    ExportError, JsonLinesExporter, NullExporter, SpanExporter, SpanExporterBoxed, StdoutExporter,
};
pub use processor::{AttributeStamper, ProcessorChain, SpanProcessor, TenantEnricher};
pub use resource::{EnvTenant, FixedTenant, ResourceDescriptor, TenantSource};
pub use sampler::{
    AlwaysOffSampler, AlwaysOnSampler, ParentBasedSampler, Sampler, TraceIdRatioSampler,
};
pub use scope::{ScopeGuard, ScopeStack};
pub use span::{AttributeValue, Span, SpanBatch, SpanContext, SpanEvent, SpanKind, SpanStatus};
pub use tracer::{ActiveSpan, TraceError, Tracer, TracerBuilder};
