//! The sink seam: where finished, sampled spans leave the pipeline.
//!
//! Concrete sinks (console, collector endpoint, cloud backend) satisfy one
//! contract: accept an ordered batch of finalized spans, succeed or fail.
//! The core is indifferent to wire format.

use crate::span::SpanBatch;
use std::future::Future;
use thiserror::Error;

/// Error types for span export operations.
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Transport-layer error (network, file I/O).
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// All retry attempts exhausted.
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    /// The sink did not answer within the export deadline.
    #[error("export operation timed out")]
    Timeout,
}

/// Trait for exporting span batches to a backend.
///
/// Uses native async fn in traits. `impl Future` return types are not
/// object-safe; for dynamic dispatch use [`SpanExporterBoxed`].
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of spans.
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Object-safe version of [`SpanExporter`] for dynamic dispatch.
pub trait SpanExporterBoxed: Send + Sync {
    /// Exports a batch of spans (boxed future for object safety).
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    /// Returns the exporter name for diagnostics.
    fn name(&self) -> &str;
}

/// Blanket implementation: any `SpanExporter` can be used boxed.
impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Console sink for development and debugging.
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    /// With `verbose` set, prints one line per span; otherwise only batch
    /// summaries.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SpanExporter for StdoutExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        println!("=== exporting {} spans ===", batch.len());
        if self.verbose {
            for span in &batch.spans {
                let ctx = span.context();
                println!(
                    "span: trace_id={:032x} span_id={:016x} parent={} name={} duration={}ns status={:?}",
                    ctx.trace_id,
                    ctx.span_id,
                    ctx.parent_span_id
                        .map(|p| format!("{:016x}", p))
                        .unwrap_or_else(|| "-".to_string()),
                    span.name(),
                    span.duration_nanos(),
                    span.status(),
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Appends each span as one JSON line to a local file.
pub struct JsonLinesExporter {
    file_path: String,
}

impl JsonLinesExporter {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl SpanExporter for JsonLinesExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        use tokio::io::AsyncWriteExt;

        let mut buf = String::new();
        for span in &batch.spans {
            let line = serde_json::to_string(span)
                .map_err(|e| ExportError::Serialization(e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "json_lines"
    }
}

/// Discards all spans.
#[derive(Default)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::span::Span;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records every batch for verification, preserving batch boundaries.
    pub(crate) struct RecordingExporter {
        batches: Mutex<Vec<Vec<Span>>>,
    }

    impl RecordingExporter {
        pub(crate) fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn batches(&self) -> Vec<Vec<Span>> {
            self.batches.lock().unwrap().clone()
        }

        pub(crate) fn all_spans(&self) -> Vec<Span> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
        }

        pub(crate) fn exported_count(&self) -> usize {
            self.batches.lock().unwrap().iter().map(Vec::len).sum()
        }
    }

    impl SpanExporter for RecordingExporter {
        async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
            self.batches.lock().unwrap().push(batch.spans);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Fails a configurable number of sends before succeeding, recording
    /// spans from successful sends.
    pub(crate) struct FailingExporter {
        failures_remaining: AtomicU32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<Span>>,
    }

    impl FailingExporter {
        pub(crate) fn new(fail_count: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(fail_count),
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::Relaxed)
        }

        pub(crate) fn delivered_count(&self) -> usize {
            self.delivered.lock().unwrap().len()
        }
    }

    impl SpanExporter for FailingExporter {
        async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let remaining = self.failures_remaining.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
                return Err(ExportError::Transport("simulated failure".to_string()));
            }
            self.delivered.lock().unwrap().extend(batch.spans);
            Ok(())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Span, SpanContext, SpanKind};

    fn sample_span(name: &str) -> Span {
        let mut span = Span::start(
            SpanContext {
                trace_id: 1,
                span_id: 1,
                parent_span_id: None,
                sampled: true,
            },
            name,
            SpanKind::Internal,
        );
        span.finalize(None);
        span
    }

    #[tokio::test]
    async fn stdout_exporter_accepts_batches() {
        let exporter = StdoutExporter::new(false);
        let mut batch = SpanBatch::new();
        batch.add(sample_span("test"));
        assert!(exporter.export(batch).await.is_ok());
    }

    #[tokio::test]
    async fn json_lines_exporter_appends() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("spanpipe-test-{}.jsonl", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let exporter = JsonLinesExporter::new(&path_str);
        for _ in 0..2 {
            let mut batch = SpanBatch::new();
            batch.add(sample_span("persisted"));
            exporter.export(batch).await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["name"], "persisted");
        }
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn boxed_dispatch_works() {
        let exporter: Box<dyn SpanExporterBoxed> = Box::new(NullExporter::new());
        let mut batch = SpanBatch::new();
        batch.add(sample_span("boxed"));
        assert!(exporter.export_boxed(batch).await.is_ok());
        assert_eq!(exporter.name(), "null");
    }
}
