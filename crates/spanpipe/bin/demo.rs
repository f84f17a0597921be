//! End-to-end pipeline demo.
//!
//! Drives the full path: concurrent request tasks starting nested spans,
//! tenant enrichment on end, batched delivery to a simulated flaky backend
//! (exercising whole-batch retry), log scopes, and graceful shutdown with a
//! final metrics dashboard.
//!
//! ```bash
//! cargo run -p spanpipe --bin demo --features demo
//! ```

use spanpipe::{
    AlwaysOnSampler, AttributeValue, BatchConfig, ExportError, FixedTenant, ResourceDescriptor,
    RetryConfig, ScopeStack, SpanBatch, SpanExporter, SpanKind, TenantEnricher, Tracer,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A backend that fails a fraction of sends, to show retry in action.
struct FlakyBackend {
    failure_rate: f64,
    attempts: AtomicU64,
    delivered_spans: AtomicU64,
}

impl FlakyBackend {
    fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate,
            attempts: AtomicU64::new(0),
            delivered_spans: AtomicU64::new(0),
        }
    }
}

impl SpanExporter for FlakyBackend {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if rand::random::<f64>() < self.failure_rate {
            return Err(ExportError::Transport("simulated backend failure".into()));
        }
        self.delivered_spans
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky-backend"
    }
}

async fn handle_request(tracer: Tracer, task_id: usize, request_id: usize) {
    let scopes = ScopeStack::new();
    let _request_scope = scopes.begin_scope([
        ("request.id".to_string(), AttributeValue::Int(request_id as i64)),
        (
            "worker.id".to_string(),
            AttributeValue::String(format!("worker-{}", task_id)),
        ),
    ]);

    let mut root = tracer.span(format!("handle-request-{}", request_id));
    root.set_attribute("http.method", "GET");
    root.set_attribute("http.route", "/api/v1/blogs");
    let root_ctx = root.context();

    // Child span across an await point; the parent context is just a value.
    let mut db = tracer
        .child_span("db.query", &root_ctx)
        .expect("parent context is valid");
    tokio::time::sleep(Duration::from_millis(2)).await;
    db.add_event("created blog in database");
    if request_id % 7 == 0 {
        db.end_error("connection reset");
        root.end_error("downstream failure");
        return;
    }
    db.end_ok();
    root.end_ok();
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("--- spanpipe demo ---\n");

    let backend = Arc::new(FlakyBackend::new(0.15));
    let tracer = Tracer::builder(
        ResourceDescriptor::from_env("demo-service", env!("CARGO_PKG_VERSION")),
    )
    .with_sampler(AlwaysOnSampler)
    .with_processor(TenantEnricher::new(Arc::new(FixedTenant::new("4711"))))
    .with_sink(backend.clone())
    .with_batch_config(BatchConfig {
        max_batch_size: 64,
        scheduled_delay: Duration::from_millis(200),
        retry: RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        },
        ..BatchConfig::default()
    })
    .build();

    // A marker span showing explicit kinds and events.
    let mut startup = tracer
        .start_span_with("startup", SpanKind::Internal, None)
        .expect("root span");
    startup.add_event("pipeline configured");
    tracer.end(startup);

    let num_workers = 4;
    let requests_per_worker = 50;
    println!(
        "running {} workers x {} requests...\n",
        num_workers, requests_per_worker
    );

    let mut tasks = Vec::new();
    for task_id in 0..num_workers {
        let tracer = tracer.clone();
        tasks.push(tokio::spawn(async move {
            for request_id in 0..requests_per_worker {
                handle_request(tracer.clone(), task_id, request_id).await;
            }
        }));
    }
    for task in tasks {
        task.await.expect("worker task panicked");
    }

    tracer.shutdown(Duration::from_secs(5)).await;

    let metrics = tracer.metrics();
    println!("\n--- results ---");
    println!("spans exported:          {}", metrics.spans_exported());
    println!("batches exported:        {}", metrics.batches_exported());
    println!("failed sink calls:       {}", metrics.export_errors());
    println!("batches dropped:         {}", metrics.batches_dropped());
    println!("dropped (overflow):      {}", metrics.spans_dropped_overflow());
    println!("dropped (shutdown):      {}", metrics.spans_dropped_shutdown());
    println!("processor panics:        {}", tracer.processor_panics());
    println!(
        "backend: {} attempts, {} spans delivered",
        backend.attempts.load(Ordering::Relaxed),
        backend.delivered_spans.load(Ordering::Relaxed)
    );
}
