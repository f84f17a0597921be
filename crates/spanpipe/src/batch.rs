//! Batching exporter: the pipeline's only stateful, concurrency-sensitive
//! component.
//!
//! Ended, sampled spans are appended to a bounded in-memory queue from any
//! number of request tasks; a dedicated background worker swaps the queue
//! contents out and sends them to the sink in bounded, ordered batches.
//! Appends never block and never perform I/O - beyond `max_queue_size` the
//! incoming span is dropped (drop-newest) and counted. Flushes are
//! serialized: the worker is the only flusher, so a second flush can never
//! overtake one in progress and sink-side ordering is preserved.
//!
//! On sink failure the whole batch is retried with capped exponential
//! backoff; once retries are exhausted the batch is dropped and reported.
//! Failures never surface to request code - the only hard error is
//! submitting after shutdown.

use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::span::{Span, SpanBatch};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before a given attempt (0-indexed; the first attempt is free).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Configuration for the batch exporter.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Queue capacity; appends beyond this are dropped (drop-newest).
    pub max_queue_size: usize,
    /// Maximum spans per sink call.
    pub max_batch_size: usize,
    /// Periodic flush interval.
    pub scheduled_delay: Duration,
    /// Deadline for a single sink call.
    pub export_timeout: Duration,
    /// Whole-batch retry policy.
    pub retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            export_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Error types for span submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The exporter has been shut down; submitting now is API misuse.
    #[error("batch exporter is shut down")]
    ShutDown,
}

/// Thread-safe pipeline counters.
///
/// All loads and stores use `Ordering::Relaxed`: these are purely
/// statistical counters with no control-flow dependencies, so slightly
/// stale reads are acceptable and no happens-before edges are needed.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    spans_exported: AtomicU64,
    batches_exported: AtomicU64,
    export_errors: AtomicU64,
    batches_dropped: AtomicU64,
    spans_dropped_overflow: AtomicU64,
    spans_dropped_shutdown: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    /// Failed sink calls (each retry attempt counts once).
    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    /// Batches abandoned after exhausting retries.
    pub fn batches_dropped(&self) -> u64 {
        self.batches_dropped.load(Ordering::Relaxed)
    }

    /// Spans rejected because the queue was full.
    pub fn spans_dropped_overflow(&self) -> u64 {
        self.spans_dropped_overflow.load(Ordering::Relaxed)
    }

    /// Spans still unflushed when the shutdown timeout expired.
    pub fn spans_dropped_shutdown(&self) -> u64 {
        self.spans_dropped_shutdown.load(Ordering::Relaxed)
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_overflow(&self) {
        self.spans_dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    fn record_shutdown_drop(&self, span_count: u64) {
        self.spans_dropped_shutdown
            .fetch_add(span_count, Ordering::Relaxed);
    }
}

/// State shared between submitters, the worker and shutdown.
struct Shared {
    queue: Mutex<Vec<Span>>,
    /// Spans currently handed to the sink (for shutdown accounting).
    inflight: AtomicU64,
    shut_down: AtomicBool,
    flush_notify: Notify,
    metrics: ExportMetrics,
}

/// Buffers ended spans and flushes them to a sink from a background task.
pub struct BatchExporter {
    shared: Arc<Shared>,
    config: BatchConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl BatchExporter {
    /// Spawns the background flush worker. Must be called within a tokio
    /// runtime.
    pub fn new(config: BatchConfig, sink: Arc<dyn SpanExporterBoxed>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            inflight: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            flush_notify: Notify::new(),
            metrics: ExportMetrics::default(),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = tokio::spawn(run_worker(
            Arc::clone(&shared),
            sink,
            config.clone(),
            shutdown_rx,
        ));

        Self {
            shared,
            config,
            worker: Mutex::new(Some(worker)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    /// Appends an ended span to the current batch. Non-blocking and free of
    /// I/O; overflow drops the incoming span and counts it rather than
    /// slowing down the caller.
    pub fn submit(&self, span: Span) -> Result<(), SubmitError> {
        let batch_ready = {
            let mut queue = self.shared.queue.lock().unwrap();
            // The shutdown flag flips under this same lock, so a submit that
            // passes the check has pushed before the final drain runs.
            if self.shared.shut_down.load(Ordering::Acquire) {
                return Err(SubmitError::ShutDown);
            }
            if queue.len() >= self.config.max_queue_size {
                drop(queue);
                self.shared.metrics.record_overflow();
                tracing::debug!("span queue full; dropping incoming span");
                return Ok(());
            }
            queue.push(span);
            queue.len() >= self.config.max_batch_size
        };

        if batch_ready {
            self.shared.flush_notify.notify_one();
        }
        Ok(())
    }

    pub fn metrics(&self) -> &ExportMetrics {
        &self.shared.metrics
    }

    /// Number of spans currently buffered.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Stops accepting spans, performs a final flush and waits up to
    /// `timeout` for the worker to finish. Spans still unflushed when the
    /// timeout expires are dropped and counted. Idempotent.
    pub async fn shutdown(&self, timeout: Duration) {
        let already_down = {
            let _queue = self.shared.queue.lock().unwrap();
            self.shared.shut_down.swap(true, Ordering::AcqRel)
        };
        if already_down {
            return;
        }

        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }

        let handle = self.worker.lock().unwrap().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                handle.abort();
                let remaining = {
                    let mut queue = self.shared.queue.lock().unwrap();
                    let n = queue.len() as u64;
                    queue.clear();
                    n
                } + self.shared.inflight.load(Ordering::Acquire);
                self.shared.metrics.record_shutdown_drop(remaining);
                tracing::warn!(
                    dropped = remaining,
                    "shutdown timeout expired; dropping unflushed spans"
                );
            }
        }
    }
}

impl Drop for BatchExporter {
    fn drop(&mut self) {
        // Dropped without shutdown: stop the detached worker.
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                handle.abort();
            }
        }
    }
}

/// Background flush loop: periodic tick, size trigger, shutdown drain.
async fn run_worker(
    shared: Arc<Shared>,
    sink: Arc<dyn SpanExporterBoxed>,
    config: BatchConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(config.scheduled_delay);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                drain_queue(&shared, sink.as_ref(), &config, true).await;
            }
            _ = shared.flush_notify.notified() => {
                // The size trigger flushes full batches only; a trailing
                // remainder waits for the timer or shutdown.
                drain_queue(&shared, sink.as_ref(), &config, false).await;
            }
            _ = &mut shutdown_rx => {
                // Final flush of everything still buffered.
                drain_queue(&shared, sink.as_ref(), &config, true).await;
                break;
            }
        }
    }
}

/// Swaps spans out of the queue in `max_batch_size` chunks and sends them,
/// one batch in flight at a time, preserving append order. With `drain_all`
/// unset, only full chunks are taken and the remainder stays queued.
async fn drain_queue(
    shared: &Shared,
    sink: &dyn SpanExporterBoxed,
    config: &BatchConfig,
    drain_all: bool,
) {
    loop {
        let chunk: Vec<Span> = {
            let mut queue = shared.queue.lock().unwrap();
            if queue.is_empty() || (!drain_all && queue.len() < config.max_batch_size) {
                return;
            }
            let take = queue.len().min(config.max_batch_size);
            queue.drain(..take).collect()
        };

        let count = chunk.len() as u64;
        shared.inflight.store(count, Ordering::Release);
        let sent = send_with_retry(sink, SpanBatch::with_spans(chunk), config, &shared.metrics).await;
        if let Err(e) = sent {
            shared.metrics.record_batch_dropped();
            tracing::warn!(
                sink = sink.name(),
                spans = count,
                error = %e,
                "dropping span batch"
            );
        }
        shared.inflight.store(0, Ordering::Release);
    }
}

/// Sends one batch, retrying the whole batch with capped exponential
/// backoff. Returns `RetriesExhausted` once every attempt has failed;
/// nothing propagates to request code.
async fn send_with_retry(
    sink: &dyn SpanExporterBoxed,
    batch: SpanBatch,
    config: &BatchConfig,
    metrics: &ExportMetrics,
) -> Result<(), ExportError> {
    let span_count = batch.len() as u64;
    let max_attempts = config.retry.max_retries + 1;

    for attempt in 0..max_attempts {
        let delay = config.retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let result = match tokio::time::timeout(config.export_timeout, sink.export_boxed(batch.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout),
        };

        match result {
            Ok(()) => {
                metrics.record_success(span_count);
                return Ok(());
            }
            Err(e) => {
                metrics.record_error();
                tracing::warn!(
                    sink = sink.name(),
                    error = %e,
                    attempt = attempt + 1,
                    "span batch export failed"
                );
            }
        }
    }

    Err(ExportError::RetriesExhausted {
        attempts: max_attempts,
    })
}
