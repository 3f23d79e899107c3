//! Batching buffer in front of the telemetry store.
//!
//! Samples accumulate until either:
//! - the buffer reaches `batch_size` (size-based flush)
//! - `flush_interval` has elapsed since the first sample of the current
//!   sequence (time-based flush)
//!
//! A flush detaches the buffered samples under the lock and hands them to a
//! single writer task, so producers never wait on storage and batches are
//! written in the order they were detached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use irbridge_core::{SampleError, TelemetrySample, TelemetryStore};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TelemetryConfig;

/// Buffer errors.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The sample failed validation and was dropped.
    #[error("sample rejected: {0}")]
    Rejected(#[from] SampleError),

    /// The buffer has been shut down.
    #[error("telemetry buffer is closed")]
    Closed,
}

/// Counters since the buffer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub accepted: u64,
    pub rejected: u64,
    /// Batches handed to the store
    pub batches: u64,
    /// Samples the store reported as written
    pub persisted: u64,
    /// Samples the store failed to write
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    batches: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

enum WriterMsg {
    Batch(Vec<TelemetrySample>),
    Barrier(oneshot::Sender<()>),
}

struct State {
    samples: Vec<TelemetrySample>,
    /// Bumped on every detach; a timer only flushes the sequence it was armed for.
    generation: u64,
    /// `None` once shut down.
    tx: Option<mpsc::UnboundedSender<WriterMsg>>,
}

impl State {
    fn detach(&mut self) -> Option<usize> {
        if self.samples.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.samples);
        let len = batch.len();
        self.generation += 1;
        match &self.tx {
            Some(tx) if tx.send(WriterMsg::Batch(batch)).is_ok() => Some(len),
            _ => {
                error!(count = len, "Telemetry writer is gone, dropping batch");
                None
            }
        }
    }
}

struct Inner {
    state: Mutex<State>,
    counters: Arc<Counters>,
    batch_size: usize,
    flush_interval: Duration,
}

/// Telemetry batch buffer. Cheap to clone.
#[derive(Clone)]
pub struct TelemetryBuffer {
    inner: Arc<Inner>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TelemetryBuffer {
    /// Create the buffer and spawn its writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn TelemetryStore>, config: &TelemetryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_writer(store, rx, counters.clone()));

        info!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            "Telemetry buffer started"
        );

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    samples: Vec::with_capacity(config.batch_size),
                    generation: 0,
                    tx: Some(tx),
                }),
                counters,
                batch_size: config.batch_size.max(1),
                flush_interval: config.flush_interval(),
            }),
            writer: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Validate and buffer a sample.
    pub fn accept(&self, sample: TelemetrySample) -> Result<(), BufferError> {
        if let Err(e) = sample.validate() {
            self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                controller_id = %sample.controller_id,
                metric = %sample.metric,
                error = %e,
                "Dropping invalid telemetry sample"
            );
            return Err(e.into());
        }

        let mut state = self.inner.state.lock();
        if state.tx.is_none() {
            return Err(BufferError::Closed);
        }
        state.samples.push(sample);
        self.inner.counters.accepted.fetch_add(1, Ordering::Relaxed);

        if state.samples.len() >= self.inner.batch_size {
            if let Some(count) = state.detach() {
                debug!(count, "Size-triggered telemetry flush");
            }
        } else if state.samples.len() == 1 {
            self.arm_timer(state.generation);
        }
        Ok(())
    }

    fn arm_timer(&self, generation: u64) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.flush_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = inner.state.lock();
            if state.generation == generation {
                if let Some(count) = state.detach() {
                    debug!(count, "Interval-triggered telemetry flush");
                }
            }
        });
    }

    /// Detach whatever is buffered and wait until every batch detached so
    /// far has been written.
    pub async fn flush(&self) -> Result<(), BufferError> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            state.detach();
            let tx = state.tx.as_ref().ok_or(BufferError::Closed)?;
            tx.send(WriterMsg::Barrier(done_tx))
                .map_err(|_| BufferError::Closed)?;
        }
        done_rx.await.map_err(|_| BufferError::Closed)
    }

    /// Flush the remaining samples, stop accepting new ones and wait for the
    /// writer to drain.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.detach();
            state.tx = None;
        }
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Telemetry writer task failed");
            }
        }
        let stats = self.stats();
        info!(
            persisted = stats.persisted,
            failed = stats.failed,
            "Telemetry buffer shut down"
        );
    }

    /// Samples currently buffered and not yet detached.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().samples.len()
    }

    pub fn stats(&self) -> BufferStats {
        let c = &self.inner.counters;
        BufferStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run_writer(
    store: Arc<dyn TelemetryStore>,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    counters: Arc<Counters>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Batch(batch) => write_batch(store.as_ref(), batch, &counters).await,
            WriterMsg::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Telemetry writer stopped");
}

async fn write_batch(store: &dyn TelemetryStore, batch: Vec<TelemetrySample>, counters: &Counters) {
    let count = batch.len();
    counters.batches.fetch_add(1, Ordering::Relaxed);
    match store.insert_many(batch).await {
        Ok(report) => {
            counters
                .persisted
                .fetch_add(report.inserted as u64, Ordering::Relaxed);
            if report.is_complete() {
                info!(count, "Flushed telemetry batch");
            } else {
                counters
                    .failed
                    .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
                let (index, reason) = &report.failures[0];
                warn!(
                    count,
                    inserted = report.inserted,
                    failed = report.failures.len(),
                    first_index = index,
                    first_error = %reason,
                    "Telemetry batch partially written"
                );
            }
        }
        Err(e) => {
            counters.failed.fetch_add(count as u64, Ordering::Relaxed);
            error!(count, error = %e, "Telemetry batch insert failed");
        }
    }
}
