//! Telemetry ingestion service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use irbridge_core::realtime::controller_group;
use irbridge_core::topic::parse_telemetry_topic;
use irbridge_core::{
    Broadcaster, ControllerDirectory, RealtimeEvent, SampleError, TelemetrySample, TelemetryStore,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::{BufferError, BufferStats, TelemetryBuffer};
use crate::config::TelemetryConfig;
use crate::payload::parse_sample;
use crate::resolver::ControllerResolver;

/// Reasons an inbound telemetry message was dropped.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("not a telemetry topic: {0}")]
    Topic(String),

    #[error("unknown controller: {0}")]
    UnknownController(String),

    #[error("invalid telemetry payload: {0}")]
    Payload(#[from] SampleError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Message counters of the service plus those of its buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Messages dropped because the payload did not decode or validate
    pub rejected: u64,
    /// Messages from controllers the directory does not know
    pub unknown_controllers: u64,
    pub buffer: BufferStats,
}

/// Turns inbound telemetry messages into buffered, broadcast samples.
pub struct IngestionService {
    resolver: ControllerResolver,
    buffer: TelemetryBuffer,
    broadcaster: Arc<dyn Broadcaster>,
    rejected: AtomicU64,
    unknown_controllers: AtomicU64,
}

impl IngestionService {
    /// Build the service and start the buffer's writer task.
    pub fn new(
        directory: Arc<dyn ControllerDirectory>,
        store: Arc<dyn TelemetryStore>,
        broadcaster: Arc<dyn Broadcaster>,
        config: TelemetryConfig,
    ) -> Self {
        Self {
            resolver: ControllerResolver::new(directory, config.cache_ttl()),
            buffer: TelemetryBuffer::new(store, &config),
            broadcaster,
            rejected: AtomicU64::new(0),
            unknown_controllers: AtomicU64::new(0),
        }
    }

    /// Handle one message from `device/<id>/data`.
    ///
    /// Returns the accepted sample. Every error means the message was
    /// dropped; nothing is persisted or broadcast for it.
    pub async fn handle_message(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<TelemetrySample, IngestError> {
        let external_id =
            parse_telemetry_topic(topic).ok_or_else(|| IngestError::Topic(topic.to_string()))?;

        let Some(controller_id) = self.resolver.resolve(&external_id).await else {
            self.unknown_controllers.fetch_add(1, Ordering::Relaxed);
            warn!(external_id = %external_id, "Telemetry from unknown controller dropped");
            return Err(IngestError::UnknownController(external_id));
        };

        let sample = parse_sample(&controller_id, payload, Utc::now()).map_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(controller_id = %controller_id, error = %e, "Malformed telemetry dropped");
            e
        })?;

        if let Err(e) = self.buffer.accept(sample.clone()) {
            if matches!(e, BufferError::Rejected(_)) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            return Err(e.into());
        }

        let delivered = self.broadcaster.broadcast(
            &controller_group(&controller_id),
            RealtimeEvent::TelemetryNew {
                controller_id: controller_id.clone(),
                metric: sample.metric.clone(),
                value: sample.value,
                unit: sample.unit.clone(),
                ts: sample.timestamp,
            },
        );
        debug!(
            controller_id = %controller_id,
            metric = %sample.metric,
            subscribers = delivered,
            "Telemetry accepted"
        );
        Ok(sample)
    }

    pub fn resolver(&self) -> &ControllerResolver {
        &self.resolver
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            rejected: self.rejected.load(Ordering::Relaxed),
            unknown_controllers: self.unknown_controllers.load(Ordering::Relaxed),
            buffer: self.buffer.stats(),
        }
    }

    /// Wait until everything accepted so far has been written.
    pub async fn flush(&self) -> Result<(), BufferError> {
        self.buffer.flush().await
    }

    /// Flush and stop the writer.
    pub async fn shutdown(&self) {
        self.buffer.shutdown().await
    }
}
