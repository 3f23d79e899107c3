//! Telemetry ingestion pipeline.
//!
//! Inbound `device/<id>/data` messages are parsed into samples, attributed
//! to a controller through the [`ControllerResolver`], pushed to realtime
//! subscribers and buffered by the [`TelemetryBuffer`] until a size or time
//! threshold triggers a bulk insert.

pub mod buffer;
pub mod config;
pub mod ingest;
pub mod payload;
pub mod resolver;

pub use buffer::{BufferError, BufferStats, TelemetryBuffer};
pub use config::TelemetryConfig;
pub use ingest::{IngestError, IngestStats, IngestionService};
pub use payload::parse_sample;
pub use resolver::ControllerResolver;
