//! Core types and traits for IrBridge.
//!
//! This crate defines the domain model shared by the telemetry ingestion
//! pipeline and the command dispatch engine, along with the narrow
//! collaborator traits (directories and stores) the pipeline depends on.

pub mod config;
pub mod error;
pub mod model;
pub mod realtime;
pub mod store;
pub mod topic;

pub use error::{Error, Result};

pub use model::command::{
    AdvanceOutcome, CommandId, CommandRecord, CommandStatus, StatusUpdate, Transition,
    UpdateSource,
};
pub use model::directory::{
    ApplianceId, ApplianceRecord, ControllerId, ControllerRecord, IrCodeId, IrCodeRecord,
};
pub use model::telemetry::{
    BulkInsertReport, MetricStats, SampleError, TelemetrySample, MAX_METRIC_LEN,
};

pub use realtime::{controller_group, Broadcaster, RealtimeEvent, RealtimeHub};
pub use store::{
    ApplianceDirectory, CommandStore, ControllerDirectory, IrCodeDirectory, TelemetryStore,
};
pub use topic::InboundTopic;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars};
    pub use crate::error::{Error, Result};
    pub use crate::model::command::{CommandRecord, CommandStatus};
    pub use crate::model::telemetry::TelemetrySample;
    pub use crate::realtime::{Broadcaster, RealtimeEvent};
    pub use crate::store::{CommandStore, ControllerDirectory, TelemetryStore};
}
