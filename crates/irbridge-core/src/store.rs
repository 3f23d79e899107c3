//! Collaborator traits consumed by the pipeline.
//!
//! Directories are read-only views of CRUD-owned data. Stores are the
//! durable sinks for telemetry and commands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;
use crate::model::command::{AdvanceOutcome, CommandRecord, CommandStatus, StatusUpdate};
use crate::model::directory::{ApplianceRecord, ControllerRecord, IrCodeRecord};
use crate::model::telemetry::{BulkInsertReport, MetricStats, TelemetrySample};

/// Read access to registered controllers.
#[async_trait]
pub trait ControllerDirectory: Send + Sync {
    /// Look a controller up by the identifier it uses on the wire.
    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ControllerRecord>>;

    /// Look a controller up by internal id.
    async fn get_controller(&self, id: &str) -> Result<Option<ControllerRecord>>;
}

/// Read access to registered appliances.
#[async_trait]
pub trait ApplianceDirectory: Send + Sync {
    async fn get_appliance(&self, id: &str) -> Result<Option<ApplianceRecord>>;
}

/// Read access to IR codes.
#[async_trait]
pub trait IrCodeDirectory: Send + Sync {
    async fn get_ir_code(&self, id: &str) -> Result<Option<IrCodeRecord>>;
}

/// Durable telemetry sink with the queries the maintenance tools use.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Unordered bulk insert. A failing record does not stop the rest.
    async fn insert_many(&self, samples: Vec<TelemetrySample>) -> Result<BulkInsertReport>;

    /// Most recent sample of every metric reported by a controller.
    async fn latest_by_metric(&self, controller_id: &str) -> Result<Vec<TelemetrySample>>;

    /// Aggregate of one metric over `[from, to]`.
    async fn stats(
        &self,
        controller_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<MetricStats>>;

    /// Samples in `[from, to]` in ascending timestamp order.
    async fn range(
        &self,
        controller_id: &str,
        metric: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>>;

    /// Delete samples with a timestamp before `cutoff`; returns how many.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Durable command storage.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn insert(&self, record: &CommandRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<CommandRecord>>;

    /// Atomically apply `update` to the stored record.
    ///
    /// Returns `None` when no record has this id. The update is only written
    /// when it moves the record forward; the returned outcome says which.
    async fn advance(&self, id: &str, update: &StatusUpdate) -> Result<Option<AdvanceOutcome>>;

    /// Newest first.
    async fn list_by_controller(&self, controller_id: &str, limit: usize)
        -> Result<Vec<CommandRecord>>;

    /// Queued and sent commands, oldest first.
    async fn list_pending(&self, controller_id: Option<&str>) -> Result<Vec<CommandRecord>>;

    /// Number of commands per status.
    async fn status_counts(&self) -> Result<HashMap<CommandStatus, usize>>;

    /// Delete acked and failed commands created before `cutoff`.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
