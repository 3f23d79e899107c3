//! Storage backend implementations.

pub mod memory;
pub mod redb;

use chrono::{DateTime, Utc};
use irbridge_core::{CommandRecord, TelemetrySample};

/// Keep the newest `limit` commands, newest first.
pub(crate) fn newest_first(mut records: Vec<CommandRecord>, limit: usize) -> Vec<CommandRecord> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records.truncate(limit);
    records
}

/// Pending commands, oldest first.
pub(crate) fn pending_oldest_first(mut records: Vec<CommandRecord>) -> Vec<CommandRecord> {
    records.retain(|r| r.status.is_pending());
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    records
}

pub(crate) fn in_window(sample: &TelemetrySample, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    sample.timestamp >= from && sample.timestamp <= to
}
