//! Persistent storage backend using redb.
//!
//! Records are stored as JSON. Telemetry is keyed by
//! `(controller_id, metric, timestamp_micros, seq)` so range queries per
//! controller and metric are ordered scans; `seq` keeps identical readings
//! from overwriting each other.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use ::redb::{Database, ReadableTable, TableDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use irbridge_core::{
    AdvanceOutcome, ApplianceDirectory, ApplianceRecord, BulkInsertReport, CommandRecord,
    CommandStatus, CommandStore, ControllerDirectory, ControllerRecord, IrCodeDirectory,
    IrCodeRecord, MetricStats, Result as CoreResult, StatusUpdate, TelemetrySample,
    TelemetryStore, Transition,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{in_window, newest_first, pending_oldest_first};
use crate::error::Result;
use crate::seed::DirectoryAdmin;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
type TelemetryKey<'a> = (&'a str, &'a str, i64, u64);

const CONTROLLERS: JsonTable = TableDefinition::new("controllers");
const CONTROLLER_EXTERNAL: TableDefinition<&str, &str> =
    TableDefinition::new("controller_external_ids");
const APPLIANCES: JsonTable = TableDefinition::new("appliances");
const IR_CODES: JsonTable = TableDefinition::new("ir_codes");
const COMMANDS: JsonTable = TableDefinition::new("commands");
const TELEMETRY: TableDefinition<(&str, &str, i64, u64), &[u8]> =
    TableDefinition::new("telemetry");

/// redb-backed implementation of every store and directory trait.
pub struct RedbStore {
    db: Database,
    seq: AtomicU64,
}

impl RedbStore {
    /// Open or create a store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };

        // Create every table up front so read transactions never miss one.
        let txn = db.begin_write()?;
        {
            txn.open_table(CONTROLLERS)?;
            txn.open_table(CONTROLLER_EXTERNAL)?;
            txn.open_table(APPLIANCES)?;
            txn.open_table(IR_CODES)?;
            txn.open_table(COMMANDS)?;
            txn.open_table(TELEMETRY)?;
        }
        txn.commit()?;

        info!(path = %path.display(), "Opened redb store");
        let seed = Utc::now().timestamp_micros().max(0) as u64;
        Ok(Self {
            db,
            seq: AtomicU64::new(seed),
        })
    }

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table)?;
            t.insert(key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> Result<Option<T>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;
        let found = match t.get(key)? {
            Some(guard) => Some(serde_json::from_slice(guard.value())?),
            None => None,
        };
        Ok(found)
    }

    fn scan_json<T: DeserializeOwned>(&self, table: JsonTable) -> Result<Vec<T>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;
        let mut out = Vec::new();
        for entry in t.iter()? {
            let (_key, value) = entry?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn find_controller_by_external(&self, external_id: &str) -> Result<Option<ControllerRecord>> {
        let internal = {
            let txn = self.db.begin_read()?;
            let t = txn.open_table(CONTROLLER_EXTERNAL)?;
            let found = t.get(external_id)?.map(|g| g.value().to_string());
            found
        };
        match internal {
            Some(id) => self.get_json(CONTROLLERS, &id),
            None => Ok(None),
        }
    }

    fn insert_samples(&self, samples: &[TelemetrySample]) -> Result<BulkInsertReport> {
        let mut report = BulkInsertReport::default();
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(TELEMETRY)?;
            for (idx, sample) in samples.iter().enumerate() {
                let bytes = match serde_json::to_vec(sample) {
                    Ok(b) => b,
                    Err(e) => {
                        report.failures.push((idx, e.to_string()));
                        continue;
                    }
                };
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                let key: TelemetryKey = (
                    sample.controller_id.as_str(),
                    sample.metric.as_str(),
                    sample.timestamp.timestamp_micros(),
                    seq,
                );
                match t.insert(key, bytes.as_slice()) {
                    Ok(_) => report.inserted += 1,
                    Err(e) => report.failures.push((idx, e.to_string())),
                }
            }
        }
        txn.commit()?;
        Ok(report)
    }

    /// Every sample of a controller, ordered by metric then timestamp.
    fn controller_samples(&self, controller_id: &str) -> Result<Vec<TelemetrySample>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(TELEMETRY)?;
        let mut out = Vec::new();
        for entry in t.range((controller_id, "", i64::MIN, 0u64)..)? {
            let (key, value) = entry?;
            if key.value().0 != controller_id {
                break;
            }
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn metric_samples(
        &self,
        controller_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(TELEMETRY)?;
        let start = (controller_id, metric, from.timestamp_micros(), 0u64);
        let end = (controller_id, metric, to.timestamp_micros(), u64::MAX);
        let mut out = Vec::new();
        for entry in t.range(start..=end)? {
            let (_key, value) = entry?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn purge_samples(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_us = cutoff.timestamp_micros();
        let txn = self.db.begin_write()?;
        let removed;
        {
            let mut t = txn.open_table(TELEMETRY)?;
            let mut doomed: Vec<(String, String, i64, u64)> = Vec::new();
            for entry in t.iter()? {
                let (key, _value) = entry?;
                let (cid, metric, ts, seq) = key.value();
                if ts < cutoff_us {
                    doomed.push((cid.to_string(), metric.to_string(), ts, seq));
                }
            }
            for (cid, metric, ts, seq) in &doomed {
                t.remove((cid.as_str(), metric.as_str(), *ts, *seq))?;
            }
            removed = doomed.len();
        }
        txn.commit()?;
        Ok(removed)
    }

    fn advance_command(&self, id: &str, update: &StatusUpdate) -> Result<Option<AdvanceOutcome>> {
        let txn = self.db.begin_write()?;
        let outcome = {
            let mut t = txn.open_table(COMMANDS)?;
            let existing = t.get(id)?.map(|g| g.value().to_vec());
            let Some(bytes) = existing else {
                return Ok(None);
            };
            let mut record: CommandRecord = serde_json::from_slice(&bytes)?;
            let transition = record.advance(update);
            if transition == Transition::Applied {
                let bytes = serde_json::to_vec(&record)?;
                t.insert(id, bytes.as_slice())?;
            }
            AdvanceOutcome { transition, record }
        };
        txn.commit()?;
        debug!(
            command_id = id,
            status = %outcome.record.status,
            transition = ?outcome.transition,
            "Command advanced"
        );
        Ok(Some(outcome))
    }

    fn purge_commands(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed;
        {
            let mut t = txn.open_table(COMMANDS)?;
            let mut doomed = Vec::new();
            for entry in t.iter()? {
                let (key, value) = entry?;
                let record: CommandRecord = serde_json::from_slice(value.value())?;
                if record.status.is_terminal() && record.created_at < cutoff {
                    doomed.push(key.value().to_string());
                }
            }
            for id in &doomed {
                t.remove(id.as_str())?;
            }
            removed = doomed.len();
        }
        txn.commit()?;
        Ok(removed)
    }
}

impl DirectoryAdmin for RedbStore {
    fn put_controller(&self, controller: &ControllerRecord) -> Result<()> {
        let bytes = serde_json::to_vec(controller)?;
        let txn = self.db.begin_write()?;
        {
            let mut records = txn.open_table(CONTROLLERS)?;
            let previous = records
                .insert(controller.id.as_str(), bytes.as_slice())?
                .map(|g| g.value().to_vec());
            let mut index = txn.open_table(CONTROLLER_EXTERNAL)?;
            if let Some(prev) = previous {
                let prev: ControllerRecord = serde_json::from_slice(&prev)?;
                if prev.external_id != controller.external_id {
                    index.remove(prev.external_id.as_str())?;
                }
            }
            index.insert(controller.external_id.as_str(), controller.id.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn put_appliance(&self, appliance: &ApplianceRecord) -> Result<()> {
        self.put_json(APPLIANCES, &appliance.id, appliance)
    }

    fn put_ir_code(&self, code: &IrCodeRecord) -> Result<()> {
        self.put_json(IR_CODES, &code.id, code)
    }

    fn remove_controller(&self, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut records = txn.open_table(CONTROLLERS)?;
            let removed = records.remove(id)?.map(|g| g.value().to_vec());
            existed = removed.is_some();
            if let Some(bytes) = removed {
                let record: ControllerRecord = serde_json::from_slice(&bytes)?;
                let mut index = txn.open_table(CONTROLLER_EXTERNAL)?;
                index.remove(record.external_id.as_str())?;
            }
        }
        txn.commit()?;
        Ok(existed)
    }
}

#[async_trait]
impl ControllerDirectory for RedbStore {
    async fn find_by_external_id(&self, external_id: &str) -> CoreResult<Option<ControllerRecord>> {
        Ok(self.find_controller_by_external(external_id)?)
    }

    async fn get_controller(&self, id: &str) -> CoreResult<Option<ControllerRecord>> {
        Ok(self.get_json(CONTROLLERS, id)?)
    }
}

#[async_trait]
impl ApplianceDirectory for RedbStore {
    async fn get_appliance(&self, id: &str) -> CoreResult<Option<ApplianceRecord>> {
        Ok(self.get_json(APPLIANCES, id)?)
    }
}

#[async_trait]
impl IrCodeDirectory for RedbStore {
    async fn get_ir_code(&self, id: &str) -> CoreResult<Option<IrCodeRecord>> {
        Ok(self.get_json(IR_CODES, id)?)
    }
}

#[async_trait]
impl TelemetryStore for RedbStore {
    async fn insert_many(&self, samples: Vec<TelemetrySample>) -> CoreResult<BulkInsertReport> {
        Ok(self.insert_samples(&samples)?)
    }

    async fn latest_by_metric(&self, controller_id: &str) -> CoreResult<Vec<TelemetrySample>> {
        // Samples come back grouped by metric in ascending time order.
        let mut latest: BTreeMap<String, TelemetrySample> = BTreeMap::new();
        for sample in self.controller_samples(controller_id)? {
            latest.insert(sample.metric.clone(), sample);
        }
        Ok(latest.into_values().collect())
    }

    async fn stats(
        &self,
        controller_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Option<MetricStats>> {
        let samples = self.metric_samples(controller_id, metric, from, to)?;
        Ok(MetricStats::from_values(samples.iter().map(|s| s.value)))
    }

    async fn range(
        &self,
        controller_id: &str,
        metric: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<TelemetrySample>> {
        let mut samples = match metric {
            Some(m) => self.metric_samples(controller_id, m, from, to)?,
            None => self
                .controller_samples(controller_id)?
                .into_iter()
                .filter(|s| in_window(s, from, to))
                .collect(),
        };
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        Ok(self.purge_samples(cutoff)?)
    }
}

#[async_trait]
impl CommandStore for RedbStore {
    async fn insert(&self, record: &CommandRecord) -> CoreResult<()> {
        Ok(self.put_json(COMMANDS, &record.id, record)?)
    }

    async fn get(&self, id: &str) -> CoreResult<Option<CommandRecord>> {
        Ok(self.get_json(COMMANDS, id)?)
    }

    async fn advance(&self, id: &str, update: &StatusUpdate) -> CoreResult<Option<AdvanceOutcome>> {
        Ok(self.advance_command(id, update)?)
    }

    async fn list_by_controller(
        &self,
        controller_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<CommandRecord>> {
        let mut records: Vec<CommandRecord> = self.scan_json(COMMANDS)?;
        records.retain(|r| r.controller_id == controller_id);
        Ok(newest_first(records, limit))
    }

    async fn list_pending(&self, controller_id: Option<&str>) -> CoreResult<Vec<CommandRecord>> {
        let mut records: Vec<CommandRecord> = self.scan_json(COMMANDS)?;
        if let Some(c) = controller_id {
            records.retain(|r| r.controller_id == c);
        }
        Ok(pending_oldest_first(records))
    }

    async fn status_counts(&self) -> CoreResult<HashMap<CommandStatus, usize>> {
        let records: Vec<CommandRecord> = self.scan_json(COMMANDS)?;
        let mut counts = HashMap::new();
        for r in records {
            *counts.entry(r.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        Ok(self.purge_commands(cutoff)?)
    }
}
