//! In-memory storage backend.
//!
//! Provides non-persistent storage for tests and development.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use irbridge_core::{
    AdvanceOutcome, ApplianceDirectory, ApplianceRecord, BulkInsertReport, CommandRecord,
    CommandStatus, CommandStore, ControllerDirectory, ControllerRecord, IrCodeDirectory,
    IrCodeRecord, MetricStats, Result as CoreResult, StatusUpdate, TelemetrySample,
    TelemetryStore,
};
use parking_lot::RwLock;

use super::{in_window, newest_first, pending_oldest_first};
use crate::error::Result;
use crate::seed::DirectoryAdmin;

#[derive(Default)]
struct Directories {
    controllers: HashMap<String, ControllerRecord>,
    appliances: HashMap<String, ApplianceRecord>,
    ir_codes: HashMap<String, IrCodeRecord>,
}

/// In-memory implementation of every store and directory trait.
#[derive(Default)]
pub struct MemoryStore {
    directories: RwLock<Directories>,
    commands: RwLock<HashMap<String, CommandRecord>>,
    telemetry: RwLock<Vec<TelemetrySample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored telemetry samples.
    pub fn telemetry_len(&self) -> usize {
        self.telemetry.read().len()
    }

    /// Snapshot of every stored sample in insertion order.
    pub fn telemetry_snapshot(&self) -> Vec<TelemetrySample> {
        self.telemetry.read().clone()
    }

    pub fn command_count(&self) -> usize {
        self.commands.read().len()
    }
}

impl DirectoryAdmin for MemoryStore {
    fn put_controller(&self, controller: &ControllerRecord) -> Result<()> {
        self.directories
            .write()
            .controllers
            .insert(controller.id.clone(), controller.clone());
        Ok(())
    }

    fn put_appliance(&self, appliance: &ApplianceRecord) -> Result<()> {
        self.directories
            .write()
            .appliances
            .insert(appliance.id.clone(), appliance.clone());
        Ok(())
    }

    fn put_ir_code(&self, code: &IrCodeRecord) -> Result<()> {
        self.directories
            .write()
            .ir_codes
            .insert(code.id.clone(), code.clone());
        Ok(())
    }

    fn remove_controller(&self, id: &str) -> Result<bool> {
        Ok(self.directories.write().controllers.remove(id).is_some())
    }
}

#[async_trait]
impl ControllerDirectory for MemoryStore {
    async fn find_by_external_id(&self, external_id: &str) -> CoreResult<Option<ControllerRecord>> {
        Ok(self
            .directories
            .read()
            .controllers
            .values()
            .find(|c| c.external_id == external_id)
            .cloned())
    }

    async fn get_controller(&self, id: &str) -> CoreResult<Option<ControllerRecord>> {
        Ok(self.directories.read().controllers.get(id).cloned())
    }
}

#[async_trait]
impl ApplianceDirectory for MemoryStore {
    async fn get_appliance(&self, id: &str) -> CoreResult<Option<ApplianceRecord>> {
        Ok(self.directories.read().appliances.get(id).cloned())
    }
}

#[async_trait]
impl IrCodeDirectory for MemoryStore {
    async fn get_ir_code(&self, id: &str) -> CoreResult<Option<IrCodeRecord>> {
        Ok(self.directories.read().ir_codes.get(id).cloned())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_many(&self, samples: Vec<TelemetrySample>) -> CoreResult<BulkInsertReport> {
        let count = samples.len();
        self.telemetry.write().extend(samples);
        Ok(BulkInsertReport::all(count))
    }

    async fn latest_by_metric(&self, controller_id: &str) -> CoreResult<Vec<TelemetrySample>> {
        let data = self.telemetry.read();
        let mut latest: BTreeMap<&str, &TelemetrySample> = BTreeMap::new();
        for s in data.iter().filter(|s| s.controller_id == controller_id) {
            match latest.get(s.metric.as_str()) {
                Some(cur) if cur.timestamp > s.timestamp => {}
                _ => {
                    latest.insert(s.metric.as_str(), s);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn stats(
        &self,
        controller_id: &str,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Option<MetricStats>> {
        let data = self.telemetry.read();
        Ok(MetricStats::from_values(
            data.iter()
                .filter(|s| s.controller_id == controller_id && s.metric == metric)
                .filter(|s| in_window(s, from, to))
                .map(|s| s.value),
        ))
    }

    async fn range(
        &self,
        controller_id: &str,
        metric: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<TelemetrySample>> {
        let mut out: Vec<TelemetrySample> = self
            .telemetry
            .read()
            .iter()
            .filter(|s| s.controller_id == controller_id)
            .filter(|s| metric.map_or(true, |m| s.metric == m))
            .filter(|s| in_window(s, from, to))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let mut data = self.telemetry.write();
        let before = data.len();
        data.retain(|s| s.timestamp >= cutoff);
        Ok(before - data.len())
    }
}

#[async_trait]
impl CommandStore for MemoryStore {
    async fn insert(&self, record: &CommandRecord) -> CoreResult<()> {
        self.commands.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> CoreResult<Option<CommandRecord>> {
        Ok(self.commands.read().get(id).cloned())
    }

    async fn advance(&self, id: &str, update: &StatusUpdate) -> CoreResult<Option<AdvanceOutcome>> {
        let mut commands = self.commands.write();
        let Some(record) = commands.get_mut(id) else {
            return Ok(None);
        };
        let transition = record.advance(update);
        Ok(Some(AdvanceOutcome {
            transition,
            record: record.clone(),
        }))
    }

    async fn list_by_controller(
        &self,
        controller_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<CommandRecord>> {
        let records = self
            .commands
            .read()
            .values()
            .filter(|r| r.controller_id == controller_id)
            .cloned()
            .collect();
        Ok(newest_first(records, limit))
    }

    async fn list_pending(&self, controller_id: Option<&str>) -> CoreResult<Vec<CommandRecord>> {
        let records = self
            .commands
            .read()
            .values()
            .filter(|r| controller_id.map_or(true, |c| r.controller_id == c))
            .cloned()
            .collect();
        Ok(pending_oldest_first(records))
    }

    async fn status_counts(&self) -> CoreResult<HashMap<CommandStatus, usize>> {
        let mut counts = HashMap::new();
        for r in self.commands.read().values() {
            *counts.entry(r.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let mut commands = self.commands.write();
        let before = commands.len();
        commands.retain(|_, r| !(r.status.is_terminal() && r.created_at < cutoff));
        Ok(before - commands.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use irbridge_core::Transition;

    fn command(id: &str, controller: &str, age_secs: i64) -> CommandRecord {
        CommandRecord {
            id: id.into(),
            user_id: "u1".into(),
            controller_id: controller.into(),
            appliance_id: "A1".into(),
            room_id: None,
            ir_code_id: "IR1".into(),
            action: "PowerOn".into(),
            topic: format!("device/{}/commands", controller),
            payload: serde_json::json!({}),
            status: CommandStatus::Queued,
            created_at: Utc::now() - Duration::seconds(age_secs),
            sent_at: None,
            ack_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_advance_missing_command() {
        let store = MemoryStore::new();
        let out = store
            .advance("nope", &StatusUpdate::published(Utc::now()))
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(store.command_count(), 0);
    }

    #[tokio::test]
    async fn test_advance_is_forward_only() {
        let store = MemoryStore::new();
        store.insert(&command("c1", "C1", 0)).await.unwrap();

        let acked = StatusUpdate::ack(CommandStatus::Acked, Utc::now(), None);
        let out = store.advance("c1", &acked).await.unwrap().unwrap();
        assert_eq!(out.transition, Transition::Applied);

        let late = store
            .advance("c1", &StatusUpdate::published(Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.transition, Transition::Rejected);
        assert_eq!(late.record.status, CommandStatus::Acked);
    }

    #[tokio::test]
    async fn test_command_listing_order() {
        let store = MemoryStore::new();
        store.insert(&command("old", "C1", 30)).await.unwrap();
        store.insert(&command("mid", "C1", 20)).await.unwrap();
        store.insert(&command("new", "C1", 10)).await.unwrap();
        store.insert(&command("other", "C2", 5)).await.unwrap();
        store
            .advance("mid", &StatusUpdate::ack(CommandStatus::Acked, Utc::now(), None))
            .await
            .unwrap();

        let recent = store.list_by_controller("C1", 2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);

        let pending = store.list_pending(Some("C1")).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.get(&CommandStatus::Queued), Some(&3));
        assert_eq!(counts.get(&CommandStatus::Acked), Some(&1));
    }

    #[tokio::test]
    async fn test_purge_only_touches_finished_commands() {
        let store = MemoryStore::new();
        store.insert(&command("stale-acked", "C1", 3600)).await.unwrap();
        store.insert(&command("stale-queued", "C1", 3600)).await.unwrap();
        store
            .advance("stale-acked", &StatusUpdate::ack(CommandStatus::Acked, Utc::now(), None))
            .await
            .unwrap();

        let removed = store
            .purge_terminal_before(Utc::now() - Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("stale-queued").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_telemetry_queries() {
        let store = MemoryStore::new();
        let t0 = Utc::now() - Duration::minutes(10);
        let samples = vec![
            TelemetrySample::new("C1", "temp", 20.0).with_timestamp(t0),
            TelemetrySample::new("C1", "temp", 24.0).with_timestamp(t0 + Duration::minutes(1)),
            TelemetrySample::new("C1", "humidity", 40.0).with_timestamp(t0),
            TelemetrySample::new("C2", "temp", 99.0).with_timestamp(t0),
        ];
        let report = store.insert_many(samples).await.unwrap();
        assert_eq!(report.inserted, 4);

        let latest = store.latest_by_metric("C1").await.unwrap();
        assert_eq!(latest.len(), 2);
        let temp = latest.iter().find(|s| s.metric == "temp").unwrap();
        assert_eq!(temp.value, 24.0);

        let stats = store
            .stats("C1", "temp", t0, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg, 22.0);

        let range = store.range("C1", None, t0, Utc::now()).await.unwrap();
        assert_eq!(range.len(), 3);

        let purged = store.purge_before(t0 + Duration::seconds(30)).await.unwrap();
        assert_eq!(purged, 3);
        assert_eq!(store.telemetry_len(), 1);
    }
}
