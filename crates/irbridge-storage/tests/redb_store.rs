//! Integration tests for the redb backend.

use chrono::{Duration, Utc};
use irbridge_core::{
    ApplianceDirectory, ApplianceRecord, CommandRecord, CommandStatus, CommandStore,
    ControllerDirectory, ControllerRecord, IrCodeDirectory, IrCodeRecord, StatusUpdate,
    TelemetrySample, TelemetryStore, Transition,
};
use irbridge_storage::{DirectoryAdmin, RedbStore};
use tempfile::TempDir;

fn open_store() -> (TempDir, RedbStore) {
    let dir = TempDir::new().unwrap();
    let store = RedbStore::open(dir.path().join("irbridge.redb")).unwrap();
    (dir, store)
}

fn queued(id: &str) -> CommandRecord {
    CommandRecord {
        id: id.into(),
        user_id: "u1".into(),
        controller_id: "C1".into(),
        appliance_id: "A1".into(),
        room_id: Some("R1".into()),
        ir_code_id: "IR1".into(),
        action: "PowerOn".into(),
        topic: "device/C1/commands".into(),
        payload: serde_json::json!({"command_id": id}),
        status: CommandStatus::Queued,
        created_at: Utc::now(),
        sent_at: None,
        ack_at: None,
        error: None,
    }
}

#[tokio::test]
async fn test_directory_lookup_by_external_id() {
    let (_dir, store) = open_store();
    store
        .put_controller(&ControllerRecord::new("C1", "esp-01", "u1", "Living room"))
        .unwrap();
    store
        .put_appliance(&ApplianceRecord::new("A1", "C1", "u1", "AC", "air_conditioner"))
        .unwrap();
    store
        .put_ir_code(&IrCodeRecord::new("IR1", "PowerOn", "nec").with_data("0x20DF10EF"))
        .unwrap();

    let c = store.find_by_external_id("esp-01").await.unwrap().unwrap();
    assert_eq!(c.id, "C1");
    assert!(store.get_appliance("A1").await.unwrap().is_some());
    assert_eq!(
        store.get_ir_code("IR1").await.unwrap().unwrap().data.as_deref(),
        Some("0x20DF10EF")
    );

    // Re-registering under a new external id drops the old mapping.
    store
        .put_controller(&ControllerRecord::new("C1", "esp-02", "u1", "Living room"))
        .unwrap();
    assert!(store.find_by_external_id("esp-01").await.unwrap().is_none());
    assert!(store.find_by_external_id("esp-02").await.unwrap().is_some());

    assert!(store.remove_controller("C1").unwrap());
    assert!(store.find_by_external_id("esp-02").await.unwrap().is_none());
    assert!(store.get_controller("C1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_command_lifecycle_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("irbridge.redb");
    {
        let store = RedbStore::open(&path).unwrap();
        store.insert(&queued("cmd-1")).await.unwrap();
        let out = store
            .advance("cmd-1", &StatusUpdate::published(Utc::now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.transition, Transition::Applied);
    }

    let store = RedbStore::open(&path).unwrap();
    let record = store.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(record.status, CommandStatus::Sent);
    assert!(record.sent_at.is_some());

    let ack_at = Utc::now();
    let first = store
        .advance("cmd-1", &StatusUpdate::ack(CommandStatus::Acked, ack_at, None))
        .await
        .unwrap()
        .unwrap();
    let second = store
        .advance(
            "cmd-1",
            &StatusUpdate::ack(CommandStatus::Acked, ack_at + Duration::seconds(3), None),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.transition, Transition::Applied);
    assert_eq!(second.transition, Transition::Unchanged);
    assert_eq!(second.record.ack_at, Some(ack_at));
}

#[tokio::test]
async fn test_advance_unknown_command_creates_nothing() {
    let (_dir, store) = open_store();
    let out = store
        .advance("ghost", &StatusUpdate::ack(CommandStatus::Acked, Utc::now(), None))
        .await
        .unwrap();
    assert!(out.is_none());
    assert!(store.get("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_telemetry_keeps_duplicates_and_orders_range() {
    let (_dir, store) = open_store();
    let t0 = Utc::now() - Duration::minutes(5);
    let samples = vec![
        TelemetrySample::new("C1", "temp", 22.0).with_timestamp(t0 + Duration::seconds(2)),
        TelemetrySample::new("C1", "temp", 21.0).with_timestamp(t0),
        TelemetrySample::new("C1", "temp", 21.0).with_timestamp(t0),
        TelemetrySample::new("C1", "humidity", 45.0).with_timestamp(t0),
        TelemetrySample::new("C10", "temp", 30.0).with_timestamp(t0),
    ];
    let report = store.insert_many(samples).await.unwrap();
    assert_eq!(report.inserted, 5);
    assert!(report.is_complete());

    let temps = store
        .range("C1", Some("temp"), t0, Utc::now())
        .await
        .unwrap();
    let values: Vec<f64> = temps.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![21.0, 21.0, 22.0]);

    let all = store.range("C1", None, t0, Utc::now()).await.unwrap();
    assert_eq!(all.len(), 4);

    let latest = store.latest_by_metric("C1").await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest.iter().find(|s| s.metric == "temp").unwrap().value, 22.0);

    let stats = store
        .stats("C1", "temp", t0, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.max, 22.0);

    let purged = store.purge_before(t0 + Duration::seconds(1)).await.unwrap();
    assert_eq!(purged, 4);
    assert_eq!(store.range("C1", None, t0, Utc::now()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_purge_terminal_commands() {
    let (_dir, store) = open_store();
    let mut old = queued("old");
    old.created_at = Utc::now() - Duration::days(31);
    store.insert(&old).await.unwrap();
    store
        .advance("old", &StatusUpdate::publish_failed(Utc::now(), "timeout"))
        .await
        .unwrap();
    let mut old_pending = queued("old-pending");
    old_pending.created_at = Utc::now() - Duration::days(31);
    store.insert(&old_pending).await.unwrap();

    let removed = store
        .purge_terminal_before(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.list_pending(None).await.unwrap().len(), 1);
}
