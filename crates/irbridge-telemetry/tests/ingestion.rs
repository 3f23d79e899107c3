//! End-to-end tests for the ingestion service.

use std::sync::Arc;
use std::time::Duration;

use irbridge_core::{ControllerRecord, RealtimeEvent, RealtimeHub};
use irbridge_storage::{DirectoryAdmin, MemoryStore};
use irbridge_telemetry::{IngestError, IngestionService, TelemetryConfig};

fn setup() -> (Arc<MemoryStore>, Arc<RealtimeHub>, IngestionService) {
    let store = Arc::new(MemoryStore::new());
    store
        .put_controller(&ControllerRecord::new("C1", "esp-01", "u1", "Living room"))
        .unwrap();
    let hub = Arc::new(RealtimeHub::new());
    let config = TelemetryConfig::default()
        .with_batch_size(200)
        .with_flush_interval(Duration::from_millis(1000));
    let service = IngestionService::new(store.clone(), store.clone(), hub.clone(), config);
    (store, hub, service)
}

#[tokio::test]
async fn test_sample_is_broadcast_and_persisted_once() {
    let (store, hub, service) = setup();
    let mut rx = hub.join("controller:C1");

    let sample = service
        .handle_message(
            "device/esp-01/data",
            br#"{"metric":"temperature","value":23.5,"unit":"C"}"#,
        )
        .await
        .unwrap();
    assert_eq!(sample.controller_id, "C1");

    match rx.recv().await.unwrap() {
        RealtimeEvent::TelemetryNew {
            controller_id,
            metric,
            value,
            unit,
            ..
        } => {
            assert_eq!(controller_id, "C1");
            assert_eq!(metric, "temperature");
            assert_eq!(value, 23.5);
            assert_eq!(unit.as_deref(), Some("C"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Not yet flushed; the barrier forces the pending batch out.
    assert_eq!(store.telemetry_len(), 0);
    service.flush().await.unwrap();
    assert_eq!(store.telemetry_len(), 1);
    service.flush().await.unwrap();
    assert_eq!(store.telemetry_len(), 1);
}

#[tokio::test]
async fn test_malformed_topics_buffer_nothing() {
    let (store, _hub, service) = setup();
    for topic in ["device/data", "foo/esp-01/data", "device/esp-01/data/x", "device/esp-01/ack"] {
        let err = service
            .handle_message(topic, br#"{"metric":"t","value":1}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Topic(_)), "{}", topic);
    }
    service.flush().await.unwrap();
    assert_eq!(store.telemetry_len(), 0);
    assert_eq!(service.buffer().pending(), 0);
}

#[tokio::test]
async fn test_unknown_controller_is_dropped() {
    let (store, hub, service) = setup();
    let mut rx = hub.join("controller:C1");

    let err = service
        .handle_message("device/ghost/data", br#"{"metric":"t","value":1}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnknownController(id) if id == "ghost"));

    service.flush().await.unwrap();
    assert_eq!(store.telemetry_len(), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_invalid_payload_is_not_broadcast() {
    let (_store, hub, service) = setup();
    let mut rx = hub.join("controller:C1");

    let err = service
        .handle_message("device/esp-01/data", br#"{"metric":"t","value":1,"ts":"soon"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Payload(_)));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dropped_messages_are_counted() {
    let (_store, _hub, service) = setup();
    let bad_payloads: [&[u8]; 3] = [
        b"not json",
        br#"{"metric":"","value":1}"#,
        br#"{"metric":"t","value":"warm"}"#,
    ];
    for payload in bad_payloads {
        assert!(service.handle_message("device/esp-01/data", payload).await.is_err());
    }
    service
        .handle_message("device/ghost/data", br#"{"metric":"t","value":1}"#)
        .await
        .unwrap_err();
    service
        .handle_message("device/esp-01/data", br#"{"metric":"t","value":1}"#)
        .await
        .unwrap();

    let stats = service.stats();
    assert_eq!(stats.rejected, 3);
    assert_eq!(stats.unknown_controllers, 1);
    assert_eq!(stats.buffer.accepted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_interval_flush_without_barrier() {
    let (store, _hub, service) = setup();
    for i in 0..3 {
        let payload = format!(r#"{{"metric":"t","value":{}}}"#, i);
        service
            .handle_message("device/esp-01/data", payload.as_bytes())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.telemetry_len(), 3);

    service.shutdown().await;
    assert_eq!(service.stats().buffer.persisted, 3);
}
