//! Dispatch → publish → acknowledgment, against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use irbridge_commands::{
    AckCorrelator, AckOutcome, CommandDispatcher, CommandPayload, DispatchDirectories,
    DispatchRequest, PublishOutcome, Publisher,
};
use irbridge_core::{
    ApplianceRecord, CommandStatus, CommandStore, ControllerRecord, IrCodeRecord, RealtimeEvent,
    RealtimeHub,
};
use irbridge_storage::{DirectoryAdmin, MemoryStore};
use parking_lot::Mutex;

/// Captures published payloads so the test can play the device.
#[derive(Default)]
struct LoopbackPublisher {
    outbox: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl Publisher for LoopbackPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> PublishOutcome {
        self.outbox.lock().push((topic.to_string(), payload));
        PublishOutcome::Published
    }
}

fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put_controller(&ControllerRecord::new("C1", "esp-01", "u1", "Living room"))
        .unwrap();
    store
        .put_appliance(&ApplianceRecord::new("A1", "C1", "u1", "TV", "tv").with_brand("LG"))
        .unwrap();
    store
        .put_ir_code(
            &IrCodeRecord::new("IR1", "PowerOn", "nec")
                .with_frequency(38_000)
                .with_bits(32)
                .with_data("0x20DF10EF"),
        )
        .unwrap();
    store
}

#[tokio::test]
async fn test_power_on_round_trip() {
    let store = seeded();
    let hub = Arc::new(RealtimeHub::new());
    let publisher = Arc::new(LoopbackPublisher::default());
    let dispatcher = CommandDispatcher::new(
        DispatchDirectories::shared(store.clone()),
        store.clone(),
        publisher.clone(),
    );
    let correlator = AckCorrelator::new(store.clone(), hub.clone());
    let mut events = hub.join("controller:C1");

    let record = dispatcher
        .dispatch(DispatchRequest::new("u1", "C1", "A1", "IR1", "PowerOn"))
        .await
        .unwrap();
    assert_eq!(record.status, CommandStatus::Sent);
    assert!(record.sent_at.is_some());
    assert!(record.ack_at.is_none());

    // The device receives the payload on its command topic.
    let (topic, bytes) = publisher.outbox.lock().pop().unwrap();
    assert_eq!(topic, "device/C1/commands");
    let wire: CommandPayload = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(wire.command_id, record.id);
    assert_eq!(wire.action, "PowerOn");
    assert_eq!(wire.protocol, "nec");
    assert_eq!(wire.brand.as_deref(), Some("LG"));

    // ...and acknowledges it.
    let ack = serde_json::json!({"command_id": wire.command_id, "status": "acked"});
    let outcome = correlator
        .handle_ack(ack.to_string().as_bytes())
        .await
        .unwrap();
    let AckOutcome::Applied(acked) = outcome else {
        panic!("ack was not applied");
    };
    assert_eq!(acked.status, CommandStatus::Acked);
    assert!(acked.ack_at.is_some());

    match events.recv().await.unwrap() {
        RealtimeEvent::CommandAck {
            command_id,
            status,
            ack_at,
        } => {
            assert_eq!(command_id, record.id);
            assert_eq!(status, CommandStatus::Acked);
            assert_eq!(Some(ack_at), acked.ack_at);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // A redelivered ack changes nothing and is not re-broadcast.
    let again = correlator
        .handle_ack(ack.to_string().as_bytes())
        .await
        .unwrap();
    assert!(matches!(again, AckOutcome::Duplicate(_)));
    assert!(events.try_recv().is_err());

    let stored = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CommandStatus::Acked);
    assert_eq!(stored.ack_at, acked.ack_at);
    assert!(store.list_pending(Some("C1")).await.unwrap().is_empty());
}
