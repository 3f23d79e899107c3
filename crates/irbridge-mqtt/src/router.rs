//! Inbound message routing.
//!
//! Messages are hashed by topic onto a fixed set of lanes. Each lane is a
//! bounded queue drained by one worker, so messages on the same topic are
//! handled in arrival order and a slow controller only holds up its lane.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use irbridge_commands::{AckCorrelator, AckOutcome};
use irbridge_core::config::{defaults, env_vars};
use irbridge_core::topic::{classify, InboundTopic};
use irbridge_telemetry::{IngestError, IngestionService};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Lane layout.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub lanes: usize,
    pub lane_capacity: usize,
}

impl RouterConfig {
    pub fn from_env() -> Self {
        Self {
            lanes: env_vars::inbound_lanes(),
            lane_capacity: defaults::INBOUND_LANE_CAPACITY,
        }
    }

    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lanes: defaults::INBOUND_LANES,
            lane_capacity: defaults::INBOUND_LANE_CAPACITY,
        }
    }
}

/// Something that consumes inbound messages.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Sends telemetry to ingestion and acknowledgments to the correlator.
pub struct PipelineHandler {
    ingestion: Arc<IngestionService>,
    acks: Arc<AckCorrelator>,
}

impl PipelineHandler {
    pub fn new(ingestion: Arc<IngestionService>, acks: Arc<AckCorrelator>) -> Self {
        Self { ingestion, acks }
    }
}

#[async_trait]
impl InboundHandler for PipelineHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        match classify(topic) {
            InboundTopic::Telemetry(_) => match self.ingestion.handle_message(topic, payload).await {
                Ok(_) => {}
                // Already logged by the service.
                Err(IngestError::UnknownController(_)) | Err(IngestError::Payload(_)) => {}
                Err(e) => warn!(topic = %topic, error = %e, "Telemetry dropped"),
            },
            InboundTopic::Ack(_) => match self.acks.handle_ack(payload).await {
                Ok(AckOutcome::Applied(_)) | Ok(AckOutcome::Duplicate(_)) => {}
                Ok(other) => debug!(topic = %topic, outcome = ?other, "Acknowledgment not applied"),
                Err(e) => error!(topic = %topic, error = %e, "Failed to apply acknowledgment"),
            },
            InboundTopic::Unknown => debug!(topic = %topic, "Ignoring message on unrouted topic"),
        }
    }
}

struct Message {
    topic: String,
    payload: Vec<u8>,
}

/// Per-topic ordered, cross-topic concurrent dispatch of inbound messages.
pub struct InboundRouter {
    lanes: Mutex<Vec<mpsc::Sender<Message>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    lane_count: usize,
}

impl InboundRouter {
    /// Spawn one worker per lane.
    pub fn start(handler: Arc<dyn InboundHandler>, config: RouterConfig) -> Self {
        let lane_count = config.lanes.max(1);
        let mut lanes = Vec::with_capacity(lane_count);
        let mut workers = Vec::with_capacity(lane_count);

        for lane in 0..lane_count {
            let (tx, mut rx) = mpsc::channel::<Message>(config.lane_capacity.max(1));
            let handler = handler.clone();
            workers.push(tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    handler.handle(&msg.topic, &msg.payload).await;
                }
                debug!(lane, "Inbound lane closed");
            }));
            lanes.push(tx);
        }

        Self {
            lanes: Mutex::new(lanes),
            workers: Mutex::new(workers),
            lane_count,
        }
    }

    fn lane_for(&self, topic: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        (hasher.finish() % self.lane_count as u64) as usize
    }

    /// Queue a message. Waits while the lane is full; returns `false` once
    /// the router has been shut down.
    pub async fn route(&self, topic: &str, payload: Vec<u8>) -> bool {
        let lane = self.lane_for(topic);
        let Some(tx) = self.lanes.lock().get(lane).cloned() else {
            return false;
        };
        let msg = Message {
            topic: topic.to_string(),
            payload,
        };
        if tx.send(msg).await.is_err() {
            warn!(topic = %topic, "Inbound router closed, message dropped");
            return false;
        }
        true
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Stop accepting messages and wait for queued ones to be handled.
    pub async fn shutdown(&self) {
        self.lanes.lock().clear();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Inbound worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use irbridge_core::{CommandRecord, CommandStatus, CommandStore, ControllerRecord, RealtimeHub};
    use irbridge_storage::{DirectoryAdmin, MemoryStore};
    use irbridge_telemetry::TelemetryConfig;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn handle(&self, topic: &str, payload: &[u8]) {
            // Uneven delays shuffle cross-lane timing.
            if payload.first() == Some(&b'0') {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            self.seen.lock().push((topic.to_string(), payload.to_vec()));
        }
    }

    #[tokio::test]
    async fn test_per_topic_order_is_preserved() {
        let recorder = Arc::new(Recorder::default());
        let router = InboundRouter::start(recorder.clone(), RouterConfig::default().with_lanes(3));

        for i in 0..20 {
            for c in ["a", "b", "c", "d"] {
                let topic = format!("device/{}/data", c);
                assert!(router.route(&topic, format!("{}", i % 10).into_bytes()).await);
            }
        }
        router.shutdown().await;

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 80);
        for c in ["a", "b", "c", "d"] {
            let topic = format!("device/{}/data", c);
            let order: Vec<_> = seen
                .iter()
                .filter(|(t, _)| *t == topic)
                .map(|(_, p)| p.clone())
                .collect();
            let expected: Vec<_> = (0..20).map(|i| format!("{}", i % 10).into_bytes()).collect();
            assert_eq!(order, expected);
        }
    }

    #[tokio::test]
    async fn test_route_after_shutdown_is_rejected() {
        let router = InboundRouter::start(Arc::new(Recorder::default()), RouterConfig::default());
        router.shutdown().await;
        assert!(!router.route("device/x/data", b"{}".to_vec()).await);
    }

    #[tokio::test]
    async fn test_pipeline_handler_routes_by_topic() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_controller(&ControllerRecord::new("C1", "esp-01", "u1", "Hall"))
            .unwrap();
        store
            .insert(&CommandRecord {
                id: "cmd-1".into(),
                user_id: "u1".into(),
                controller_id: "C1".into(),
                appliance_id: "A1".into(),
                room_id: None,
                ir_code_id: "IR1".into(),
                action: "PowerOn".into(),
                topic: "device/C1/commands".into(),
                payload: serde_json::json!({}),
                status: CommandStatus::Sent,
                created_at: chrono::Utc::now(),
                sent_at: Some(chrono::Utc::now()),
                ack_at: None,
                error: None,
            })
            .await
            .unwrap();

        let hub = Arc::new(RealtimeHub::new());
        let ingestion = Arc::new(IngestionService::new(
            store.clone(),
            store.clone(),
            hub.clone(),
            TelemetryConfig::default(),
        ));
        let acks = Arc::new(AckCorrelator::new(store.clone(), hub.clone()));
        let handler = PipelineHandler::new(ingestion.clone(), acks);

        handler
            .handle("device/esp-01/data", br#"{"metric":"temp","value":21.5}"#)
            .await;
        handler
            .handle("device/esp-01/ack", br#"{"command_id":"cmd-1","status":"acked"}"#)
            .await;
        handler.handle("device/esp-01/other", b"ignored").await;

        ingestion.flush().await.unwrap();
        assert_eq!(store.telemetry_len(), 1);
        assert_eq!(
            store.get("cmd-1").await.unwrap().unwrap().status,
            CommandStatus::Acked
        );
        ingestion.shutdown().await;
    }
}
