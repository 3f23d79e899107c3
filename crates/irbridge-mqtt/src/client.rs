//! rumqttc-backed transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use irbridge_commands::{PublishOutcome, Publisher};
use irbridge_core::topic::{ACK_FILTER, TELEMETRY_FILTER};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::router::InboundRouter;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Subscribe failed for {filter}: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

impl From<TransportError> for irbridge_core::Error {
    fn from(e: TransportError) -> Self {
        irbridge_core::Error::Transport(e.to_string())
    }
}

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Publish error reported while no broker session is up.
pub const NOT_CONNECTED: &str = "MQTT client not connected";

/// Filters the gateway listens on.
pub fn subscription_filters() -> [&'static str; 2] {
    [TELEMETRY_FILTER, ACK_FILTER]
}

/// MQTT client that feeds inbound messages to an [`InboundRouter`] and
/// publishes command payloads.
pub struct MqttTransport {
    client: AsyncClient,
    config: MqttConfig,
    shutdown_tx: watch::Sender<bool>,
    connected: watch::Receiver<bool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the client and start polling. With a router the telemetry and
    /// acknowledgment filters are subscribed; without one the transport only
    /// publishes.
    pub async fn connect(
        config: MqttConfig,
        router: Option<Arc<InboundRouter>>,
    ) -> Result<Self, TransportError> {
        let (client, eventloop) = AsyncClient::new(config.to_options(), 10);
        let qos: QoS = config.subscribe_qos.into();

        for filter in router.iter().flat_map(|_| subscription_filters()) {
            client
                .subscribe(filter, qos)
                .await
                .map_err(|e| TransportError::Subscribe {
                    filter: filter.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (connected_tx, connected) = watch::channel(false);
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            config.clone(),
            router,
            connected_tx,
            shutdown_rx,
        ));

        info!(broker = %config.broker_addr(), "MQTT transport started");
        Ok(Self {
            client,
            config,
            shutdown_tx,
            connected,
            event_task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Whether the broker has acknowledged the current session.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the broker session is up. Returns `false` on timeout or
    /// once the event loop has stopped.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        let up = matches!(
            tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        up
    }

    /// Disconnect from the broker and stop the event loop.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()));

        let task = self.event_task.lock().take();
        if let Some(mut task) = task {
            // Offline clients never flush the disconnect; stop them directly.
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                let _ = self.shutdown_tx.send(true);
                if let Err(e) = task.await {
                    error!(error = %e, "MQTT event loop panicked");
                }
            }
        }
        info!(broker = %self.config.broker_addr(), "MQTT transport stopped");
        result
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> PublishOutcome {
        // rumqttc would queue the packet and report success while offline.
        if !self.is_connected() {
            return PublishOutcome::Failed(NOT_CONNECTED.to_string());
        }
        match self
            .client
            .publish(topic, self.config.publish_qos.into(), false, payload)
            .await
        {
            Ok(()) => PublishOutcome::Published,
            Err(e) => PublishOutcome::Failed(e.to_string()),
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    config: MqttConfig,
    router: Option<Arc<InboundRouter>>,
    connected: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let qos: QoS = config.subscribe_qos.into();
    let mut connected_before = false;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(p))) => match &router {
                    Some(router) => {
                        router.route(&p.topic, p.payload.to_vec()).await;
                    }
                    None => debug!(topic = %p.topic, "Inbound message without router dropped"),
                },
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(broker = %config.broker_addr(), code = ?ack.code, "Connected to MQTT broker");
                    // A clean session forgets subscriptions across reconnects.
                    if connected_before && config.clean_session && router.is_some() {
                        for filter in subscription_filters() {
                            if let Err(e) = client.try_subscribe(filter, qos) {
                                warn!(filter, error = %e, "Failed to resubscribe");
                            }
                        }
                    }
                    connected_before = true;
                    connected.send_replace(true);
                }
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    connected.send_replace(false);
                    warn!(
                        broker = %config.broker_addr(),
                        error = %e,
                        retry_ms = config.reconnect_interval_ms,
                        "MQTT connection error"
                    );
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(config.reconnect_interval()) => {}
                    }
                }
            }
        }
    }
    connected.send_replace(false);
    debug!("MQTT event loop exited");
}
