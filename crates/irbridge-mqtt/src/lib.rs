//! MQTT transport for IrBridge.
//!
//! - [`MqttTransport`] owns the rumqttc client, subscribes to the telemetry
//!   and acknowledgment filters and publishes command payloads.
//! - [`InboundRouter`] spreads inbound messages over worker lanes keyed by
//!   topic, so one controller's messages stay in order while different
//!   controllers are processed concurrently.

pub mod client;
pub mod config;
pub mod router;

pub use client::{MqttTransport, TransportError};
pub use config::{MqttConfig, Qos};
pub use router::{InboundHandler, InboundRouter, PipelineHandler, RouterConfig};
