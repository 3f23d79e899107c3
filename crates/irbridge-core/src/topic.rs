//! Transport topic codec.
//!
//! Inbound topics have the fixed shape `device/<external_id>/<channel>`.
//! Outbound command topics depend on how the controller was configured.

use crate::model::directory::ControllerRecord;

/// Subscription filter for telemetry.
pub const TELEMETRY_FILTER: &str = "device/+/data";

/// Subscription filter for command acknowledgments.
pub const ACK_FILTER: &str = "device/+/ack";

const DEVICE_PREFIX: &str = "device";
const TELEMETRY_CHANNEL: &str = "data";
const ACK_CHANNEL: &str = "ack";
const MAX_IDENTIFIER_LEN: usize = 64;

/// Classified inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    /// `device/<id>/data`
    Telemetry(String),
    /// `device/<id>/ack`
    Ack(String),
    Unknown,
}

fn parse_device_topic<'a>(topic: &'a str, channel: &str) -> Option<&'a str> {
    let mut parts = topic.split('/');
    let prefix = parts.next()?;
    let id = parts.next()?;
    let last = parts.next()?;
    if parts.next().is_some() || prefix != DEVICE_PREFIX || last != channel || id.is_empty() {
        return None;
    }
    Some(id)
}

/// Extract the controller's external id from `device/<id>/data`.
pub fn parse_telemetry_topic(topic: &str) -> Option<String> {
    parse_device_topic(topic, TELEMETRY_CHANNEL).map(str::to_string)
}

/// Extract the controller's external id from `device/<id>/ack`.
pub fn parse_ack_topic(topic: &str) -> Option<String> {
    parse_device_topic(topic, ACK_CHANNEL).map(str::to_string)
}

pub fn classify(topic: &str) -> InboundTopic {
    if let Some(id) = parse_telemetry_topic(topic) {
        InboundTopic::Telemetry(id)
    } else if let Some(id) = parse_ack_topic(topic) {
        InboundTopic::Ack(id)
    } else {
        InboundTopic::Unknown
    }
}

/// Topic a command for `controller` is published to.
///
/// Explicit `cmd_topic` wins, then `<base_topic>/commands`, then
/// `device/<id>/commands`.
pub fn build_command_topic(controller: &ControllerRecord) -> String {
    if let Some(cmd) = controller.cmd_topic.as_deref().filter(|t| !t.is_empty()) {
        return cmd.to_string();
    }
    if let Some(base) = controller.base_topic.as_deref() {
        let base = base.trim_end_matches('/');
        if !base.is_empty() {
            return format!("{}/commands", base);
        }
    }
    format!("{}/{}/commands", DEVICE_PREFIX, controller.id)
}

/// Whether `id` has the shape of a controller identifier:
/// 1 to 64 characters from `[A-Za-z0-9_.:-]`.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b':' | b'-'))
}
