//! Wire formats exchanged with controllers.

use chrono::{DateTime, Utc};
use irbridge_core::{
    ApplianceRecord, CommandId, CommandStatus, ControllerRecord, IrCodeRecord,
};
use serde::{Deserialize, Serialize};

/// Payload published to a controller's command topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandPayload {
    pub command_id: CommandId,
    pub action: String,
    pub controller_id: String,
    pub appliance_id: String,
    pub ir_code_id: String,
    pub protocol: String,
    pub frequency: Option<u32>,
    pub bits: Option<u16>,
    pub raw_data: Option<String>,
    pub data: Option<String>,
    pub brand: Option<String>,
    pub device_type: Option<String>,
    /// Caller-supplied data passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CommandPayload {
    /// Assemble the payload; IR parameters come from the code, with brand and
    /// device type falling back to the appliance.
    pub fn build(
        command_id: &str,
        action: &str,
        controller: &ControllerRecord,
        appliance: &ApplianceRecord,
        code: &IrCodeRecord,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            command_id: command_id.to_string(),
            action: action.to_string(),
            controller_id: controller.id.clone(),
            appliance_id: appliance.id.clone(),
            ir_code_id: code.id.clone(),
            protocol: code.protocol.clone(),
            frequency: code.frequency,
            bits: code.bits,
            raw_data: code.raw_data.clone(),
            data: code.data.clone(),
            brand: code.brand.clone().or_else(|| appliance.brand.clone()),
            device_type: code
                .device_type
                .clone()
                .or_else(|| Some(appliance.device_type.clone())),
            metadata,
        }
    }
}

/// Status a device may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Sent,
    Acked,
    Failed,
}

impl From<AckStatus> for CommandStatus {
    fn from(s: AckStatus) -> Self {
        match s {
            AckStatus::Sent => CommandStatus::Sent,
            AckStatus::Acked => CommandStatus::Acked,
            AckStatus::Failed => CommandStatus::Failed,
        }
    }
}

/// Acknowledgment published by a controller on `device/<id>/ack`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckMessage {
    pub command_id: CommandId,
    pub status: AckStatus,
    #[serde(default)]
    pub ack_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AckMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
