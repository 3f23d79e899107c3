//! Directory records owned by the CRUD layer.
//!
//! The pipeline only reads these; creation and validation happen elsewhere.

use serde::{Deserialize, Serialize};

/// Internal controller identifier.
pub type ControllerId = String;

/// Appliance identifier.
pub type ApplianceId = String;

/// IR code identifier.
pub type IrCodeId = String;

/// A gateway controller that relays IR commands and reports telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerRecord {
    /// Internal identifier used for storage and broadcast grouping
    pub id: ControllerId,
    /// Identifier the device uses on the wire
    pub external_id: String,
    /// Owning user
    pub owner_id: String,
    /// Room the controller sits in
    #[serde(default)]
    pub room_id: Option<String>,
    /// Display name
    pub name: String,
    /// Topic prefix, e.g. `home/livingroom/esp1`
    #[serde(default)]
    pub base_topic: Option<String>,
    /// Explicit command topic
    #[serde(default)]
    pub cmd_topic: Option<String>,
}

impl ControllerRecord {
    /// Create a controller record with no topic overrides.
    pub fn new(
        id: impl Into<String>,
        external_id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            external_id: external_id.into(),
            owner_id: owner_id.into(),
            room_id: None,
            name: name.into(),
            base_topic: None,
            cmd_topic: None,
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn with_base_topic(mut self, topic: impl Into<String>) -> Self {
        self.base_topic = Some(topic.into());
        self
    }

    pub fn with_cmd_topic(mut self, topic: impl Into<String>) -> Self {
        self.cmd_topic = Some(topic.into());
        self
    }
}

/// An IR-controlled appliance attached to a controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplianceRecord {
    pub id: ApplianceId,
    /// Controller that drives this appliance
    pub controller_id: ControllerId,
    pub owner_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    /// e.g. `air_conditioner`, `tv`
    pub device_type: String,
}

impl ApplianceRecord {
    pub fn new(
        id: impl Into<String>,
        controller_id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            controller_id: controller_id.into(),
            owner_id: owner_id.into(),
            room_id: None,
            name: name.into(),
            brand: None,
            device_type: device_type.into(),
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }
}

/// A learned or library IR code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IrCodeRecord {
    pub id: IrCodeId,
    /// Action this code performs, e.g. `PowerOn`
    pub action: String,
    /// `raw`, `nec`, `rc5`, ...
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Carrier frequency in Hz
    #[serde(default)]
    pub frequency: Option<u32>,
    #[serde(default)]
    pub bits: Option<u16>,
    /// Raw pulse timings, usually a JSON array string
    #[serde(default)]
    pub raw_data: Option<String>,
    /// Encoded value (hex)
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
}

fn default_protocol() -> String {
    "raw".to_string()
}

impl IrCodeRecord {
    /// Create an IR code with the given protocol and no payload.
    pub fn new(id: impl Into<String>, action: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            protocol: protocol.into(),
            frequency: None,
            bits: None,
            raw_data: None,
            data: None,
            brand: None,
            device_type: None,
        }
    }

    pub fn with_frequency(mut self, hz: u32) -> Self {
        self.frequency = Some(hz);
        self
    }

    pub fn with_bits(mut self, bits: u16) -> Self {
        self.bits = Some(bits);
        self
    }

    pub fn with_raw_data(mut self, raw: impl Into<String>) -> Self {
        self.raw_data = Some(raw.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}
