//! Directory seeding from a JSON file.
//!
//! ```json
//! {
//!   "controllers": [{"id": "C1", "external_id": "esp-01", "owner_id": "u1", "name": "Living room"}],
//!   "appliances": [{"id": "A1", "controller_id": "C1", "owner_id": "u1", "name": "AC", "device_type": "air_conditioner"}],
//!   "ir_codes": [{"id": "IR1", "action": "PowerOn", "protocol": "nec", "data": "0x20DF10EF"}]
//! }
//! ```

use std::path::Path;

use irbridge_core::{ApplianceRecord, ControllerRecord, IrCodeRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Write access to the directories, used by seeding and tests.
pub trait DirectoryAdmin: Send + Sync {
    fn put_controller(&self, controller: &ControllerRecord) -> Result<()>;
    fn put_appliance(&self, appliance: &ApplianceRecord) -> Result<()>;
    fn put_ir_code(&self, code: &IrCodeRecord) -> Result<()>;
    /// Returns whether the controller existed.
    fn remove_controller(&self, id: &str) -> Result<bool>;
}

/// Contents of a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub controllers: Vec<ControllerRecord>,
    #[serde(default)]
    pub appliances: Vec<ApplianceRecord>,
    #[serde(default)]
    pub ir_codes: Vec<IrCodeRecord>,
}

/// Counts of records written by [`SeedFile::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub controllers: usize,
    pub appliances: usize,
    pub ir_codes: usize,
}

impl SeedFile {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Write every record into `target`.
    ///
    /// Appliances must name a controller present in the same file.
    pub fn apply(&self, target: &dyn DirectoryAdmin) -> Result<SeedReport> {
        for appliance in &self.appliances {
            if !self.controllers.iter().any(|c| c.id == appliance.controller_id) {
                return Err(Error::UnknownController {
                    appliance_id: appliance.id.clone(),
                    controller_id: appliance.controller_id.clone(),
                });
            }
        }

        for controller in &self.controllers {
            target.put_controller(controller)?;
        }
        for appliance in &self.appliances {
            target.put_appliance(appliance)?;
        }
        for code in &self.ir_codes {
            target.put_ir_code(code)?;
        }

        let report = SeedReport {
            controllers: self.controllers.len(),
            appliances: self.appliances.len(),
            ir_codes: self.ir_codes.len(),
        };
        info!(
            controllers = report.controllers,
            appliances = report.appliances,
            ir_codes = report.ir_codes,
            "Directory seeded"
        );
        Ok(report)
    }
}
