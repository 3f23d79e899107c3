//! Command dispatcher.
//!
//! `queued --(publish ok)--> sent`, `queued --(publish error)--> failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use irbridge_core::config::{defaults, env_vars};
use irbridge_core::topic::build_command_topic;
use irbridge_core::{
    ApplianceDirectory, CommandRecord, CommandStatus, CommandStore, ControllerDirectory,
    Error as CoreError, IrCodeDirectory, StatusUpdate,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::payload::CommandPayload;
use crate::publisher::{PublishOutcome, Publisher};

/// Longest accepted action name.
pub const MAX_ACTION_LEN: usize = 100;

/// Attempts to persist a publish outcome before giving up.
const SETTLE_ATTEMPTS: u32 = 4;
const SETTLE_BACKOFF: Duration = Duration::from_millis(50);

/// Dispatch error types. None of these leave a record behind except
/// [`DispatchError::Storage`] raised after the insert, in which case the
/// stored record may still be `queued`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),

    #[error("Appliance not found: {0}")]
    ApplianceNotFound(String),

    #[error("IR code not found: {0}")]
    IrCodeNotFound(String),

    #[error("Appliance {appliance_id} does not belong to controller {controller_id}")]
    ApplianceMismatch {
        appliance_id: String,
        controller_id: String,
    },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] CoreError),
}

/// A request to send one IR command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub user_id: String,
    pub controller_id: String,
    pub appliance_id: String,
    pub ir_code_id: String,
    pub action: String,
    /// Defaults to the appliance's room
    #[serde(default)]
    pub room_id: Option<String>,
    /// Passed through to the device untouched
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl DispatchRequest {
    pub fn new(
        user_id: impl Into<String>,
        controller_id: impl Into<String>,
        appliance_id: impl Into<String>,
        ir_code_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            controller_id: controller_id.into(),
            appliance_id: appliance_id.into(),
            ir_code_id: ir_code_id.into(),
            action: action.into(),
            room_id: None,
            metadata: None,
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Milliseconds a publish may take before it counts as failed
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
}

fn default_publish_timeout() -> u64 {
    defaults::PUBLISH_TIMEOUT_MS
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: default_publish_timeout(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        Self {
            publish_timeout_ms: env_vars::publish_timeout_ms(),
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Read-only directories the dispatcher validates against.
#[derive(Clone)]
pub struct DispatchDirectories {
    pub controllers: Arc<dyn ControllerDirectory>,
    pub appliances: Arc<dyn ApplianceDirectory>,
    pub ir_codes: Arc<dyn IrCodeDirectory>,
}

impl DispatchDirectories {
    /// Use one backend for all three directories.
    pub fn shared<T>(backend: Arc<T>) -> Self
    where
        T: ControllerDirectory + ApplianceDirectory + IrCodeDirectory + 'static,
    {
        Self {
            controllers: backend.clone(),
            appliances: backend.clone(),
            ir_codes: backend,
        }
    }
}

/// Validates, persists, publishes and settles commands.
pub struct CommandDispatcher {
    directories: DispatchDirectories,
    store: Arc<dyn CommandStore>,
    publisher: Arc<dyn Publisher>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        directories: DispatchDirectories,
        store: Arc<dyn CommandStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            directories,
            store,
            publisher,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch a command and return it once the publish has settled.
    ///
    /// Every call creates a new record. Validation failures happen before
    /// anything is stored; a publish failure or timeout yields a `failed`
    /// record rather than an error.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<CommandRecord, DispatchError> {
        let action = request.action.trim();
        if action.is_empty() || action.chars().count() > MAX_ACTION_LEN {
            return Err(DispatchError::InvalidAction(request.action.clone()));
        }

        let controller = self
            .directories
            .controllers
            .get_controller(&request.controller_id)
            .await?
            .ok_or_else(|| DispatchError::ControllerNotFound(request.controller_id.clone()))?;
        let appliance = self
            .directories
            .appliances
            .get_appliance(&request.appliance_id)
            .await?
            .ok_or_else(|| DispatchError::ApplianceNotFound(request.appliance_id.clone()))?;
        if appliance.controller_id != controller.id {
            return Err(DispatchError::ApplianceMismatch {
                appliance_id: appliance.id,
                controller_id: controller.id,
            });
        }
        let code = self
            .directories
            .ir_codes
            .get_ir_code(&request.ir_code_id)
            .await?
            .ok_or_else(|| DispatchError::IrCodeNotFound(request.ir_code_id.clone()))?;

        let command_id = Uuid::new_v4().to_string();
        let topic = build_command_topic(&controller);
        let payload = CommandPayload::build(
            &command_id,
            action,
            &controller,
            &appliance,
            &code,
            request.metadata,
        );
        let payload = serde_json::to_value(&payload)?;
        let bytes = serde_json::to_vec(&payload)?;

        let record = CommandRecord {
            id: command_id.clone(),
            user_id: request.user_id,
            controller_id: controller.id.clone(),
            appliance_id: appliance.id.clone(),
            room_id: request.room_id.or_else(|| appliance.room_id.clone()),
            ir_code_id: code.id.clone(),
            action: action.to_string(),
            topic: topic.clone(),
            payload,
            status: CommandStatus::Queued,
            created_at: Utc::now(),
            sent_at: None,
            ack_at: None,
            error: None,
        };
        self.store.insert(&record).await?;

        let update = self.publish(&command_id, &topic, bytes).await;
        let record = self.settle(&command_id, &update).await?;

        info!(
            command_id = %record.id,
            controller_id = %record.controller_id,
            action = %record.action,
            status = %record.status,
            "Command dispatched"
        );
        Ok(record)
    }

    /// Persist the publish outcome, retrying transient store failures. The
    /// returned record is always the stored one.
    async fn settle(
        &self,
        command_id: &str,
        update: &StatusUpdate,
    ) -> Result<CommandRecord, DispatchError> {
        let mut backoff = SETTLE_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.store.advance(command_id, update).await {
                Ok(Some(outcome)) => return Ok(outcome.record),
                Ok(None) => {
                    error!(command_id, "Command vanished before it could be settled");
                    return Err(CoreError::NotFound(command_id.to_string()).into());
                }
                Err(e) if attempt < SETTLE_ATTEMPTS => {
                    warn!(command_id, attempt, error = %e, "Failed to persist publish outcome, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!(command_id, attempts = attempt, error = %e, "Giving up on publish outcome");
                    return Err(e.into());
                }
            }
        }
    }

    async fn publish(&self, command_id: &str, topic: &str, bytes: Vec<u8>) -> StatusUpdate {
        let timeout = self.config.publish_timeout();
        match tokio::time::timeout(timeout, self.publisher.publish(topic, bytes)).await {
            Ok(PublishOutcome::Published) => StatusUpdate::published(Utc::now()),
            Ok(PublishOutcome::Failed(reason)) => {
                warn!(command_id, topic, error = %reason, "Command publish failed");
                StatusUpdate::publish_failed(Utc::now(), reason)
            }
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                warn!(command_id, topic, timeout_ms, "Command publish timed out");
                StatusUpdate::publish_failed(
                    Utc::now(),
                    format!("publish timed out after {timeout_ms}ms"),
                )
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn CommandStore> {
        &self.store
    }
}
