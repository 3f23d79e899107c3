//! Acknowledgment correlation.
//!
//! Devices report progress on `device/<id>/ack`. Each report is matched to
//! a stored command by id and applied only if it moves the command forward.

use std::sync::Arc;

use chrono::Utc;
use irbridge_core::realtime::controller_group;
use irbridge_core::{
    Broadcaster, CommandRecord, CommandStore, Error as CoreError, RealtimeEvent, StatusUpdate,
    Transition,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::payload::AckMessage;

/// Ack handling errors. Bad input is not an error; see [`AckOutcome`].
#[derive(Debug, Error)]
pub enum AckError {
    #[error("Storage error: {0}")]
    Storage(#[from] CoreError),
}

/// What happened to an acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Status changed and subscribers were notified
    Applied(CommandRecord),
    /// Command already had this status
    Duplicate(CommandRecord),
    /// Report would move the command backward or contradict its final status
    Ignored(CommandRecord),
    /// No command with this id
    UnknownCommand(String),
    /// Payload could not be decoded
    Malformed(String),
}

impl AckOutcome {
    pub fn record(&self) -> Option<&CommandRecord> {
        match self {
            Self::Applied(r) | Self::Duplicate(r) | Self::Ignored(r) => Some(r),
            Self::UnknownCommand(_) | Self::Malformed(_) => None,
        }
    }
}

/// Applies acknowledgments to stored commands.
pub struct AckCorrelator {
    store: Arc<dyn CommandStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl AckCorrelator {
    pub fn new(store: Arc<dyn CommandStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Handle one raw acknowledgment payload.
    pub async fn handle_ack(&self, payload: &[u8]) -> Result<AckOutcome, AckError> {
        let msg = match AckMessage::parse(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Malformed acknowledgment dropped");
                return Ok(AckOutcome::Malformed(e.to_string()));
            }
        };

        let update = StatusUpdate::ack(
            msg.status.into(),
            msg.ack_at.unwrap_or_else(Utc::now),
            msg.error,
        );
        let Some(outcome) = self.store.advance(&msg.command_id, &update).await? else {
            warn!(command_id = %msg.command_id, "Acknowledgment for unknown command dropped");
            return Ok(AckOutcome::UnknownCommand(msg.command_id));
        };

        let record = outcome.record;
        match outcome.transition {
            Transition::Applied => {
                let ack_at = record.ack_at.unwrap_or(update.at);
                let delivered = self.broadcaster.broadcast(
                    &controller_group(&record.controller_id),
                    RealtimeEvent::CommandAck {
                        command_id: record.id.clone(),
                        status: record.status,
                        ack_at,
                    },
                );
                info!(
                    command_id = %record.id,
                    status = %record.status,
                    subscribers = delivered,
                    "Command acknowledged"
                );
                Ok(AckOutcome::Applied(record))
            }
            Transition::Unchanged => {
                debug!(command_id = %record.id, status = %record.status, "Duplicate acknowledgment");
                Ok(AckOutcome::Duplicate(record))
            }
            Transition::Rejected => {
                warn!(
                    command_id = %record.id,
                    current = %record.status,
                    reported = %update.status,
                    "Acknowledgment would move command backward, ignored"
                );
                Ok(AckOutcome::Ignored(record))
            }
        }
    }
}
