//! Command records and their forward-only state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::directory::{ApplianceId, ControllerId, IrCodeId};

/// Command identifier.
pub type CommandId = String;

/// Command lifecycle status.
///
/// `queued → sent → {acked | failed}`, with `failed` also reachable
/// straight from `queued` when the publish fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Queued,
    Sent,
    Acked,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Acked => "acked",
            Self::Failed => "failed",
        }
    }

    /// Position in the lifecycle. Terminal states share the highest rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Sent => 1,
            Self::Acked | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked | Self::Failed)
    }

    /// Whether the command still waits on the device.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Sent)
    }

    /// All statuses in lifecycle order.
    pub fn all() -> [CommandStatus; 4] {
        [Self::Queued, Self::Sent, Self::Acked, Self::Failed]
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "acked" => Ok(Self::Acked),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown command status: {}", other)),
        }
    }
}

/// A dispatched command as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    pub id: CommandId,
    /// User who issued the command
    pub user_id: String,
    pub controller_id: ControllerId,
    pub appliance_id: ApplianceId,
    #[serde(default)]
    pub room_id: Option<String>,
    pub ir_code_id: IrCodeId,
    /// Action name, e.g. `PowerOn`
    pub action: String,
    /// Topic the payload was published to
    pub topic: String,
    /// Wire payload as published
    pub payload: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ack_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Who is reporting a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// The dispatcher, after the transport reported the publish outcome
    Publish,
    /// The device, through an acknowledgment message
    Ack,
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: CommandStatus,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
    pub source: UpdateSource,
}

impl StatusUpdate {
    pub fn published(at: DateTime<Utc>) -> Self {
        Self {
            status: CommandStatus::Sent,
            at,
            error: None,
            source: UpdateSource::Publish,
        }
    }

    pub fn publish_failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            at,
            error: Some(error.into()),
            source: UpdateSource::Publish,
        }
    }

    pub fn ack(status: CommandStatus, at: DateTime<Utc>, error: Option<String>) -> Self {
        Self {
            status,
            at,
            error,
            source: UpdateSource::Ack,
        }
    }
}

/// Result of applying a [`StatusUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status moved forward
    Applied,
    /// Record already had this status; nothing changed
    Unchanged,
    /// Update would move backward or contradict a terminal status
    Rejected,
}

/// A transition together with the record as stored afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceOutcome {
    pub transition: Transition,
    pub record: CommandRecord,
}

impl CommandRecord {
    /// Apply `update` if it moves the record forward.
    ///
    /// Same-status updates leave every field untouched so a repeated ack
    /// keeps the first `ack_at`.
    pub fn advance(&mut self, update: &StatusUpdate) -> Transition {
        if update.status == self.status {
            return Transition::Unchanged;
        }
        if update.status.rank() <= self.status.rank() {
            return Transition::Rejected;
        }

        self.status = update.status;
        match update.source {
            UpdateSource::Publish => {
                if update.status == CommandStatus::Sent {
                    self.sent_at = Some(update.at);
                }
            }
            UpdateSource::Ack => {
                self.ack_at = Some(update.at);
                if update.status == CommandStatus::Sent && self.sent_at.is_none() {
                    self.sent_at = Some(update.at);
                }
            }
        }
        if update.status == CommandStatus::Failed {
            self.error = Some(
                update
                    .error
                    .clone()
                    .unwrap_or_else(|| "reported failed".to_string()),
            );
        }
        Transition::Applied
    }
}
