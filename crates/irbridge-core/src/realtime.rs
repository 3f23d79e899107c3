//! Realtime fan-out to subscribers grouped by controller.
//!
//! Each group (`controller:<id>`) gets its own broadcast channel, created on
//! first join. Events sent to a group with no subscribers are discarded and
//! late joiners receive nothing that was sent before they joined.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::defaults;
use crate::model::command::{CommandId, CommandStatus};
use crate::model::directory::ControllerId;

/// Group key for everything concerning one controller.
pub fn controller_group(controller_id: &str) -> String {
    format!("controller:{}", controller_id)
}

/// Events pushed to realtime subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "telemetry:new")]
    TelemetryNew {
        controller_id: ControllerId,
        metric: String,
        value: f64,
        unit: Option<String>,
        ts: DateTime<Utc>,
    },

    #[serde(rename = "command:ack")]
    CommandAck {
        command_id: CommandId,
        status: CommandStatus,
        ack_at: DateTime<Utc>,
    },
}

impl RealtimeEvent {
    /// Event name as seen by clients.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TelemetryNew { .. } => "telemetry:new",
            Self::CommandAck { .. } => "command:ack",
        }
    }
}

/// Group broadcast seam.
///
/// Delivery is fire-and-forget: a slow or closed subscriber must not affect
/// the caller or other subscribers.
pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to the current members of `group`; returns how many
    /// subscribers it was handed to.
    fn broadcast(&self, group: &str, event: RealtimeEvent) -> usize;
}

/// In-process [`Broadcaster`] backed by one tokio broadcast channel per group.
pub struct RealtimeHub {
    groups: DashMap<String, broadcast::Sender<RealtimeEvent>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::with_capacity(defaults::REALTIME_GROUP_CAPACITY)
    }

    /// Per-group buffer for slow subscribers. Lagging receivers skip ahead.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            groups: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join a group, creating it if needed.
    pub fn join(&self, group: &str) -> broadcast::Receiver<RealtimeEvent> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Drop groups nobody listens to anymore; returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, tx| tx.receiver_count() > 0);
        before - self.groups.len()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for RealtimeHub {
    fn broadcast(&self, group: &str, event: RealtimeEvent) -> usize {
        match self.groups.get(group) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }
}
