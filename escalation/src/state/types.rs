//! Task snapshot: the engine's view of one time-bound task.
//!
//! This is also the persisted record shape; the persistence collaborator
//! stores these fields one-to-one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{Channel, Ladder, LadderStep, Priority};

/// Opaque task identifier, stable for the task's lifetime.
pub type TaskId = String;

/// Escalation status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Due (or about to be), nothing fired yet
    Pending,
    PushSent,
    MessagingSent,
    CallSent,
    /// User confirmed the task
    Acknowledged,
    /// Ladder exhausted with no acknowledgment
    AutoMissed,
    /// Replaced by a successor snapshot at a new time
    Rescheduled,
    /// User skipped the task
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Acknowledged | Self::AutoMissed | Self::Rescheduled | Self::Cancelled
        )
    }

    /// Status reached once `channel` has fired.
    pub fn after_sending(channel: Channel) -> Self {
        match channel {
            Channel::Push => Self::PushSent,
            Channel::Messaging => Self::MessagingSent,
            Channel::Call => Self::CallSent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PushSent => "push_sent",
            Self::MessagingSent => "messaging_sent",
            Self::CallSent => "call_sent",
            Self::Acknowledged => "acknowledged",
            Self::AutoMissed => "auto_missed",
            Self::Rescheduled => "rescheduled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_multiplier() -> f64 {
    1.0
}

/// A trackable task and its escalation progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,

    /// Ladder origin ("T")
    pub scheduled_at: DateTime<Utc>,

    pub priority: Priority,

    pub status: TaskStatus,

    #[serde(default)]
    pub push_sent_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub messaging_sent_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub call_sent_at: Option<DateTime<Utc>>,

    /// Divides every ladder offset; >1 escalates faster
    #[serde(default = "default_multiplier")]
    pub escalation_speed_multiplier: f64,

    /// When a terminal status was reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Predecessor this snapshot was rescheduled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescheduled_from: Option<TaskId>,
}

impl TaskSnapshot {
    /// Create a pending snapshot with the default multiplier.
    pub fn new(id: impl Into<TaskId>, scheduled_at: DateTime<Utc>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            scheduled_at,
            priority,
            status: TaskStatus::Pending,
            push_sent_at: None,
            messaging_sent_at: None,
            call_sent_at: None,
            escalation_speed_multiplier: default_multiplier(),
            resolved_at: None,
            rescheduled_from: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.escalation_speed_multiplier = multiplier;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn sent_at(&self, channel: Channel) -> Option<DateTime<Utc>> {
        match channel {
            Channel::Push => self.push_sent_at,
            Channel::Messaging => self.messaging_sent_at,
            Channel::Call => self.call_sent_at,
        }
    }

    pub(crate) fn set_sent_at(&mut self, channel: Channel, at: DateTime<Utc>) {
        let slot = match channel {
            Channel::Push => &mut self.push_sent_at,
            Channel::Messaging => &mut self.messaging_sent_at,
            Channel::Call => &mut self.call_sent_at,
        };
        *slot = Some(at);
    }

    /// Most recent send across all channels.
    pub fn last_sent_at(&self) -> Option<DateTime<Utc>> {
        Channel::all().iter().filter_map(|c| self.sent_at(*c)).max()
    }

    /// First ladder step whose channel has not fired, with its index.
    pub fn next_unfired<'a>(&self, ladder: &'a Ladder) -> Option<(usize, &'a LadderStep)> {
        ladder
            .steps()
            .iter()
            .enumerate()
            .find(|(_, step)| self.sent_at(step.channel).is_none())
    }

    /// Pending copy of this task at `scheduled_at`, under a fresh id.
    pub fn successor(&self, scheduled_at: DateTime<Utc>) -> Self {
        let mut next = Self::new(uuid::Uuid::new_v4().to_string(), scheduled_at, self.priority)
            .with_multiplier(self.escalation_speed_multiplier);
        next.rescheduled_from = Some(self.id.clone());
        next
    }
}
