//! Escalation events published on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interrupt::ReplySource;
use crate::policy::Channel;
use crate::state::{TaskId, TaskStatus};

/// Why a task reached a terminal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionCause {
    /// An inbound user reply
    Reply,
    /// The evaluator's auto-miss rule
    AutoMiss,
}

/// Everything observable that the engine does to a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationEvent {
    /// A ladder step was delivered and recorded
    StepDispatched {
        task_id: TaskId,
        channel: Channel,
        step_index: usize,
        provider_ref: String,
        timestamp: DateTime<Utc>,
    },

    /// A delivery failed; the step stays due
    DispatchFailed {
        task_id: TaskId,
        channel: Channel,
        attempt: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    TaskResolved {
        task_id: TaskId,
        status: TaskStatus,
        cause: ResolutionCause,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<ReplySource>,
        timestamp: DateTime<Utc>,
    },

    /// Original closed as `rescheduled`, successor started
    TaskRescheduled {
        task_id: TaskId,
        successor_id: TaskId,
        new_time: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A transition was rolled back because the flush failed
    PersistenceFailed {
        task_id: TaskId,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl EscalationEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EscalationEvent::StepDispatched { timestamp, .. } => *timestamp,
            EscalationEvent::DispatchFailed { timestamp, .. } => *timestamp,
            EscalationEvent::TaskResolved { timestamp, .. } => *timestamp,
            EscalationEvent::TaskRescheduled { timestamp, .. } => *timestamp,
            EscalationEvent::PersistenceFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Stable label, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            EscalationEvent::StepDispatched { .. } => "step_dispatched",
            EscalationEvent::DispatchFailed { .. } => "dispatch_failed",
            EscalationEvent::TaskResolved { .. } => "task_resolved",
            EscalationEvent::TaskRescheduled { .. } => "task_rescheduled",
            EscalationEvent::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            EscalationEvent::StepDispatched { task_id, .. }
            | EscalationEvent::DispatchFailed { task_id, .. }
            | EscalationEvent::TaskResolved { task_id, .. }
            | EscalationEvent::TaskRescheduled { task_id, .. }
            | EscalationEvent::PersistenceFailed { task_id, .. } => task_id,
        }
    }
}
