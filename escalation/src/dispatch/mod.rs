//! Dispatch contract between the evaluator and the delivery collaborators.
//!
//! The engine never formats message copy. It hands each collaborator a
//! [`DispatchPayload`] identifying the task and step, and gets back a
//! [`DeliveryResult`]. Delivery failures are values, not errors: the
//! evaluator leaves the step due and retries it on the next tick.

pub mod gateway;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{Channel, Priority};
use crate::state::{TaskId, TaskSnapshot};

pub use gateway::DispatchGateway;
pub use http::{HttpDispatcher, LogDispatcher};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Accepted by the provider, with its reference
    Sent(String),
    Failed(String),
}

impl DeliveryResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

/// What a delivery collaborator receives for one ladder step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub task_id: TaskId,
    pub channel: Channel,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    /// Position of this step in the task's ladder
    pub step_index: usize,
    /// 1 on the first try, incremented after each failed delivery
    pub attempt: u32,
}

impl DispatchPayload {
    pub fn for_step(task: &TaskSnapshot, channel: Channel, step_index: usize, attempt: u32) -> Self {
        Self {
            task_id: task.id.clone(),
            channel,
            priority: task.priority,
            scheduled_at: task.scheduled_at,
            step_index,
            attempt,
        }
    }
}

/// A delivery collaborator (push service, messaging provider, voice
/// provider, or a router over them).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, channel: Channel, task_id: &str, payload: &DispatchPayload) -> DeliveryResult;
}
