//! Engine error taxonomy.
//!
//! Every failure the escalation core can surface is represented here. Callers
//! classify with [`EngineError::is_retriable`] / [`EngineError::kind`] rather
//! than string matching.
//!
//! | Kind                 | Retriable | Typical handling                         |
//! |----------------------|-----------|------------------------------------------|
//! | `invalid_priority`   | no        | reject at load, log at error             |
//! | `invalid_ladder`     | no        | reject config at startup                 |
//! | `invalid_multiplier` | no        | reject snapshot / preview request        |
//! | `invalid_transition` | no        | expected under races, log at debug       |
//! | `persistence`        | yes       | rolled back, retried on next tick        |
//! | `unknown_task`       | no        | client error at the reply boundary       |
//! | `already_tracked`    | no        | conflict when registering a new task     |
//! | `malformed_action`   | no        | client error at the reply boundary       |

use thiserror::Error;

use crate::state::store::StoreError;
use crate::state::types::{TaskId, TaskStatus};

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid priority: {0:?}")]
    InvalidPriority(String),

    #[error("invalid ladder for {priority}: {reason}")]
    InvalidLadder { priority: String, reason: String },

    #[error("invalid escalation speed multiplier: {0}")]
    InvalidMultiplier(f64),

    #[error("invalid transition for task {task_id} from {from}: {reason}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        reason: String,
    },

    #[error("failed to persist task {task_id} (attempt {attempts}): {source}")]
    Persistence {
        task_id: TaskId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task already tracked: {0}")]
    AlreadyTracked(TaskId),

    #[error("malformed reply action: {0}")]
    MalformedAction(String),
}

impl EngineError {
    /// Build an `InvalidTransition` with a formatted reason.
    pub(crate) fn transition(
        task_id: impl Into<TaskId>,
        from: TaskStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            task_id: task_id.into(),
            from,
            reason: reason.into(),
        }
    }

    /// Whether the same operation may succeed if retried later unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Stable snake_case label for logs, metrics and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPriority(_) => "invalid_priority",
            Self::InvalidLadder { .. } => "invalid_ladder",
            Self::InvalidMultiplier(_) => "invalid_multiplier",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Persistence { .. } => "persistence",
            Self::UnknownTask(_) => "unknown_task",
            Self::AlreadyTracked(_) => "already_tracked",
            Self::MalformedAction(_) => "malformed_action",
        }
    }
}
