//! Applies reply events to the tracker, outside the tick cadence.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::reply::{ReplyAction, ReplyEvent, ReplySource};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::events::{EscalationEvent, EventBus, ResolutionCause, SharedEventBus};
use crate::metrics::{EngineMetrics, SharedEngineMetrics};
use crate::state::{SharedStateTracker, TaskSnapshot, TaskStatus};

/// Result of handling one reply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum InterruptOutcome {
    /// The task moved to `status`; reschedules also carry the new snapshot.
    Applied {
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        successor: Option<TaskSnapshot>,
    },
    /// The task was already terminal; nothing changed.
    AlreadyResolved { status: TaskStatus },
}

impl InterruptOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Applied { status, .. } | Self::AlreadyResolved { status } => *status,
        }
    }
}

/// Turns user replies into terminal transitions.
///
/// The handler waits for the task's lock, so a reply that lands while a tick
/// is dispatching for the same task is applied right after that dispatch
/// commits, and before any later step can become due.
pub struct InterruptHandler {
    tracker: SharedStateTracker,
    clock: Arc<dyn Clock>,
    snooze: Duration,
    events: SharedEventBus,
    metrics: SharedEngineMetrics,
}

impl InterruptHandler {
    pub fn new(tracker: SharedStateTracker, clock: Arc<dyn Clock>, snooze: Duration) -> Self {
        Self {
            tracker,
            clock,
            snooze,
            events: EventBus::new().shared(),
            metrics: EngineMetrics::new().shared(),
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedEngineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Parse and apply a reply at the clock's current time.
    ///
    /// Errors: `MalformedAction` for an unreadable action or a reschedule
    /// time not in the future on a live task, `UnknownTask` for an id the
    /// tracker does not hold, `Persistence` when the transition or the
    /// successor could not be flushed. A failed reschedule leaves the task
    /// as it was, so the same reply can be retried.
    pub async fn handle(&self, event: &ReplyEvent) -> EngineResult<InterruptOutcome> {
        let now = self.clock.now();
        let action = event.parse_action()?;
        self.apply(&event.task_id, action, event.source, now).await
    }

    /// Apply an already-parsed action as of `now`.
    pub async fn apply(
        &self,
        task_id: &str,
        action: ReplyAction,
        source: ReplySource,
        now: DateTime<Utc>,
    ) -> EngineResult<InterruptOutcome> {
        let mut guard = self.tracker.lock(task_id).await?;

        let current = guard.snapshot().status;
        if current.is_terminal() {
            self.metrics.record_duplicate_interrupt();
            debug!(task_id, status = %current, action = action.as_str(), "Reply for resolved task ignored");
            return Ok(InterruptOutcome::AlreadyResolved { status: current });
        }

        // Redelivered replies are answered above, even once their time has passed.
        let new_time = action.reschedule_time(now, self.snooze)?;
        let previous = guard.snapshot().clone();

        let status = match action {
            ReplyAction::Acknowledge => TaskStatus::Acknowledged,
            ReplyAction::Skip => TaskStatus::Cancelled,
            ReplyAction::Reschedule(_) => TaskStatus::Rescheduled,
        };
        let closed = guard
            .mark_terminal(status, now)
            .await
            .inspect_err(|e| self.on_persistence_error(task_id, e, now))?;

        let successor = match new_time {
            Some(at) => {
                let successor = match self.tracker.insert(closed.successor(at)).await {
                    Ok(successor) => successor,
                    Err(e) => {
                        // Without a successor the original must stay live.
                        self.on_persistence_error(task_id, &e, now);
                        guard.revert(previous).await;
                        return Err(e);
                    }
                };
                self.events.publish(EscalationEvent::TaskRescheduled {
                    task_id: task_id.to_string(),
                    successor_id: successor.id.clone(),
                    new_time: at,
                    timestamp: now,
                });
                Some(successor)
            }
            None => None,
        };
        drop(guard);

        self.metrics.record_interrupt();
        info!(
            task_id,
            status = %status,
            source = ?source,
            successor = successor.as_ref().map(|s| s.id.as_str()),
            "Reply applied"
        );
        self.events.publish(EscalationEvent::TaskResolved {
            task_id: task_id.to_string(),
            status,
            cause: ResolutionCause::Reply,
            source: Some(source),
            timestamp: now,
        });
        Ok(InterruptOutcome::Applied { status, successor })
    }

    fn on_persistence_error(&self, task_id: &str, error: &EngineError, now: DateTime<Utc>) {
        if let EngineError::Persistence {
            attempts, source, ..
        } = error
        {
            self.metrics.record_persistence_failure();
            self.events.publish(EscalationEvent::PersistenceFailed {
                task_id: task_id.to_string(),
                attempts: *attempts,
                error: source.to_string(),
                timestamp: now,
            });
        }
    }
}
