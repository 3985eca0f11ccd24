//! One evaluation pass over every tracked task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::decision::{decide, Decision};
use crate::clock::Clock;
use crate::dispatch::{DeliveryResult, DispatchGateway, DispatchPayload, Dispatcher};
use crate::error::EngineError;
use crate::events::{EscalationEvent, EventBus, ResolutionCause, SharedEventBus};
use crate::metrics::{EngineMetrics, SharedEngineMetrics};
use crate::policy::Channel;
use crate::state::{LockAttempt, SharedStateTracker, TaskGuard, TaskId, TaskStatus};

/// Default bound on tasks evaluated at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;

/// What a tick did to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Idle,
    Dispatched { channel: Channel },
    DispatchFailed { channel: Channel },
    AutoMissed,
    /// Held by an interrupt or a slow dispatch; looked at next tick
    Busy,
    /// Lost a race to another writer
    Conflict,
    PersistenceFailed,
    /// Already terminal, or removed since the id list was taken
    Skipped,
}

/// Summary of one tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub evaluated: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
    pub auto_missed: usize,
    pub busy: usize,
    pub conflicts: usize,
    pub persistence_failures: usize,
    pub outcomes: Vec<(TaskId, TaskOutcome)>,
}

impl TickReport {
    fn new(at: DateTime<Utc>, mut outcomes: Vec<(TaskId, TaskOutcome)>) -> Self {
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        let count = |f: fn(&TaskOutcome) -> bool| outcomes.iter().filter(|(_, o)| f(o)).count();
        Self {
            at,
            evaluated: count(|o| !matches!(o, TaskOutcome::Skipped)),
            dispatched: count(|o| matches!(o, TaskOutcome::Dispatched { .. })),
            dispatch_failures: count(|o| matches!(o, TaskOutcome::DispatchFailed { .. })),
            auto_missed: count(|o| matches!(o, TaskOutcome::AutoMissed)),
            busy: count(|o| matches!(o, TaskOutcome::Busy)),
            conflicts: count(|o| matches!(o, TaskOutcome::Conflict)),
            persistence_failures: count(|o| matches!(o, TaskOutcome::PersistenceFailed)),
            outcomes,
        }
    }

    pub fn outcome(&self, task_id: &str) -> Option<TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, o)| *o)
    }

    /// Nothing was dispatched, resolved or failed.
    pub fn is_quiet(&self) -> bool {
        self.dispatched
            + self.dispatch_failures
            + self.auto_missed
            + self.conflicts
            + self.persistence_failures
            == 0
    }
}

/// Decides and applies due ladder steps for every tracked task.
pub struct TickEvaluator {
    tracker: SharedStateTracker,
    gateway: Arc<DispatchGateway>,
    clock: Arc<dyn Clock>,
    events: SharedEventBus,
    metrics: SharedEngineMetrics,
    max_concurrency: usize,
}

impl TickEvaluator {
    pub fn new(tracker: SharedStateTracker, gateway: Arc<DispatchGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker,
            gateway,
            clock,
            events: EventBus::new().shared(),
            metrics: EngineMetrics::new().shared(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
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

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn tracker(&self) -> &SharedStateTracker {
        &self.tracker
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &SharedEngineMetrics {
        &self.metrics
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Evaluate every task at the clock's current time.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(self.clock.now()).await
    }

    /// Evaluate every task as of `now`.
    ///
    /// Tasks are independent: each is evaluated under its own lock, up to
    /// `max_concurrency` at once, and one task's failure never stops the
    /// others.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        self.metrics.record_tick();
        let ids = self.tracker.task_ids();

        let outcomes: Vec<(TaskId, TaskOutcome)> = stream::iter(ids)
            .map(|id| async move {
                let outcome = self.evaluate(&id, now).await;
                (id, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let report = TickReport::new(now, outcomes);
        if report.is_quiet() {
            debug!(at = %now, evaluated = report.evaluated, busy = report.busy, "Tick complete");
        } else {
            info!(
                at = %now,
                evaluated = report.evaluated,
                dispatched = report.dispatched,
                dispatch_failures = report.dispatch_failures,
                auto_missed = report.auto_missed,
                conflicts = report.conflicts,
                persistence_failures = report.persistence_failures,
                "Tick complete"
            );
        }
        report
    }

    async fn evaluate(&self, task_id: &str, now: DateTime<Utc>) -> TaskOutcome {
        let mut guard = match self.tracker.try_lock(task_id) {
            LockAttempt::Acquired(guard) => guard,
            LockAttempt::Busy => {
                debug!(task_id, "Task busy, skipping this tick");
                return TaskOutcome::Busy;
            }
            LockAttempt::Unknown => return TaskOutcome::Skipped,
        };

        let task = guard.snapshot();
        if task.is_terminal() {
            return TaskOutcome::Skipped;
        }
        let policy = self.tracker.policy();
        let decision = decide(
            task,
            policy.ladder_for(task.priority),
            policy.auto_miss_deadline(task.priority, task.escalation_speed_multiplier),
            now,
        );

        match decision {
            Decision::Idle => TaskOutcome::Idle,
            Decision::Dispatch { step_index, channel } => {
                self.dispatch(&mut guard, step_index, channel, now).await
            }
            Decision::AutoMiss => self.auto_miss(&mut guard, now).await,
        }
    }

    async fn dispatch(
        &self,
        guard: &mut TaskGuard,
        step_index: usize,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> TaskOutcome {
        let attempt = guard.dispatch_failures() + 1;
        let payload = DispatchPayload::for_step(guard.snapshot(), channel, step_index, attempt);

        let delivery = self.gateway.send(channel, guard.task_id(), &payload).await;
        match delivery {
            DeliveryResult::Sent(provider_ref) => match guard.mark_sent(channel, now).await {
                Ok(_) => {
                    self.metrics.record_dispatch(channel);
                    info!(
                        task_id = guard.task_id(),
                        channel = %channel,
                        step = step_index,
                        provider_ref = %provider_ref,
                        "Escalation step dispatched"
                    );
                    self.events.publish(EscalationEvent::StepDispatched {
                        task_id: guard.task_id().to_string(),
                        channel,
                        step_index,
                        provider_ref,
                        timestamp: now,
                    });
                    TaskOutcome::Dispatched { channel }
                }
                Err(e) => self.on_error(guard.task_id(), e, now),
            },
            DeliveryResult::Failed(reason) => {
                let attempt = guard.record_dispatch_failure();
                self.metrics.record_dispatch_failure();
                warn!(
                    task_id = guard.task_id(),
                    channel = %channel,
                    attempt,
                    reason = %reason,
                    "Dispatch failed, step stays due"
                );
                self.events.publish(EscalationEvent::DispatchFailed {
                    task_id: guard.task_id().to_string(),
                    channel,
                    attempt,
                    reason,
                    timestamp: now,
                });
                TaskOutcome::DispatchFailed { channel }
            }
        }
    }

    async fn auto_miss(&self, guard: &mut TaskGuard, now: DateTime<Utc>) -> TaskOutcome {
        match guard.mark_terminal(TaskStatus::AutoMissed, now).await {
            Ok(_) => {
                self.metrics.record_auto_miss();
                info!(task_id = guard.task_id(), "Task auto-missed");
                self.events.publish(EscalationEvent::TaskResolved {
                    task_id: guard.task_id().to_string(),
                    status: TaskStatus::AutoMissed,
                    cause: ResolutionCause::AutoMiss,
                    source: None,
                    timestamp: now,
                });
                TaskOutcome::AutoMissed
            }
            Err(e) => self.on_error(guard.task_id(), e, now),
        }
    }

    fn on_error(&self, task_id: &str, error: EngineError, now: DateTime<Utc>) -> TaskOutcome {
        match error {
            EngineError::Persistence {
                attempts, source, ..
            } => {
                self.metrics.record_persistence_failure();
                self.events.publish(EscalationEvent::PersistenceFailed {
                    task_id: task_id.to_string(),
                    attempts,
                    error: source.to_string(),
                    timestamp: now,
                });
                TaskOutcome::PersistenceFailed
            }
            other => {
                self.metrics.record_conflict();
                debug!(task_id, error = %other, "Transition abandoned");
                TaskOutcome::Conflict
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::LogDispatcher;
    use crate::policy::{PolicyTable, Priority};
    use crate::state::{MemoryTaskStore, StateTracker, TaskSnapshot};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    /// Fails the first `failures` deliveries, then succeeds.
    struct FailingFirst {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Dispatcher for FailingFirst {
        async fn send(&self, _channel: Channel, _task_id: &str, payload: &DispatchPayload) -> DeliveryResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                DeliveryResult::Failed(format!("provider down (attempt {})", payload.attempt))
            } else {
                DeliveryResult::Sent(format!("ref-{}", payload.attempt))
            }
        }
    }

    async fn evaluator_with(
        dispatcher: Arc<dyn Dispatcher>,
        tasks: Vec<TaskSnapshot>,
    ) -> TickEvaluator {
        let tracker = StateTracker::new(
            Arc::new(MemoryTaskStore::with_tasks(tasks)),
            Arc::new(PolicyTable::standard()),
        )
        .shared();
        tracker.rehydrate().await.unwrap();
        let gateway = Arc::new(DispatchGateway::uniform(
            dispatcher,
            std::time::Duration::from_secs(5),
        ));
        TickEvaluator::new(tracker, gateway, Arc::new(ManualClock::new(t0())))
    }

    #[tokio::test]
    async fn tick_dispatches_due_first_steps() {
        let evaluator = evaluator_with(
            Arc::new(LogDispatcher),
            vec![
                TaskSnapshot::new("due", t0(), Priority::Standard),
                TaskSnapshot::new("future", t0() + Duration::hours(1), Priority::Standard),
            ],
        )
        .await;

        let report = evaluator.tick().await;
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.dispatched, 1);
        assert_eq!(
            report.outcome("due"),
            Some(TaskOutcome::Dispatched {
                channel: Channel::Push
            })
        );
        assert_eq!(report.outcome("future"), Some(TaskOutcome::Idle));

        let repeat = evaluator.tick().await;
        assert!(repeat.is_quiet());
        assert_eq!(evaluator.metrics().snapshot().dispatched(Channel::Push), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_with_next_attempt() {
        let dispatcher = Arc::new(FailingFirst {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let evaluator = evaluator_with(
            dispatcher.clone(),
            vec![TaskSnapshot::new("t-1", t0(), Priority::Important)],
        )
        .await;
        let mut events = evaluator.events().subscribe();

        let first = evaluator.tick_at(t0()).await;
        assert_eq!(first.dispatch_failures, 1);
        let task = evaluator.tracker().get("t-1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let second = evaluator.tick_at(t0() + Duration::seconds(60)).await;
        assert_eq!(second.dispatched, 1);
        let task = evaluator.tracker().get("t-1").await.unwrap();
        assert_eq!(task.push_sent_at, Some(t0() + Duration::seconds(60)));

        match events.recv().await.unwrap() {
            EscalationEvent::DispatchFailed { attempt, .. } => assert_eq!(attempt, 1),
            other => panic!("unexpected event {other:?}"),
        }
        match events.recv().await.unwrap() {
            EscalationEvent::StepDispatched { provider_ref, .. } => assert_eq!(provider_ref, "ref-2"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(evaluator.metrics().snapshot().dispatch_failures, 1);
    }

    #[tokio::test]
    async fn busy_task_is_skipped_not_awaited() {
        let evaluator = evaluator_with(
            Arc::new(LogDispatcher),
            vec![
                TaskSnapshot::new("held", t0(), Priority::Standard),
                TaskSnapshot::new("free", t0(), Priority::Standard),
            ],
        )
        .await;

        let held = evaluator.tracker().lock("held").await.unwrap();
        let report = evaluator.tick().await;
        drop(held);

        assert_eq!(report.outcome("held"), Some(TaskOutcome::Busy));
        assert!(matches!(
            report.outcome("free"),
            Some(TaskOutcome::Dispatched { .. })
        ));
    }

    #[tokio::test]
    async fn terminal_tasks_are_skipped() {
        let evaluator = evaluator_with(
            Arc::new(LogDispatcher),
            vec![TaskSnapshot::new("t-1", t0(), Priority::Important)],
        )
        .await;
        evaluator
            .tracker()
            .mark_terminal("t-1", TaskStatus::Cancelled, t0())
            .await
            .unwrap();

        let report = evaluator.tick().await;
        assert_eq!(report.outcome("t-1"), Some(TaskOutcome::Skipped));
        assert_eq!(report.evaluated, 0);
    }
}
