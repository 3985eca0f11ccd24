//! Wiring of the engine's parts around one tracker, clock, event bus and
//! metrics registry.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::DispatchGateway;
use crate::error::EngineResult;
use crate::evaluator::{TickEvaluator, TickLoop, TickReport};
use crate::events::{EventBus, SharedEventBus};
use crate::interrupt::{InterruptHandler, InterruptOutcome, ReplyEvent};
use crate::metrics::{EngineMetrics, SharedEngineMetrics};
use crate::policy::{PolicyTable, Priority, TimingPreview};
use crate::state::{SharedStateTracker, StateTracker, StoreResult, TaskSnapshot, TaskStore};

/// The escalation engine: policy, tracker, evaluator and interrupt handler
/// sharing one state.
pub struct EscalationEngine {
    config: EngineConfig,
    tracker: SharedStateTracker,
    evaluator: Arc<TickEvaluator>,
    interrupts: InterruptHandler,
    events: SharedEventBus,
    metrics: SharedEngineMetrics,
    clock: Arc<dyn Clock>,
}

impl EscalationEngine {
    /// Validate `config` and assemble the engine. Nothing is loaded from the
    /// store until [`EscalationEngine::rehydrate`].
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        gateway: DispatchGateway,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = Arc::new(config.build_policy()?);
        let tracker = StateTracker::new(store, policy).shared();
        let events = EventBus::new().shared();
        let metrics = EngineMetrics::new().shared();

        let evaluator = Arc::new(
            TickEvaluator::new(tracker.clone(), Arc::new(gateway), clock.clone())
                .with_events(events.clone())
                .with_metrics(metrics.clone())
                .with_max_concurrency(config.max_concurrent_evaluations),
        );
        let interrupts = InterruptHandler::new(tracker.clone(), clock.clone(), config.snooze())
            .with_events(events.clone())
            .with_metrics(metrics.clone());

        Ok(Self {
            config,
            tracker,
            evaluator,
            interrupts,
            events,
            metrics,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyTable {
        self.tracker.policy()
    }

    pub fn tracker(&self) -> &SharedStateTracker {
        &self.tracker
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn metrics(&self) -> &SharedEngineMetrics {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn rehydrate(&self) -> StoreResult<usize> {
        self.tracker.rehydrate().await
    }

    pub async fn tick(&self) -> TickReport {
        self.evaluator.tick().await
    }

    /// Tick loop over this engine's evaluator, using the configured cadence.
    pub fn tick_loop(&self) -> TickLoop {
        TickLoop::new(self.evaluator.clone(), &self.config)
    }

    pub async fn handle_reply(&self, event: &ReplyEvent) -> EngineResult<InterruptOutcome> {
        self.interrupts.handle(event).await
    }

    /// Start (or replace) tracking of a task.
    pub async fn track(&self, snapshot: TaskSnapshot) -> EngineResult<TaskSnapshot> {
        self.tracker.upsert(snapshot).await
    }

    /// Start tracking a task whose id is not tracked yet; `AlreadyTracked`
    /// otherwise.
    pub async fn track_new(&self, snapshot: TaskSnapshot) -> EngineResult<TaskSnapshot> {
        self.tracker.insert(snapshot).await
    }

    pub async fn task(&self, id: &str) -> Option<TaskSnapshot> {
        self.tracker.get(id).await
    }

    /// Timing preview; `multiplier` falls back to the configured default.
    pub fn preview(&self, priority: Priority, multiplier: Option<f64>) -> EngineResult<TimingPreview> {
        self.policy()
            .preview(priority, multiplier.unwrap_or(self.config.default_multiplier))
    }
}
