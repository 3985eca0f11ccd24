//! Fixed-cadence driver for the tick evaluator.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tick::TickEvaluator;
use crate::config::EngineConfig;

/// Runs [`TickEvaluator::tick`] on an interval until cancelled.
///
/// Every `reconcile_every` ticks the tracker also adopts tasks that appeared
/// in the store and forgets terminal tasks older than the retention window.
/// Cancellation is only observed between ticks; a tick in progress always
/// finishes its dispatches.
pub struct TickLoop {
    evaluator: Arc<TickEvaluator>,
    interval: Duration,
    reconcile_every: u32,
    retention: chrono::Duration,
    cancel: CancellationToken,
}

impl TickLoop {
    pub fn new(evaluator: Arc<TickEvaluator>, config: &EngineConfig) -> Self {
        Self {
            evaluator,
            interval: config.tick_interval(),
            reconcile_every: config.reconcile_every_ticks,
            retention: config.terminal_retention(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    /// Run until cancelled; returns the number of ticks evaluated.
    pub async fn run(self) -> u64 {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Tick loop started");

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(ticks, "Tick loop stopped");
                    return ticks;
                }
                _ = interval.tick() => {}
            }

            ticks += 1;
            if self.reconcile_every > 0 && ticks % u64::from(self.reconcile_every) == 0 {
                self.maintain().await;
            }
            self.evaluator.tick().await;
        }
    }

    async fn maintain(&self) {
        let tracker = self.evaluator.tracker();
        if let Err(e) = tracker.reconcile().await {
            warn!(error = %e, "Reconcile with store failed, keeping in-memory state");
        }
        let cutoff = self.evaluator.clock().now() - self.retention;
        let pruned = tracker.prune_terminal(cutoff);
        if pruned > 0 {
            debug!(pruned, "Pruned resolved tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::{DispatchGateway, LogDispatcher};
    use crate::policy::{PolicyTable, Priority};
    use crate::state::{MemoryTaskStore, StateTracker, TaskSnapshot, TaskStore};
    use chrono::{TimeZone, Utc};

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_and_reconciles() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let store = Arc::new(MemoryTaskStore::new());
        let tracker = StateTracker::new(store.clone(), Arc::new(PolicyTable::standard())).shared();
        let gateway = Arc::new(DispatchGateway::uniform(
            Arc::new(LogDispatcher),
            Duration::from_secs(5),
        ));
        let evaluator = Arc::new(TickEvaluator::new(
            tracker.clone(),
            gateway,
            Arc::new(ManualClock::new(t0)),
        ));

        // Appears in the store only; picked up by the second tick's reconcile.
        store
            .save(&TaskSnapshot::new("external", t0, Priority::Standard))
            .await
            .unwrap();

        let config = EngineConfig {
            tick_interval_secs: 60,
            reconcile_every_ticks: 2,
            ..EngineConfig::default()
        };
        let runner = TickLoop::new(evaluator.clone(), &config);
        let cancel = runner.cancel_token();
        let handle = runner.spawn();

        // Ticks at 0s, 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        let ticks = handle.await.unwrap();

        assert_eq!(ticks, 3);
        assert_eq!(evaluator.metrics().snapshot().ticks, 3);
        let task = tracker.get("external").await.unwrap();
        assert!(task.push_sent_at.is_some());
    }
}
