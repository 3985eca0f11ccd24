//! Engine counters.
//!
//! Plain atomics, read through [`EngineMetrics::snapshot`]. Counters only
//! ever increase.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::policy::Channel;

/// Shared reference to EngineMetrics
pub type SharedEngineMetrics = Arc<EngineMetrics>;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    ticks: AtomicU64,
    push_dispatched: AtomicU64,
    messaging_dispatched: AtomicU64,
    call_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    auto_missed: AtomicU64,
    interrupts_applied: AtomicU64,
    duplicate_interrupts: AtomicU64,
    persistence_failures: AtomicU64,
    transition_conflicts: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetricsSnapshot {
    pub ticks: u64,
    pub push_dispatched: u64,
    pub messaging_dispatched: u64,
    pub call_dispatched: u64,
    pub dispatch_failures: u64,
    pub auto_missed: u64,
    pub interrupts_applied: u64,
    pub duplicate_interrupts: u64,
    pub persistence_failures: u64,
    pub transition_conflicts: u64,
}

impl EngineMetricsSnapshot {
    pub fn dispatched(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Push => self.push_dispatched,
            Channel::Messaging => self.messaging_dispatched,
            Channel::Call => self.call_dispatched,
        }
    }

    pub fn total_dispatched(&self) -> u64 {
        self.push_dispatched + self.messaging_dispatched + self.call_dispatched
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedEngineMetrics {
        Arc::new(self)
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, channel: Channel) {
        let counter = match channel {
            Channel::Push => &self.push_dispatched,
            Channel::Messaging => &self.messaging_dispatched,
            Channel::Call => &self.call_dispatched,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_miss(&self) {
        self.auto_missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interrupt(&self) {
        self.interrupts_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_interrupt(&self) {
        self.duplicate_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.transition_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            push_dispatched: self.push_dispatched.load(Ordering::Relaxed),
            messaging_dispatched: self.messaging_dispatched.load(Ordering::Relaxed),
            call_dispatched: self.call_dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            auto_missed: self.auto_missed.load(Ordering::Relaxed),
            interrupts_applied: self.interrupts_applied.load(Ordering::Relaxed),
            duplicate_interrupts: self.duplicate_interrupts.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            transition_conflicts: self.transition_conflicts.load(Ordering::Relaxed),
        }
    }
}
