//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use nudge_escalation::state::StoreResult;
use nudge_escalation::{
    Channel, DeliveryResult, DispatchGateway, DispatchPayload, Dispatcher, EngineConfig,
    EscalationEngine, ManualClock, MemoryTaskStore, StoreError, TaskSnapshot, TaskStore,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

/// Records every delivery and always reports it sent.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, Channel, u32)>>,
}

impl RecordingDispatcher {
    pub fn channels_for(&self, task_id: &str) -> Vec<Channel> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == task_id)
            .map(|(_, channel, _)| *channel)
            .collect()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn send(&self, channel: Channel, task_id: &str, payload: &DispatchPayload) -> DeliveryResult {
        self.sent
            .lock()
            .unwrap()
            .push((task_id.to_string(), channel, payload.attempt));
        DeliveryResult::Sent(format!("rec-{task_id}-{channel}"))
    }
}

/// In-memory store whose writes fail while `down` is set.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryTaskStore,
    pub down: AtomicBool,
    pub failed_saves: AtomicU32,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>> {
        self.inner.load_active_tasks().await
    }

    async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            self.failed_saves.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("data api returned 503".into()));
        }
        self.inner.save(snapshot).await
    }
}

/// In-memory store that, while restricted, accepts writes only for the
/// listed ids.
#[derive(Default)]
pub struct RestrictedStore {
    pub inner: MemoryTaskStore,
    allowed: Mutex<Option<Vec<String>>>,
}

impl RestrictedStore {
    pub fn restrict_to(&self, ids: &[&str]) {
        *self.allowed.lock().unwrap() = Some(ids.iter().map(|id| id.to_string()).collect());
    }

    pub fn lift(&self) {
        *self.allowed.lock().unwrap() = None;
    }
}

#[async_trait]
impl TaskStore for RestrictedStore {
    async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>> {
        self.inner.load_active_tasks().await
    }

    async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        let rejected = {
            let allowed = self.allowed.lock().unwrap();
            allowed
                .as_ref()
                .is_some_and(|ids| !ids.iter().any(|id| *id == snapshot.id))
        };
        if rejected {
            return Err(StoreError::Unavailable(format!("write to {} refused", snapshot.id)));
        }
        self.inner.save(snapshot).await
    }
}

pub struct Harness {
    pub engine: EscalationEngine,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryTaskStore::new()))
    }

    pub fn with_store(store: Arc<dyn TaskStore>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let gateway = DispatchGateway::uniform(dispatcher.clone(), StdDuration::from_secs(5));
        let engine = EscalationEngine::new(EngineConfig::default(), store, gateway, clock.clone())
            .expect("default config is valid");
        Self {
            engine,
            clock,
            dispatcher,
        }
    }

    /// Tick once per minute from the clock's current time up to and
    /// including `until_secs` after T.
    pub async fn tick_every_minute_until(&self, until_secs: i64) {
        while self.clock.now_secs() <= until_secs {
            self.engine.tick().await;
            self.clock.advance(Duration::seconds(60));
        }
    }

    pub async fn tick_at(&self, secs: i64) -> nudge_escalation::TickReport {
        self.clock.set(at(secs));
        self.engine.tick().await
    }
}

trait SecondsSinceT0 {
    fn now_secs(&self) -> i64;
}

impl SecondsSinceT0 for ManualClock {
    fn now_secs(&self) -> i64 {
        use nudge_escalation::Clock;
        (self.now() - t0()).num_seconds()
    }
}
