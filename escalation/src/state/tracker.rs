//! In-memory state tracker with per-task exclusion.
//!
//! Each task lives in its own async mutex slot. Every read-modify-write of a
//! task happens while holding that slot's lock through a [`TaskGuard`], so a
//! tick decision and a reply interrupt for the same task can never
//! interleave. The map of slots is only locked briefly to look up or insert a
//! slot, so work on one task never blocks work on another.
//!
//! Mutations are flushed to the [`TaskStore`] before they are committed. If
//! the flush fails the in-memory snapshot is left as it was and the caller
//! gets `EngineError::Persistence` carrying the consecutive failure count.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::store::{StoreResult, TaskStore};
use super::types::{TaskId, TaskSnapshot, TaskStatus};
use crate::error::{EngineError, EngineResult};
use crate::policy::{validate_multiplier, Channel, PolicyTable};

/// Shared reference to StateTracker
pub type SharedStateTracker = Arc<StateTracker>;

#[derive(Debug, Clone)]
struct TaskEntry {
    snapshot: TaskSnapshot,
    /// Consecutive failed flushes
    persist_failures: u32,
    /// Consecutive failed deliveries of the current step
    dispatch_failures: u32,
}

impl TaskEntry {
    fn new(snapshot: TaskSnapshot) -> Self {
        Self {
            snapshot,
            persist_failures: 0,
            dispatch_failures: 0,
        }
    }
}

/// `None` marks a slot reserved by an upsert whose flush has not succeeded.
type Slot = Arc<Mutex<Option<TaskEntry>>>;

/// Outcome of a non-blocking lock attempt.
pub enum LockAttempt {
    Acquired(TaskGuard),
    /// Another tick or interrupt holds the task
    Busy,
    Unknown,
}

/// Authoritative per-task state between ticks
pub struct StateTracker {
    slots: RwLock<HashMap<TaskId, Slot>>,
    store: Arc<dyn TaskStore>,
    policy: Arc<PolicyTable>,
}

impl StateTracker {
    pub fn new(store: Arc<dyn TaskStore>, policy: Arc<PolicyTable>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store,
            policy,
        }
    }

    /// Create a shared reference to this tracker
    pub fn shared(self) -> SharedStateTracker {
        Arc::new(self)
    }

    pub fn policy(&self) -> &Arc<PolicyTable> {
        &self.policy
    }

    /// Number of tracked slots, terminal tasks included.
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every tracked task. Terminal ones are filtered by the caller
    /// once it holds the task's lock.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn slot(&self, id: &str) -> Option<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn slot_or_reserve(&self, id: &str) -> Slot {
        if let Some(slot) = self.slot(id) {
            return slot;
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn guard(&self, id: &str, locked: OwnedMutexGuard<Option<TaskEntry>>) -> Option<TaskGuard> {
        let entry = OwnedMutexGuard::try_map(locked, Option::as_mut).ok()?;
        Some(TaskGuard {
            task_id: id.to_string(),
            entry,
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
        })
    }

    /// Wait for exclusive access to a task.
    pub async fn lock(&self, id: &str) -> EngineResult<TaskGuard> {
        let slot = self
            .slot(id)
            .ok_or_else(|| EngineError::UnknownTask(id.to_string()))?;
        let locked = slot.lock_owned().await;
        self.guard(id, locked)
            .ok_or_else(|| EngineError::UnknownTask(id.to_string()))
    }

    /// Take exclusive access only if nobody else holds the task.
    pub fn try_lock(&self, id: &str) -> LockAttempt {
        let Some(slot) = self.slot(id) else {
            return LockAttempt::Unknown;
        };
        match slot.try_lock_owned() {
            Ok(locked) => match self.guard(id, locked) {
                Some(guard) => LockAttempt::Acquired(guard),
                None => LockAttempt::Unknown,
            },
            Err(_) => LockAttempt::Busy,
        }
    }

    /// Current snapshot of a task.
    pub async fn get(&self, id: &str) -> Option<TaskSnapshot> {
        let slot = self.slot(id)?;
        let entry = slot.lock().await;
        entry.as_ref().map(|e| e.snapshot.clone())
    }

    /// Insert or replace a task's snapshot, flushing it first.
    pub async fn upsert(&self, snapshot: TaskSnapshot) -> EngineResult<TaskSnapshot> {
        validate_multiplier(snapshot.escalation_speed_multiplier)?;

        let slot = self.slot_or_reserve(&snapshot.id);
        let mut entry = slot.lock().await;
        self.store_entry(&mut entry, snapshot).await
    }

    /// Start tracking a task that is not tracked yet. The existence check and
    /// the write happen under the task's lock, so of two concurrent inserts
    /// for one id exactly one succeeds.
    pub async fn insert(&self, snapshot: TaskSnapshot) -> EngineResult<TaskSnapshot> {
        validate_multiplier(snapshot.escalation_speed_multiplier)?;

        let slot = self.slot_or_reserve(&snapshot.id);
        let mut entry = slot.lock().await;
        if entry.is_some() {
            return Err(EngineError::AlreadyTracked(snapshot.id));
        }
        self.store_entry(&mut entry, snapshot).await
    }

    async fn store_entry(
        &self,
        entry: &mut Option<TaskEntry>,
        snapshot: TaskSnapshot,
    ) -> EngineResult<TaskSnapshot> {
        match self.store.save(&snapshot).await {
            Ok(()) => {
                debug!(task_id = %snapshot.id, status = %snapshot.status, "Task upserted");
                *entry = Some(TaskEntry::new(snapshot.clone()));
                Ok(snapshot)
            }
            Err(source) => {
                let attempts = match entry.as_mut() {
                    Some(existing) => {
                        existing.persist_failures += 1;
                        existing.persist_failures
                    }
                    None => 1,
                };
                warn!(task_id = %snapshot.id, attempts, error = %source, "Upsert not persisted");
                Err(EngineError::Persistence {
                    task_id: snapshot.id,
                    attempts,
                    source,
                })
            }
        }
    }

    /// Record that `channel` fired for task `id` at `at`.
    pub async fn mark_sent(
        &self,
        id: &str,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> EngineResult<TaskSnapshot> {
        self.lock(id).await?.mark_sent(channel, at).await
    }

    /// Move task `id` to a terminal status.
    pub async fn mark_terminal(
        &self,
        id: &str,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> EngineResult<TaskSnapshot> {
        self.lock(id).await?.mark_terminal(status, at).await
    }

    /// Load active tasks from the store at startup.
    pub async fn rehydrate(&self) -> StoreResult<usize> {
        let adopted = self.adopt_from_store().await?;
        info!(adopted, "Rehydrated task state");
        Ok(adopted)
    }

    /// Adopt tasks that appeared in the store since the last load. Tasks
    /// already tracked keep their in-memory state.
    pub async fn reconcile(&self) -> StoreResult<usize> {
        let adopted = self.adopt_from_store().await?;
        if adopted > 0 {
            info!(adopted, "Reconciled new tasks from store");
        } else {
            debug!("Reconcile found no new tasks");
        }
        Ok(adopted)
    }

    async fn adopt_from_store(&self) -> StoreResult<usize> {
        let tasks = self.store.load_active_tasks().await?;
        let mut adopted = 0;
        for task in tasks {
            let slot = self.slot_or_reserve(&task.id);
            let mut entry = slot.lock().await;
            if entry.is_none() {
                *entry = Some(TaskEntry::new(task));
                adopted += 1;
            }
        }
        Ok(adopted)
    }

    /// Forget terminal tasks resolved before `cutoff`, and reserved slots
    /// whose first flush never succeeded. Busy slots are left for next time.
    pub fn prune_terminal(&self, cutoff: DateTime<Utc>) -> usize {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| {
            let Ok(entry) = slot.try_lock() else {
                return true;
            };
            match entry.as_ref() {
                None => false,
                Some(e) => !(e.snapshot.is_terminal()
                    && e.snapshot.resolved_at.is_some_and(|at| at < cutoff)),
            }
        });
        before - slots.len()
    }
}

/// Exclusive handle on one task's entry.
///
/// Dropping the guard releases the task.
pub struct TaskGuard {
    task_id: TaskId,
    entry: OwnedMappedMutexGuard<Option<TaskEntry>, TaskEntry>,
    store: Arc<dyn TaskStore>,
    policy: Arc<PolicyTable>,
}

impl TaskGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.entry.snapshot
    }

    pub fn persist_failures(&self) -> u32 {
        self.entry.persist_failures
    }

    pub fn dispatch_failures(&self) -> u32 {
        self.entry.dispatch_failures
    }

    /// Count a failed delivery of the current step; returns the new total.
    pub fn record_dispatch_failure(&mut self) -> u32 {
        self.entry.dispatch_failures += 1;
        self.entry.dispatch_failures
    }

    pub async fn mark_sent(&mut self, channel: Channel, at: DateTime<Utc>) -> EngineResult<TaskSnapshot> {
        let ladder = self.policy.ladder_for(self.entry.snapshot.priority);
        let next = self.entry.snapshot.with_sent(ladder, channel, at)?;
        let committed = self.commit(next).await?;
        self.entry.dispatch_failures = 0;
        Ok(committed)
    }

    pub async fn mark_terminal(
        &mut self,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> EngineResult<TaskSnapshot> {
        let next = self.entry.snapshot.with_terminal(status, at)?;
        self.commit(next).await
    }

    /// Undo a committed transition whose follow-up write failed.
    ///
    /// Memory always goes back to `previous` so the task stays eligible. If
    /// the store cannot be rewritten now, the next committed transition of
    /// this task overwrites the stale record.
    pub async fn revert(&mut self, previous: TaskSnapshot) {
        if let Err(e) = self.store.save(&previous).await {
            warn!(
                task_id = %self.task_id,
                restored = %previous.status,
                error = %e,
                "Revert not persisted, store keeps the newer record until the next transition"
            );
        } else {
            debug!(task_id = %self.task_id, restored = %previous.status, "Transition reverted");
        }
        self.entry.snapshot = previous;
    }

    async fn commit(&mut self, next: TaskSnapshot) -> EngineResult<TaskSnapshot> {
        match self.store.save(&next).await {
            Ok(()) => {
                debug!(task_id = %self.task_id, status = %next.status, "Transition committed");
                self.entry.persist_failures = 0;
                self.entry.snapshot = next.clone();
                Ok(next)
            }
            Err(source) => {
                self.entry.persist_failures += 1;
                let attempts = self.entry.persist_failures;
                warn!(
                    task_id = %self.task_id,
                    attempted = %next.status,
                    attempts,
                    error = %source,
                    "Transition not persisted, rolled back"
                );
                Err(EngineError::Persistence {
                    task_id: self.task_id.clone(),
                    attempts,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Priority;
    use crate::state::store::{MemoryTaskStore, StoreError};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    /// Store whose writes can be switched off.
    #[derive(Default)]
    struct SwitchableStore {
        inner: MemoryTaskStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl TaskStore for SwitchableStore {
        async fn load_active_tasks(&self) -> StoreResult<Vec<TaskSnapshot>> {
            self.inner.load_active_tasks().await
        }

        async fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("data api down".into()));
            }
            self.inner.save(snapshot).await
        }
    }

    fn tracker_with(store: Arc<dyn TaskStore>) -> StateTracker {
        StateTracker::new(store, Arc::new(PolicyTable::standard()))
    }

    #[tokio::test]
    async fn upsert_flushes_then_commits() {
        let store = Arc::new(MemoryTaskStore::new());
        let tracker = tracker_with(store.clone());

        let task = TaskSnapshot::new("t-1", t0(), Priority::Important);
        tracker.upsert(task.clone()).await.unwrap();

        assert_eq!(tracker.get("t-1").await, Some(task.clone()));
        assert_eq!(store.get("t-1"), Some(task));
    }

    #[tokio::test]
    async fn upsert_rejects_bad_multiplier() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        let task = TaskSnapshot::new("t-1", t0(), Priority::Important).with_multiplier(-1.0);
        let err = tracker.upsert(task).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_multiplier");
        assert!(tracker.get("t-1").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_inserts_for_one_id_admit_exactly_one() {
        let store = Arc::new(MemoryTaskStore::new());
        let tracker = tracker_with(store.clone());
        let first = TaskSnapshot::new("t-1", t0(), Priority::Important);
        let second = TaskSnapshot::new("t-1", t0(), Priority::MustNotMiss);

        let (a, b) = tokio::join!(tracker.insert(first), tracker.insert(second));
        let (won, lost) = match (a, b) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            other => panic!("expected one winner, got {other:?}"),
        };
        assert_eq!(lost.kind(), "already_tracked");
        assert_eq!(tracker.get("t-1").await, Some(won.clone()));
        assert_eq!(store.get("t-1"), Some(won));
    }

    #[tokio::test]
    async fn insert_does_not_replace_progress() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        tracker
            .insert(TaskSnapshot::new("t-1", t0(), Priority::Important))
            .await
            .unwrap();
        tracker.mark_sent("t-1", Channel::Push, t0()).await.unwrap();

        let err = tracker
            .insert(TaskSnapshot::new("t-1", t0(), Priority::Important))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTracked(ref id) if id == "t-1"));
        assert_eq!(tracker.get("t-1").await.unwrap().status, TaskStatus::PushSent);
    }

    #[tokio::test]
    async fn insert_after_failed_flush_can_be_retried() {
        let store = Arc::new(SwitchableStore::default());
        let tracker = tracker_with(store.clone());
        let task = TaskSnapshot::new("t-1", t0(), Priority::Standard);

        store.down.store(true, Ordering::SeqCst);
        assert_eq!(tracker.insert(task.clone()).await.unwrap_err().kind(), "persistence");
        assert!(tracker.get("t-1").await.is_none());

        store.down.store(false, Ordering::SeqCst);
        assert_eq!(tracker.insert(task.clone()).await.unwrap(), task);
    }

    #[tokio::test]
    async fn revert_restores_memory_and_store() {
        let store = Arc::new(MemoryTaskStore::new());
        let tracker = tracker_with(store.clone());
        let task = TaskSnapshot::new("t-1", t0(), Priority::Important);
        tracker.insert(task.clone()).await.unwrap();

        let mut guard = tracker.lock("t-1").await.unwrap();
        guard
            .mark_terminal(TaskStatus::Rescheduled, t0() + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(store.get("t-1").unwrap().status, TaskStatus::Rescheduled);

        guard.revert(task.clone()).await;
        drop(guard);
        assert_eq!(tracker.get("t-1").await, Some(task.clone()));
        assert_eq!(store.get("t-1"), Some(task));
    }

    #[tokio::test]
    async fn revert_restores_memory_even_when_store_is_down() {
        let store = Arc::new(SwitchableStore::default());
        let tracker = tracker_with(store.clone());
        let task = TaskSnapshot::new("t-1", t0(), Priority::Important);
        tracker.insert(task.clone()).await.unwrap();

        let mut guard = tracker.lock("t-1").await.unwrap();
        guard
            .mark_terminal(TaskStatus::Rescheduled, t0() + Duration::seconds(30))
            .await
            .unwrap();
        store.down.store(true, Ordering::SeqCst);
        guard.revert(task.clone()).await;
        drop(guard);

        assert_eq!(tracker.get("t-1").await, Some(task));
        store.down.store(false, Ordering::SeqCst);
        let sent = tracker
            .mark_sent("t-1", Channel::Push, t0() + Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(store.inner.get("t-1"), Some(sent));
    }

    #[tokio::test]
    async fn mark_sent_persists_and_advances() {
        let store = Arc::new(MemoryTaskStore::new());
        let tracker = tracker_with(store.clone());
        tracker
            .upsert(TaskSnapshot::new("t-1", t0(), Priority::MustNotMiss))
            .await
            .unwrap();

        let updated = tracker.mark_sent("t-1", Channel::Push, t0()).await.unwrap();
        assert_eq!(updated.status, TaskStatus::PushSent);
        assert_eq!(store.get("t-1").unwrap().push_sent_at, Some(t0()));
    }

    #[tokio::test]
    async fn mark_sent_out_of_order_is_invalid_transition() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        tracker
            .upsert(TaskSnapshot::new("t-1", t0(), Priority::MustNotMiss))
            .await
            .unwrap();
        let err = tracker
            .mark_sent("t-1", Channel::Call, t0())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn mark_terminal_twice_is_rejected() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        tracker
            .upsert(TaskSnapshot::new("t-1", t0(), Priority::Important))
            .await
            .unwrap();
        tracker
            .mark_terminal("t-1", TaskStatus::Acknowledged, t0())
            .await
            .unwrap();
        let err = tracker
            .mark_terminal("t-1", TaskStatus::Acknowledged, t0())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn unknown_task_is_reported() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        let err = tracker
            .mark_sent("missing", Channel::Push, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTask(ref id) if id == "missing"));
        assert!(matches!(tracker.try_lock("missing"), LockAttempt::Unknown));
    }

    #[tokio::test]
    async fn failed_flush_rolls_back_and_counts_attempts() {
        let store = Arc::new(SwitchableStore::default());
        let tracker = tracker_with(store.clone());
        tracker
            .upsert(TaskSnapshot::new("t-1", t0(), Priority::Important))
            .await
            .unwrap();

        store.down.store(true, Ordering::SeqCst);
        for expected in 1..=2 {
            let err = tracker
                .mark_sent("t-1", Channel::Push, t0())
                .await
                .unwrap_err();
            match err {
                EngineError::Persistence { attempts, .. } => assert_eq!(attempts, expected),
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(tracker.get("t-1").await.unwrap().status, TaskStatus::Pending);
        }

        store.down.store(false, Ordering::SeqCst);
        let ok = tracker.mark_sent("t-1", Channel::Push, t0()).await.unwrap();
        assert_eq!(ok.status, TaskStatus::PushSent);
        let guard = tracker.lock("t-1").await.unwrap();
        assert_eq!(guard.persist_failures(), 0);
    }

    #[tokio::test]
    async fn failed_first_upsert_leaves_task_unknown() {
        let store = Arc::new(SwitchableStore::default());
        store.down.store(true, Ordering::SeqCst);
        let tracker = tracker_with(store);

        let err = tracker
            .upsert(TaskSnapshot::new("t-1", t0(), Priority::Standard))
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(tracker.get("t-1").await.is_none());
        assert!(matches!(tracker.try_lock("t-1"), LockAttempt::Unknown));
        assert_eq!(tracker.prune_terminal(t0()), 1);
    }

    #[tokio::test]
    async fn try_lock_reports_busy_while_held() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        tracker
            .upsert(TaskSnapshot::new("t-1", t0(), Priority::Important))
            .await
            .unwrap();

        let held = tracker.lock("t-1").await.unwrap();
        assert!(matches!(tracker.try_lock("t-1"), LockAttempt::Busy));
        drop(held);
        assert!(matches!(tracker.try_lock("t-1"), LockAttempt::Acquired(_)));
    }

    #[tokio::test]
    async fn rehydrate_and_reconcile_adopt_only_new_tasks() {
        let store = Arc::new(MemoryTaskStore::with_tasks(vec![TaskSnapshot::new(
            "t-1",
            t0(),
            Priority::Important,
        )]));
        let tracker = tracker_with(store.clone());
        assert_eq!(tracker.rehydrate().await.unwrap(), 1);

        tracker.mark_sent("t-1", Channel::Push, t0()).await.unwrap();
        store
            .save(&TaskSnapshot::new("t-2", t0(), Priority::Standard))
            .await
            .unwrap();

        assert_eq!(tracker.reconcile().await.unwrap(), 1);
        assert_eq!(tracker.len(), 2);
        // in-memory progress survives reconcile
        assert_eq!(tracker.get("t-1").await.unwrap().status, TaskStatus::PushSent);
    }

    #[tokio::test]
    async fn prune_drops_only_old_terminal_tasks() {
        let tracker = tracker_with(Arc::new(MemoryTaskStore::new()));
        for id in ["old", "recent", "active"] {
            tracker
                .upsert(TaskSnapshot::new(id, t0(), Priority::Important))
                .await
                .unwrap();
        }
        tracker
            .mark_terminal("old", TaskStatus::Cancelled, t0())
            .await
            .unwrap();
        tracker
            .mark_terminal("recent", TaskStatus::Acknowledged, t0() + Duration::hours(2))
            .await
            .unwrap();

        let pruned = tracker.prune_terminal(t0() + Duration::hours(1));
        assert_eq!(pruned, 1);
        assert!(tracker.get("old").await.is_none());
        assert!(tracker.get("recent").await.is_some());
        assert!(tracker.get("active").await.is_some());
    }
}
