//! Task state: snapshots, transitions, the in-memory tracker and the
//! persistence collaborator it flushes to.
//!
//! # Architecture
//!
//! ```text
//!  tick / interrupt
//!        │  lock(id)
//!        ▼
//!  StateTracker ── TaskGuard ──► with_sent / with_terminal (pure)
//!        │                              │
//!        │                              ▼
//!        │                       TaskStore::save ──► commit or roll back
//!        ▼
//!  rehydrate / reconcile ◄── TaskStore::load_active_tasks
//! ```

pub mod http_store;
pub mod store;
pub mod tracker;
pub mod transition;
pub mod types;

pub use http_store::HttpTaskStore;
pub use store::{JsonFileTaskStore, MemoryTaskStore, StoreError, StoreResult, TaskStore};
pub use tracker::{LockAttempt, SharedStateTracker, StateTracker, TaskGuard};
pub use types::{TaskId, TaskSnapshot, TaskStatus};
