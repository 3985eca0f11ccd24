//! Tick evaluation: the pure per-task [`decide`] function, the
//! [`TickEvaluator`] that applies decisions across all tasks, and the
//! [`TickLoop`] that drives it on a timer.

pub mod decision;
pub mod runner;
pub mod tick;

pub use decision::{decide, Decision};
pub use runner::TickLoop;
pub use tick::{TaskOutcome, TickEvaluator, TickReport, DEFAULT_MAX_CONCURRENCY};
