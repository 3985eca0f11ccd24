//! Escalation policy: which channels fire, in what order, and when.
//!
//! # Ladders
//!
//! ```text
//! standard       push@0
//! important      push@0 ── messaging@120s ── auto-miss@360s
//! must_not_miss  push@0 ── messaging@120s ── call@420s ── auto-miss
//! ```
//!
//! Offsets are measured from the task's scheduled time and divided by the
//! task's escalation speed multiplier. Everything here is pure; the table is
//! built once at startup and shared read-only.

pub mod ladder;
pub mod table;

pub use ladder::{
    scale_secs, validate_multiplier, AutoMissRule, Channel, Ladder, LadderStep, Priority,
};
pub use table::{PolicyTable, PolicyView, PreviewStep, TimingPreview, DEFAULT_AUTO_MISS_AFTER_SECS};
