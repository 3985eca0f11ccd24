//! Pure snapshot transitions.
//!
//! The tracker applies these to a copy, flushes the copy, and only then
//! swaps it in; a rejected or unflushed transition leaves the original
//! untouched.

use chrono::{DateTime, Utc};

use super::types::{TaskSnapshot, TaskStatus};
use crate::error::{EngineError, EngineResult};
use crate::policy::{Channel, Ladder};

impl TaskSnapshot {
    /// Copy of `self` with `channel` marked sent at `at`.
    ///
    /// Fails with `InvalidTransition` when the task is terminal, when
    /// `channel` is not the next unfired ladder step, or when `at` precedes
    /// an earlier send.
    pub fn with_sent(
        &self,
        ladder: &Ladder,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> EngineResult<TaskSnapshot> {
        if self.is_terminal() {
            return Err(EngineError::transition(
                self.id.clone(),
                self.status,
                format!("cannot send {channel}, task is terminal"),
            ));
        }

        let (_, expected) = self.next_unfired(ladder).ok_or_else(|| {
            EngineError::transition(
                self.id.clone(),
                self.status,
                format!("cannot send {channel}, ladder exhausted"),
            )
        })?;
        if expected.channel != channel {
            return Err(EngineError::transition(
                self.id.clone(),
                self.status,
                format!("{channel} is not the next step (expected {})", expected.channel),
            ));
        }

        if let Some(last) = self.last_sent_at() {
            if at < last {
                return Err(EngineError::transition(
                    self.id.clone(),
                    self.status,
                    format!("{channel} at {at} precedes previous send at {last}"),
                ));
            }
        }

        let mut next = self.clone();
        next.set_sent_at(channel, at);
        next.status = TaskStatus::after_sending(channel);
        Ok(next)
    }

    /// Copy of `self` moved to terminal `status` at `at`.
    ///
    /// Fails with `InvalidTransition` when the task is already terminal or
    /// `status` is not a terminal status.
    pub fn with_terminal(&self, status: TaskStatus, at: DateTime<Utc>) -> EngineResult<TaskSnapshot> {
        if !status.is_terminal() {
            return Err(EngineError::transition(
                self.id.clone(),
                self.status,
                format!("{status} is not a terminal status"),
            ));
        }
        if self.is_terminal() {
            return Err(EngineError::transition(
                self.id.clone(),
                self.status,
                format!("already terminal, cannot become {status}"),
            ));
        }

        let mut next = self.clone();
        next.status = status;
        next.resolved_at = Some(at);
        Ok(next)
    }
}
