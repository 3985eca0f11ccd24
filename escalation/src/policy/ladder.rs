//! Channels, priorities and the ladder of timed steps between them.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Delivery channel, in escalation order.
///
/// The derived ordering is the canonical escalation order: a ladder may skip
/// a channel but never lists a later channel before an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Silent push reminder
    Push,
    /// Messaging (chat/SMS) with reply keypresses
    Messaging,
    /// Outbound voice call with DTMF replies
    Call,
}

impl Channel {
    pub fn all() -> &'static [Channel] {
        &[Channel::Push, Channel::Messaging, Channel::Call]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Messaging => "messaging",
            Self::Call => "call",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority class of a task; selects the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Standard,
    Important,
    MustNotMiss,
}

impl Priority {
    pub fn all() -> &'static [Priority] {
        &[Priority::Standard, Priority::Important, Priority::MustNotMiss]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Important => "important",
            Self::MustNotMiss => "must_not_miss",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "important" => Ok(Self::Important),
            "must_not_miss" | "must-not-miss" => Ok(Self::MustNotMiss),
            _ => Err(EngineError::InvalidPriority(s.to_string())),
        }
    }
}

/// One rung of a ladder: fire `channel` once `wait_secs` have elapsed since
/// the task's scheduled time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderStep {
    pub channel: Channel,
    pub wait_secs: u64,
}

impl LadderStep {
    pub const fn new(channel: Channel, wait_secs: u64) -> Self {
        Self { channel, wait_secs }
    }

    /// Wait for this step after applying the speed multiplier.
    pub fn scaled_wait(&self, multiplier: f64) -> Duration {
        scale_secs(self.wait_secs, multiplier)
    }
}

/// Ordered steps for one priority class.
///
/// Invariants (checked by [`Ladder::new`]): at least one step, first offset
/// is 0, offsets strictly increase, channels strictly follow [`Channel`]
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ladder {
    steps: Vec<LadderStep>,
}

impl Ladder {
    pub fn new(priority: Priority, steps: Vec<LadderStep>) -> EngineResult<Self> {
        let invalid = |reason: String| EngineError::InvalidLadder {
            priority: priority.to_string(),
            reason,
        };

        let first = steps
            .first()
            .ok_or_else(|| invalid("ladder has no steps".into()))?;
        if first.wait_secs != 0 {
            return Err(invalid(format!(
                "first step must fire at offset 0, got {}s",
                first.wait_secs
            )));
        }
        for pair in steps.windows(2) {
            if pair[1].wait_secs <= pair[0].wait_secs {
                return Err(invalid(format!(
                    "offsets must strictly increase ({} at {}s follows {} at {}s)",
                    pair[1].channel, pair[1].wait_secs, pair[0].channel, pair[0].wait_secs
                )));
            }
            if pair[1].channel <= pair[0].channel {
                return Err(invalid(format!(
                    "{} cannot follow {}",
                    pair[1].channel, pair[0].channel
                )));
            }
        }

        Ok(Self { steps })
    }

    /// Built-in ladders; their invariants are asserted in the policy tests.
    pub(crate) fn from_builtin(steps: &[LadderStep]) -> Self {
        Self {
            steps: steps.to_vec(),
        }
    }

    pub fn steps(&self) -> &[LadderStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&LadderStep> {
        self.steps.get(index)
    }

    pub fn final_step(&self) -> &LadderStep {
        // Non-empty by construction.
        &self.steps[self.steps.len() - 1]
    }

    /// Position of `channel` in this ladder, if the ladder uses it.
    pub fn position(&self, channel: Channel) -> Option<usize> {
        self.steps.iter().position(|s| s.channel == channel)
    }
}

/// Terminal auto-miss rule for a priority class.
///
/// `after_secs` is measured from the scheduled time. The effective deadline
/// is never earlier than the ladder's final offset, and auto-miss only
/// applies once the final step has actually fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMissRule {
    pub after_secs: u64,
}

/// Reject multipliers that are zero, negative, NaN or infinite.
pub fn validate_multiplier(multiplier: f64) -> EngineResult<f64> {
    if multiplier.is_finite() && multiplier > 0.0 {
        Ok(multiplier)
    } else {
        Err(EngineError::InvalidMultiplier(multiplier))
    }
}

/// `base_secs / multiplier`, rounded to the millisecond.
pub fn scale_secs(base_secs: u64, multiplier: f64) -> Duration {
    let millis = (base_secs as f64 * 1000.0 / multiplier).round();
    Duration::milliseconds(millis as i64)
}
