//! The policy table: priority → ladder (+ auto-miss rule), and the pure
//! timing preview derived from it.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::Serialize;

use super::ladder::{
    scale_secs, validate_multiplier, AutoMissRule, Channel, Ladder, LadderStep, Priority,
};
use crate::error::EngineResult;

/// Default auto-miss threshold, seconds after the scheduled time.
pub const DEFAULT_AUTO_MISS_AFTER_SECS: u64 = 360;

const STANDARD_STEPS: &[LadderStep] = &[LadderStep::new(Channel::Push, 0)];

const IMPORTANT_STEPS: &[LadderStep] = &[
    LadderStep::new(Channel::Push, 0),
    LadderStep::new(Channel::Messaging, 120),
];

const MUST_NOT_MISS_STEPS: &[LadderStep] = &[
    LadderStep::new(Channel::Push, 0),
    LadderStep::new(Channel::Messaging, 120),
    LadderStep::new(Channel::Call, 420),
];

#[derive(Debug, Clone)]
struct PolicyEntry {
    ladder: Ladder,
    auto_miss: Option<AutoMissRule>,
}

/// Priority → ladder mapping. Always holds an entry for every [`Priority`].
#[derive(Debug, Clone)]
pub struct PolicyTable {
    entries: BTreeMap<Priority, PolicyEntry>,
}

impl PolicyTable {
    /// The built-in ladders with the default auto-miss threshold.
    pub fn standard() -> Self {
        Self::with_auto_miss_after(DEFAULT_AUTO_MISS_AFTER_SECS)
    }

    /// Built-in ladders; `important` and `must_not_miss` auto-miss after
    /// `after_secs`.
    pub fn with_auto_miss_after(after_secs: u64) -> Self {
        let rule = Some(AutoMissRule { after_secs });
        let mut entries = BTreeMap::new();
        entries.insert(
            Priority::Standard,
            PolicyEntry {
                ladder: Ladder::from_builtin(STANDARD_STEPS),
                auto_miss: None,
            },
        );
        entries.insert(
            Priority::Important,
            PolicyEntry {
                ladder: Ladder::from_builtin(IMPORTANT_STEPS),
                auto_miss: rule,
            },
        );
        entries.insert(
            Priority::MustNotMiss,
            PolicyEntry {
                ladder: Ladder::from_builtin(MUST_NOT_MISS_STEPS),
                auto_miss: rule,
            },
        );
        Self { entries }
    }

    /// Replace one priority's ladder after validating it.
    pub fn override_ladder(
        &mut self,
        priority: Priority,
        steps: Vec<LadderStep>,
    ) -> EngineResult<()> {
        let ladder = Ladder::new(priority, steps)?;
        if let Some(entry) = self.entries.get_mut(&priority) {
            entry.ladder = ladder;
        }
        Ok(())
    }

    pub fn ladder_for(&self, priority: Priority) -> &Ladder {
        &self.entry(priority).ladder
    }

    /// String-keyed lookup for callers holding raw priority names.
    pub fn ladder_for_name(&self, priority: &str) -> EngineResult<&Ladder> {
        let priority: Priority = priority.parse()?;
        Ok(self.ladder_for(priority))
    }

    pub fn auto_miss_for(&self, priority: Priority) -> Option<AutoMissRule> {
        self.entry(priority).auto_miss
    }

    /// Elapsed time after which an unacknowledged task auto-misses, or
    /// `None` when the priority never auto-misses.
    pub fn auto_miss_deadline(&self, priority: Priority, multiplier: f64) -> Option<Duration> {
        let rule = self.auto_miss_for(priority)?;
        let base = rule
            .after_secs
            .max(self.ladder_for(priority).final_step().wait_secs);
        Some(scale_secs(base, multiplier))
    }

    /// Resolved per-step waits for `priority` at `multiplier`.
    pub fn preview(&self, priority: Priority, multiplier: f64) -> EngineResult<TimingPreview> {
        let multiplier = validate_multiplier(multiplier)?;
        let ladder = self.ladder_for(priority);

        let mut previous = Duration::zero();
        let steps = ladder
            .steps()
            .iter()
            .map(|step| {
                let cumulative = step.scaled_wait(multiplier);
                let wait = cumulative - previous;
                previous = cumulative;
                PreviewStep {
                    channel: step.channel,
                    base_wait_secs: step.wait_secs,
                    wait_secs: millis_to_secs(wait),
                    cumulative_secs: millis_to_secs(cumulative),
                }
            })
            .collect();

        Ok(TimingPreview {
            priority,
            multiplier,
            steps,
            auto_miss_after_secs: self
                .auto_miss_deadline(priority, multiplier)
                .map(millis_to_secs),
        })
    }

    /// Serializable view of the whole table.
    pub fn describe(&self) -> Vec<PolicyView> {
        self.entries
            .iter()
            .map(|(priority, entry)| PolicyView {
                priority: *priority,
                steps: entry.ladder.steps().to_vec(),
                auto_miss_after_secs: self.auto_miss_for(*priority).map(|r| r.after_secs),
            })
            .collect()
    }

    fn entry(&self, priority: Priority) -> &PolicyEntry {
        // Every constructor inserts all priorities.
        &self.entries[&priority]
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn millis_to_secs(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// One priority's policy, as exposed by the config endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyView {
    pub priority: Priority,
    pub steps: Vec<LadderStep>,
    pub auto_miss_after_secs: Option<u64>,
}

/// Result of [`PolicyTable::preview`].
#[derive(Debug, Clone, Serialize)]
pub struct TimingPreview {
    pub priority: Priority,
    pub multiplier: f64,
    pub steps: Vec<PreviewStep>,
    pub auto_miss_after_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewStep {
    pub channel: Channel,
    pub base_wait_secs: u64,
    /// Seconds after the previous step.
    pub wait_secs: f64,
    /// Seconds after the scheduled time.
    pub cumulative_secs: f64,
}
