//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! tick_interval_secs = 60
//! auto_miss_after_secs = 360
//! snooze_secs = 900
//!
//! [ladder_overrides]
//! important = [
//!     { channel = "push", wait_secs = 0 },
//!     { channel = "call", wait_secs = 300 },
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::policy::{validate_multiplier, LadderStep, PolicyTable, Priority, DEFAULT_AUTO_MISS_AFTER_SECS};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Policy(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between ticks
    pub tick_interval_secs: u64,
    /// Tasks evaluated concurrently within one tick
    pub max_concurrent_evaluations: usize,
    /// Longest a single delivery may take before it counts as failed
    pub dispatch_timeout_secs: u64,
    /// Auto-miss threshold from the scheduled time, before scaling
    pub auto_miss_after_secs: u64,
    /// Reschedule offset for snooze replies without an explicit time
    pub snooze_secs: u64,
    /// Reconcile with the store every N ticks (0 disables)
    pub reconcile_every_ticks: u32,
    /// How long resolved tasks stay in memory
    pub terminal_retention_secs: u64,
    /// Multiplier for tasks registered without one
    pub default_multiplier: f64,
    /// Replacement ladders, keyed by priority name
    pub ladder_overrides: BTreeMap<String, Vec<LadderStep>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            max_concurrent_evaluations: 32,
            dispatch_timeout_secs: 10,
            auto_miss_after_secs: DEFAULT_AUTO_MISS_AFTER_SECS,
            snooze_secs: 900,
            reconcile_every_ticks: 5,
            terminal_retention_secs: 86_400,
            default_multiplier: 1.0,
            ladder_overrides: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check every field, including the ladder overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tick_interval_secs must be positive".into()));
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_evaluations must be positive".into(),
            ));
        }
        if self.dispatch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("dispatch_timeout_secs must be positive".into()));
        }
        if self.snooze_secs == 0 {
            return Err(ConfigError::Invalid("snooze_secs must be positive".into()));
        }
        validate_multiplier(self.default_multiplier)?;
        self.build_policy()?;
        Ok(())
    }

    /// Policy table with this config's auto-miss threshold and overrides.
    pub fn build_policy(&self) -> Result<PolicyTable, EngineError> {
        let mut table = PolicyTable::with_auto_miss_after(self.auto_miss_after_secs);
        for (name, steps) in &self.ladder_overrides {
            let priority: Priority = name.parse()?;
            table.override_ladder(priority, steps.clone())?;
        }
        Ok(table)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn snooze(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.snooze_secs as i64)
    }

    pub fn terminal_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.terminal_retention_secs as i64)
    }
}
