use std::path::{Path, PathBuf};

use nudge_escalation::{Channel, ConfigError, EngineConfig};
use serde::{Deserialize, Serialize};

/// Where task records live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process memory; lost on restart
    Memory,
    /// Single JSON file
    File { path: PathBuf },
    /// Remote task data API
    Http {
        base_url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_store_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_store_timeout_secs() -> u64 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Provider webhooks per channel. A channel without a URL is log-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub push_url: Option<String>,
    pub messaging_url: Option<String>,
    pub call_url: Option<String>,
    pub api_key: Option<String>,
}

impl DispatchConfig {
    pub fn url_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Push => self.push_url.as_deref(),
            Channel::Messaging => self.messaging_url.as_deref(),
            Channel::Call => self.call_url.as_deref(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error(transparent)]
    Engine(#[from] ConfigError),
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP surface
    pub bind: String,
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            store: StoreConfig::default(),
            dispatch: DispatchConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` when given, otherwise defaults with `NUDGE_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ServerConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ServerConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::from_env_with(|name| std::env::var(name).ok())?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ServerConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Defaults overridden by whatever `lookup` returns for the `NUDGE_*`
    /// variables.
    pub fn from_env_with(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ServerConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("NUDGE_BIND") {
            config.bind = bind;
        }

        config.store = match lookup("NUDGE_STORE").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreConfig::Memory,
            Some("file") => StoreConfig::File {
                path: lookup("NUDGE_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("nudge-tasks.json")),
            },
            Some("http") => StoreConfig::Http {
                base_url: lookup("NUDGE_DATA_API_URL").ok_or(ServerConfigError::InvalidEnv {
                    name: "NUDGE_DATA_API_URL",
                    value: String::new(),
                })?,
                api_key: lookup("NUDGE_DATA_API_KEY"),
                timeout_secs: default_store_timeout_secs(),
            },
            Some(other) => {
                return Err(ServerConfigError::InvalidEnv {
                    name: "NUDGE_STORE",
                    value: other.to_string(),
                })
            }
        };

        config.dispatch = DispatchConfig {
            push_url: lookup("NUDGE_PUSH_URL"),
            messaging_url: lookup("NUDGE_MESSAGING_URL"),
            call_url: lookup("NUDGE_CALL_URL"),
            api_key: lookup("NUDGE_DISPATCH_API_KEY"),
        };

        if let Some(raw) = lookup("NUDGE_TICK_INTERVAL_SECS") {
            config.engine.tick_interval_secs = parse_env("NUDGE_TICK_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("NUDGE_AUTO_MISS_AFTER_SECS") {
            config.engine.auto_miss_after_secs = parse_env("NUDGE_AUTO_MISS_AFTER_SECS", &raw)?;
        }
        if let Some(raw) = lookup("NUDGE_SNOOZE_SECS") {
            config.engine.snooze_secs = parse_env("NUDGE_SNOOZE_SECS", &raw)?;
        }
        if let Some(raw) = lookup("NUDGE_DEFAULT_MULTIPLIER") {
            config.engine.default_multiplier = parse_env("NUDGE_DEFAULT_MULTIPLIER", &raw)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        self.engine.validate()?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ServerConfigError> {
    raw.trim().parse().map_err(|_| ServerConfigError::InvalidEnv {
        name,
        value: raw.to_string(),
    })
}
