//! Startup configuration.
//!
//! Credentials and the broadcast id come from the process environment. Tuning
//! knobs come from an optional TOML settings file; every key has a default, so
//! an absent file is equivalent to an empty one.

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const USERNAME_VAR: &str = "INSTAGRAM_USERNAME";
pub const PASSWORD_VAR: &str = "INSTAGRAM_PASSWORD";
pub const BROADCAST_VAR: &str = "BROADCAST_ID";

/// Upper bound for every poll timing value, in seconds.
pub const MAX_POLL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll: PollSettings,
    pub output: OutputSettings,
    pub receipt: ReceiptSettings,
    pub filter: FilterSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub idle_step_secs: u64,
    pub jitter_secs: f64,
    pub max_auth_failures: u32,
    /// Comment count at which a response is treated as possibly truncated.
    pub page_cap: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: 5,
            max_interval_secs: 30,
            idle_step_secs: 5,
            jitter_secs: 2.0,
            max_auth_failures: 3,
            page_cap: 50,
        }
    }
}

impl PollSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn idle_step(&self) -> Duration {
        Duration::from_secs(self.idle_step_secs)
    }

    /// Zero when `jitter_secs` is negative, NaN or too large to represent.
    pub fn jitter(&self) -> Duration {
        Duration::try_from_secs_f64(self.jitter_secs).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub orders_dir: PathBuf,
    pub receipts_dir: PathBuf,
    pub session_file: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            orders_dir: PathBuf::from("order_information"),
            receipts_dir: PathBuf::from("images"),
            session_file: PathBuf::from("session.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiptSettings {
    pub enabled: bool,
    pub print_command: String,
    /// Receipt width in characters.
    pub width: usize,
}

impl Default for ReceiptSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            print_command: "lp".to_string(),
            width: 32,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub skip_usernames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://i.instagram.com/api/v1/".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            None => Settings::default(),
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    })?;
                Self::parse(&content)?
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let poll = &self.poll;
        if poll.min_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.min_interval_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if poll.min_interval_secs > poll.max_interval_secs {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "poll.min_interval_secs ({}) exceeds poll.max_interval_secs ({})",
                    poll.min_interval_secs, poll.max_interval_secs
                ),
            });
        }
        for (field, value) in [
            ("poll.max_interval_secs", poll.max_interval_secs),
            ("poll.idle_step_secs", poll.idle_step_secs),
        ] {
            if value > MAX_POLL_SECS {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if !poll.jitter_secs.is_finite()
            || poll.jitter_secs < 0.0
            || poll.jitter_secs > MAX_POLL_SECS as f64
        {
            return Err(ConfigError::InvalidValue {
                field: "poll.jitter_secs".to_string(),
                value: poll.jitter_secs.to_string(),
            });
        }
        if poll.max_auth_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.max_auth_failures".to_string(),
                value: "0".to_string(),
            });
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "api.base_url".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub broadcast_id: Option<String>,
    pub settings: Settings,
}

impl AppConfig {
    pub fn from_env(settings: Settings) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), settings)
    }

    /// Builds the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F, settings: Settings) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                    var_name: name.to_string(),
                })
        };

        let credentials = Credentials {
            username: required(USERNAME_VAR)?,
            password: required(PASSWORD_VAR)?,
        };
        let broadcast_id = lookup(BROADCAST_VAR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            credentials,
            broadcast_id,
            settings,
        })
    }

    /// Broadcast id, required by the monitor mode.
    pub fn require_broadcast_id(&self) -> Result<&str, ConfigError> {
        self.broadcast_id
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: BROADCAST_VAR.to_string(),
            })
    }
}
