//! Process configuration.
//!
//! Loaded from --config, .joinkeeper.yml or ~/.config/joinkeeper/joinkeeper.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::BackoffParams;
use crate::channel::ChannelIdentity;
use crate::error::ConfigError;
use crate::reconciler::ReconcilerSettings;

/// Configuration for joinkeeper.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Identity the server knows us by.
    pub nick: String,

    /// Channels to keep joined from startup.
    pub channels: Vec<ChannelIdentity>,

    /// Join confirmation settings.
    pub join: JoinConfig,

    /// Retry pacing.
    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nick: super::DEFAULT_NICK.to_string(),
            channels: Vec::new(),
            join: JoinConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration tracking `channels` (no passwords).
    pub fn with_channels(nick: &str, channels: &[&str]) -> Self {
        Self {
            nick: nick.to_string(),
            channels: channels.iter().map(|name| ChannelIdentity::new(*name)).collect(),
            ..Default::default()
        }
    }

    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .joinkeeper.yml in current directory
    /// 3. ~/.config/joinkeeper/joinkeeper.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(super::PROJECT_CONFIG_FILE);
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from {}", project_config.display());
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", project_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("joinkeeper").join("joinkeeper.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.nick.trim().is_empty() {
            return Err(ConfigError::EmptyNick);
        }

        let mut seen = HashSet::new();
        for (index, channel) in self.channels.iter().enumerate() {
            if channel.name.trim().is_empty() {
                return Err(ConfigError::EmptyChannelName(index));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::DuplicateChannel(channel.name.clone()));
            }
        }

        if self.join.wait_secs == 0 {
            return Err(ConfigError::ZeroJoinWait);
        }
        self.backoff.validate()
    }

    /// Timing settings for the reconciler.
    pub fn settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            join_wait: Duration::from_secs(self.join.wait_secs),
            backoff: self.backoff.params(),
        }
    }
}

/// Join confirmation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Seconds to wait for a JOIN confirmation before retrying.
    #[serde(rename = "wait-secs")]
    pub wait_secs: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self { wait_secs: 10 }
    }
}

/// Retry pacing between join attempts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First (and floor) delay in milliseconds.
    #[serde(rename = "initial-ms")]
    pub initial_ms: u64,

    /// Ceiling for a single delay in seconds.
    #[serde(rename = "max-secs")]
    pub max_secs: u64,

    /// Calm period in seconds after which the delay resets to the floor.
    #[serde(rename = "reset-after-secs")]
    pub reset_after_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1000,
            max_secs: 300,
            reset_after_secs: 1800,
        }
    }
}

impl BackoffConfig {
    pub fn params(&self) -> BackoffParams {
        BackoffParams::new(
            Duration::from_secs(self.max_secs),
            Duration::from_secs(self.reset_after_secs),
            Duration::from_millis(self.initial_ms),
        )
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.initial_ms == 0 {
            return Err(ConfigError::InvalidBackoff("initial-ms must be > 0".to_string()));
        }
        if self.max_secs == 0 {
            return Err(ConfigError::InvalidBackoff("max-secs must be > 0".to_string()));
        }
        if self.initial_ms > self.max_secs.saturating_mul(1000) {
            return Err(ConfigError::InvalidBackoff("initial delay exceeds maximum".to_string()));
        }
        Ok(())
    }
}
