//! Configuration management for the refresh controller.
//!
//! Handles loading, saving, and validating configuration from JSON files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/opt/epaper-refresh/config.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the external power (charger) signal comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PowerSource {
    /// No charger sensing; power always reads as unavailable
    None,
    /// Charger status pin (BCM numbering)
    Gpio {
        pin: u8,
        #[serde(default)]
        active_low: bool,
    },
    /// A power-supply `online` attribute, e.g. /sys/class/power_supply/AC/online
    Sysfs { path: String },
}

impl Default for PowerSource {
    fn default() -> Self {
        PowerSource::Sysfs {
            path: "/sys/class/power_supply/AC/online".to_string(),
        }
    }
}

/// Delays used by the wake cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Pause between re-checks while waiting for data (seconds, below one minute)
    #[serde(default = "default_wait_retry_secs")]
    pub wait_retry_secs: u64,

    /// Re-checks allowed while waiting for data before giving up and sleeping
    #[serde(default = "default_max_wait_retries")]
    pub max_wait_retries: u32,

    /// Interval between refreshes while on external power (seconds)
    #[serde(default = "default_stay_awake_secs")]
    pub stay_awake_secs: u64,

    /// Settle time between the last refresh and sleep entry (seconds)
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

fn default_wait_retry_secs() -> u64 {
    10
}

fn default_max_wait_retries() -> u32 {
    30
}

fn default_stay_awake_secs() -> u64 {
    120
}

fn default_settle_secs() -> u64 {
    15
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            wait_retry_secs: default_wait_retry_secs(),
            max_wait_retries: default_max_wait_retries(),
            stay_awake_secs: default_stay_awake_secs(),
            settle_secs: default_settle_secs(),
        }
    }
}

impl TimingConfig {
    pub fn wait_retry(&self) -> Duration {
        Duration::from_secs(self.wait_retry_secs)
    }

    pub fn stay_awake(&self) -> Duration {
        Duration::from_secs(self.stay_awake_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Validate timing values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..60).contains(&self.wait_retry_secs) {
            return Err(ConfigError::ValidationError(format!(
                "wait_retry_secs {} must be between 1 and 59",
                self.wait_retry_secs
            )));
        }

        if self.max_wait_retries == 0 {
            return Err(ConfigError::ValidationError(
                "max_wait_retries must be at least 1".to_string(),
            ));
        }

        if self.stay_awake_secs == 0 || self.stay_awake_secs > 3600 {
            return Err(ConfigError::ValidationError(format!(
                "stay_awake_secs {} must be between 1 and 3600",
                self.stay_awake_secs
            )));
        }

        // The panel must never lose power mid-update
        if self.settle_secs == 0 {
            return Err(ConfigError::ValidationError(
                "settle_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_data_ready_path() -> String {
    "/run/epaper-refresh/data-ready".to_string()
}

fn default_retained_path() -> String {
    "/var/lib/epaper-refresh/retained.json".to_string()
}

fn default_refresh_command() -> Vec<String> {
    vec!["/opt/epaper-refresh/bin/refresh-panel".to_string()]
}

fn default_sleep_command() -> Vec<String> {
    vec![
        "rtcwake".to_string(),
        "-m".to_string(),
        "mem".to_string(),
        "-s".to_string(),
        "900".to_string(),
    ]
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Flag file signalling that new content is ready to render
    #[serde(default = "default_data_ready_path")]
    pub data_ready_path: String,

    /// External power sensing
    #[serde(default)]
    pub power: PowerSource,

    /// Command that pushes the latest rendered frame to the panel
    #[serde(default = "default_refresh_command")]
    pub refresh_command: Vec<String>,

    /// Command that suspends the device until the next wake
    #[serde(default = "default_sleep_command")]
    pub sleep_command: Vec<String>,

    /// File holding the retained decision code
    #[serde(default = "default_retained_path")]
    pub retained_path: String,

    #[serde(default)]
    pub timing: TimingConfig,

    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_ready_path: default_data_ready_path(),
            power: PowerSource::default(),
            refresh_command: default_refresh_command(),
            sleep_command: default_sleep_command(),
            retained_path: default_retained_path(),
            timing: TimingConfig::default(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file atomically
    ///
    /// Writes to a temporary file and renames it over the target so a power
    /// cut never leaves a half-written file behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;

        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ConfigError::ReadError(e)
        })?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;

        if self.data_ready_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "data_ready_path cannot be empty".to_string(),
            ));
        }

        if self.retained_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "retained_path cannot be empty".to_string(),
            ));
        }

        if command_is_empty(&self.refresh_command) {
            return Err(ConfigError::ValidationError(
                "refresh_command must name a program".to_string(),
            ));
        }

        if command_is_empty(&self.sleep_command) {
            return Err(ConfigError::ValidationError(
                "sleep_command must name a program".to_string(),
            ));
        }

        match &self.power {
            PowerSource::Gpio { pin, .. } if *pin > 27 => {
                return Err(ConfigError::ValidationError(format!(
                    "GPIO pin {} out of range (0-27)",
                    pin
                )));
            }
            PowerSource::Sysfs { path } if path.trim().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "power sysfs path cannot be empty".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

fn command_is_empty(argv: &[String]) -> bool {
    argv.first().is_none_or(|program| program.trim().is_empty())
}
