//! Host collaborators for a Linux single-board computer.
//!
//! Signals come from a data-ready flag file and a charger pin or sysfs
//! power-supply attribute. Refresh and sleep are delegated to commands.

pub mod command;
pub mod gpio;

pub use command::{CommandRefresher, CommandSleep, HostError, LogOnly};
pub use gpio::ChargerPin;

use crate::config::{Config, PowerSource};
use crate::cycle::SignalSource;
use crate::decision::RawSignals;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// How external power is sensed
pub enum PowerSense {
    /// Nothing to read; power is always unavailable
    None,
    Gpio(ChargerPin),
    Sysfs(PathBuf),
}

impl PowerSense {
    /// Set up power sensing from configuration.
    ///
    /// A charger pin that cannot be claimed degrades to [`PowerSense::None`]
    /// so the device still sleeps on schedule.
    pub fn from_config(source: &PowerSource) -> Self {
        match source {
            PowerSource::None => PowerSense::None,
            PowerSource::Gpio { pin, active_low } => match ChargerPin::new(*pin, *active_low) {
                Ok(charger) => PowerSense::Gpio(charger),
                Err(e) => {
                    tracing::warn!("Charger pin unavailable ({}), assuming battery", e);
                    PowerSense::None
                }
            },
            PowerSource::Sysfs { path } => PowerSense::Sysfs(PathBuf::from(path)),
        }
    }

    fn read(&self) -> Option<bool> {
        match self {
            PowerSense::None => None,
            PowerSense::Gpio(charger) => Some(charger.power_present()),
            PowerSense::Sysfs(path) => read_sysfs_flag(path),
        }
    }
}

/// [`SignalSource`] reading the device's files and pins
pub struct HostSignals {
    data_ready_path: PathBuf,
    power: PowerSense,
}

impl HostSignals {
    pub fn new<P: Into<PathBuf>>(data_ready_path: P, power: PowerSense) -> Self {
        Self {
            data_ready_path: data_ready_path.into(),
            power,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.data_ready_path, PowerSense::from_config(&config.power))
    }
}

impl SignalSource for HostSignals {
    fn sample(&mut self) -> RawSignals {
        let signals = RawSignals {
            data_ready: read_data_ready(&self.data_ready_path),
            power_present: self.power.read(),
        };
        tracing::debug!(
            "Sampled data_ready={:?} power_present={:?}",
            signals.data_ready,
            signals.power_present
        );
        signals
    }
}

/// Parse a textual boolean flag
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Data-ready flag file.
///
/// A missing file means no data; an empty file (`touch`) means ready.
fn read_data_ready(path: &Path) -> Option<bool> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Some(true),
        Ok(content) => parse_flag(&content),
        Err(e) if e.kind() == ErrorKind::NotFound => Some(false),
        Err(e) => {
            tracing::debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

fn read_sysfs_flag(path: &Path) -> Option<bool> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_flag(&content),
        Err(e) => {
            tracing::debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        assert_eq!(parse_flag("1\n"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn data_ready_file_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data-ready");

        assert_eq!(read_data_ready(&path), Some(false));

        std::fs::write(&path, "").unwrap();
        assert_eq!(read_data_ready(&path), Some(true));

        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(read_data_ready(&path), Some(false));

        std::fs::write(&path, "garbled").unwrap();
        assert_eq!(read_data_ready(&path), None);
    }

    #[test]
    fn samples_sysfs_power() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data-ready");
        let online = dir.path().join("online");
        std::fs::write(&data, "1").unwrap();
        std::fs::write(&online, "1\n").unwrap();

        let mut signals = HostSignals::new(&data, PowerSense::Sysfs(online.clone()));
        assert_eq!(
            signals.sample(),
            RawSignals {
                data_ready: Some(true),
                power_present: Some(true),
            }
        );

        std::fs::remove_file(&online).unwrap();
        assert_eq!(signals.sample().power_present, None);
    }

    #[test]
    fn no_power_sensor_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut signals = HostSignals::new(dir.path().join("data-ready"), PowerSense::None);
        assert_eq!(
            signals.sample(),
            RawSignals {
                data_ready: Some(false),
                power_present: None,
            }
        );
    }
}
