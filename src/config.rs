//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PmdError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub ecg: EcgConfig,
    #[serde(default)]
    pub acc: AccConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sensor discovery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Connect to this address instead of matching by name
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_scan_timeout_s")]
    pub scan_timeout_s: u64,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,
}

/// Control point configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_control_timeout_ms")]
    pub timeout_ms: u64,
}

/// ECG stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EcgConfig {
    #[serde(default = "default_ecg_enabled")]
    pub enabled: bool,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: usize,
}

/// Accelerometer stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AccConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_acc_sample_rate_hz")]
    pub sample_rate_hz: u16,

    #[serde(default = "default_acc_range_g")]
    pub range_g: u16,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily log files here
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_name_prefix() -> String { "Polar H10".to_string() }
fn default_scan_timeout_s() -> u64 { 15 }
fn default_connect_timeout_s() -> u64 { 10 }

fn default_control_timeout_ms() -> u64 { 1000 }

fn default_ecg_enabled() -> bool { true }
fn default_window_seconds() -> usize { 3 }

fn default_acc_sample_rate_hz() -> u16 { 50 }
fn default_acc_range_g() -> u16 { 8 }

fn default_log_level() -> String { "info".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            address: None,
            scan_timeout_s: default_scan_timeout_s(),
            connect_timeout_s: default_connect_timeout_s(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { timeout_ms: default_control_timeout_ms() }
    }
}

impl Default for EcgConfig {
    fn default() -> Self {
        Self {
            enabled: default_ecg_enabled(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Default for AccConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate_hz: default_acc_sample_rate_hz(),
            range_g: default_acc_range_g(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

impl ControlConfig {
    /// Control point response deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields take their defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use polar_pmd::config::Config;
    ///
    /// let config = Config::load("polar.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.device.name_prefix.is_empty() && self.device.address.is_none() {
            return Err(PmdError::Config(
                toml::de::Error::custom("device name_prefix cannot be empty without an address")
            ));
        }

        if self.device.scan_timeout_s == 0 || self.device.scan_timeout_s > 300 {
            return Err(PmdError::Config(
                toml::de::Error::custom("scan_timeout_s must be between 1 and 300")
            ));
        }

        if self.device.connect_timeout_s == 0 || self.device.connect_timeout_s > 60 {
            return Err(PmdError::Config(
                toml::de::Error::custom("connect_timeout_s must be between 1 and 60")
            ));
        }

        if self.control.timeout_ms == 0 || self.control.timeout_ms > 10000 {
            return Err(PmdError::Config(
                toml::de::Error::custom("control timeout_ms must be between 1 and 10000")
            ));
        }

        if self.ecg.window_seconds == 0 || self.ecg.window_seconds > 60 {
            return Err(PmdError::Config(
                toml::de::Error::custom("ecg window_seconds must be between 1 and 60")
            ));
        }

        if ![25, 50, 100, 200].contains(&self.acc.sample_rate_hz) {
            return Err(PmdError::Config(
                toml::de::Error::custom("acc sample_rate_hz must be one of: 25, 50, 100, 200")
            ));
        }

        if ![2, 4, 8].contains(&self.acc.range_g) {
            return Err(PmdError::Config(
                toml::de::Error::custom("acc range_g must be one of: 2, 4, 8")
            ));
        }

        if !self.ecg.enabled && !self.acc.enabled {
            return Err(PmdError::Config(
                toml::de::Error::custom("at least one of ecg or acc must be enabled")
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(PmdError::Config(
                toml::de::Error::custom(format!("unknown log level: {}", self.logging.level))
            ));
        }

        Ok(())
    }
}
