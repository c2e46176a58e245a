//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! ```toml
//! [instrument]
//! kind = "smt100"
//! port = "/dev/ttyUSB0"
//! address = 1
//!
//! [logger]
//! data_dir = "./data"
//! base_name = "smt100"
//!
//! [broadcast]
//! port = 10000
//!
//! [monitor]
//! variables = ["Count", "Moist"]
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tokio::time::Duration;

use crate::error::{LoggerError, Result};
use crate::serial::SerialSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Supported instrument drivers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Falco,
    Smt100,
}

/// Instrument connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InstrumentConfig {
    pub kind: InstrumentKind,

    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_address")]
    pub address: u8,

    /// Overrides the driver's default baud rate
    #[serde(default)]
    pub baud_rate: Option<u32>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Data file and poll cadence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_base_name")]
    pub base_name: String,

    #[serde(default = "default_extension")]
    pub extension: String,

    /// Rows buffered before they are written out
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after a failed poll
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Readings between status log lines
    #[serde(default = "default_status_interval")]
    pub status_interval: u64,
}

/// Live broadcast configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    #[serde(default = "default_broadcast_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_accept_wait_ms")]
    pub accept_wait_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Monitor client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Samples kept per variable
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Variables to track; empty tracks everything received
    #[serde(default)]
    pub variables: Vec<String>,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Diagnostic log configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiagnosticsConfig {
    /// Directory for a daily diagnostic log; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_address() -> u8 { 1 }
fn default_timeout_ms() -> u64 { 1000 }

fn default_data_dir() -> String { "./data".to_string() }
fn default_base_name() -> String { "rs485".to_string() }
fn default_extension() -> String { ".txt".to_string() }
fn default_buffer_size() -> usize { 60 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_backoff_ms() -> u64 { 5000 }
fn default_status_interval() -> u64 { 3600 }

fn default_broadcast_enabled() -> bool { true }
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 10000 }
fn default_accept_wait_ms() -> u64 { 10 }
fn default_send_timeout_ms() -> u64 { 200 }

fn default_window_size() -> usize { 1200 }
fn default_reconnect_interval_ms() -> u64 { 2000 }

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_name: default_base_name(),
            extension: default_extension(),
            buffer_size: default_buffer_size(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff_ms: default_backoff_ms(),
            status_interval: default_status_interval(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: default_broadcast_enabled(),
            host: default_host(),
            port: default_port(),
            accept_wait_ms: default_accept_wait_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            window_size: default_window_size(),
            variables: Vec::new(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl InstrumentConfig {
    /// Line settings, filling in the driver's defaults
    pub fn serial_settings(&self) -> SerialSettings {
        let parity = match self.kind {
            InstrumentKind::Falco => crate::instrument::falco::FALCO_PARITY,
            InstrumentKind::Smt100 => crate::instrument::smt100::SMT100_PARITY,
        };

        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate.unwrap_or(crate::serial::DEFAULT_BAUD_RATE),
            parity,
            slave: self.address,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

impl BroadcastConfig {
    /// Listen address, `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl MonitorConfig {
    /// Logger address, `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from a TOML file
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
    /// use rs485_logger::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(LoggerError::InvalidConfig(msg.to_string()));

        // Instrument
        if self.instrument.port.is_empty() {
            return invalid("instrument port cannot be empty");
        }

        if !(1..=247).contains(&self.instrument.address) {
            return invalid("instrument address must be between 1 and 247");
        }

        if let Some(baud) = self.instrument.baud_rate {
            if ![1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200].contains(&baud) {
                return invalid(
                    "baud_rate must be one of: 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200",
                );
            }
        }

        if self.instrument.timeout_ms == 0 || self.instrument.timeout_ms > 10000 {
            return invalid("timeout_ms must be between 1 and 10000");
        }

        // Data files
        if self.logger.data_dir.is_empty() {
            return invalid("logger data_dir cannot be empty");
        }

        if self.logger.base_name.is_empty() {
            return invalid("logger base_name cannot be empty");
        }

        if self.logger.base_name.contains(['/', '\\'])
            || self.logger.extension.contains(['/', '\\'])
        {
            return invalid("logger base_name and extension cannot contain path separators");
        }

        if self.logger.buffer_size == 0 {
            return invalid("buffer_size must be greater than 0");
        }

        if self.logger.poll_interval_ms == 0 || self.logger.poll_interval_ms > 3_600_000 {
            return invalid("poll_interval_ms must be between 1 and 3600000");
        }

        if self.logger.backoff_ms == 0 || self.logger.backoff_ms > 600_000 {
            return invalid("backoff_ms must be between 1 and 600000");
        }

        if self.logger.status_interval == 0 {
            return invalid("status_interval must be greater than 0");
        }

        // Broadcast
        if self.broadcast.enabled && self.broadcast.host.is_empty() {
            return invalid("broadcast host cannot be empty when enabled");
        }

        if self.broadcast.accept_wait_ms > 1000 {
            return invalid("accept_wait_ms must be at most 1000");
        }

        if self.broadcast.send_timeout_ms == 0 || self.broadcast.send_timeout_ms > 10000 {
            return invalid("send_timeout_ms must be between 1 and 10000");
        }

        // Monitor
        if self.monitor.window_size == 0 {
            return invalid("window_size must be greater than 0");
        }

        if self.monitor.reconnect_interval_ms == 0 || self.monitor.reconnect_interval_ms > 600_000 {
            return invalid("reconnect_interval_ms must be between 1 and 600000");
        }

        Ok(())
    }
}
