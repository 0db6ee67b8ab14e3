//! # Configuration Management Module
//!
//! Loads and writes the bridge configuration. Everything here is read once at
//! startup; the resulting [`SessionConfig`] is immutable for the life of the
//! process.
//!
//! ## Configuration Structure
//!
//! - [`DeviceConfig`] - Serial port, timing and response capture
//! - [`HttpConfig`] - Listen address for the request adapter
//! - [`ColorConfig`] - Range policy for incoming channel values
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use colorlink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.device.port);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [device]
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//! read_timeout_ms = 2000
//! settle_delay_ms = 2000
//!
//! [http]
//! bind = "0.0.0.0"
//! port = 8000
//!
//! [color]
//! range_policy = "clamp"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Command line flags override file values: CLI args > Config file > Defaults

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::color::RangePolicy;
use crate::device::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Wait after opening the port before the first write (ms). Most boards
    /// reboot when the port opens.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Wait after a write before looking for a reply (ms).
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    /// Upper bound on one response drain (ms).
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
    #[serde(default = "default_max_response_lines")]
    pub max_response_lines: usize,
    /// Echo the device's reply lines back to clients.
    #[serde(default = "default_true")]
    pub capture_responses: bool,
    /// Exit at startup when the first connection attempt fails. When false
    /// (default) the bridge starts anyway and connects on the first request.
    #[serde(default)]
    pub require_device_at_startup: bool,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_response_delay_ms() -> u64 {
    100
}

fn default_drain_window_ms() -> u64 {
    500
}

fn default_max_response_lines() -> usize {
    32
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColorConfig {
    #[serde(default)]
    pub range_policy: RangePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed level; unknown names fall back to `info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl DeviceConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            response_delay: Duration::from_millis(self.response_delay_ms),
            drain_window: Duration::from_millis(self.drain_window_ms),
            max_response_lines: self.max_response_lines.max(1),
            capture_responses: self.capture_responses,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        self.device.session_config()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig {
                port: default_port().to_string(),
                baud_rate: default_baud_rate(),
                read_timeout_ms: default_read_timeout_ms(),
                settle_delay_ms: default_settle_delay_ms(),
                response_delay_ms: default_response_delay_ms(),
                drain_window_ms: default_drain_window_ms(),
                max_response_lines: default_max_response_lines(),
                capture_responses: true,
                require_device_at_startup: false,
            },
            http: HttpConfig::default(),
            color: ColorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM5"
    } else {
        "/dev/ttyACM0"
    }
}
