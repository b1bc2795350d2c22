//! Connection and protocol configuration for a Quantum wheel.
//!
//! Configuration is stored as JSON. Every field has a default, so an empty
//! object `{}` is a valid configuration for a wheel on `/dev/ttyACM0`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serial device the wheel enumerates as when plugged in over USB.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";

/// Default serial line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Number of filter slots on the reference wheel.
pub const DEFAULT_FILTER_COUNT: u8 = 7;

/// Largest wheel the single-digit wire position can address.
pub const MAX_FILTER_COUNT: u8 = 10;

/// Timeout for one reply line.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Most settings a customized wheel exposes.
pub const DEFAULT_MAX_SETTINGS: usize = 5;

/// Errors loading or validating a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How to reach the wheel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// Local serial port (USB CDC).
    Serial {
        #[serde(default = "default_port")]
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// Serial-over-TCP bridge, `host:port`.
    Tcp { address: String },
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::Serial {
            port: default_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionConfig::Serial { port, baud_rate } => write!(f, "{port} @ {baud_rate} baud"),
            ConnectionConfig::Tcp { address } => write!(f, "tcp://{address}"),
        }
    }
}

fn default_port() -> String {
    DEFAULT_SERIAL_PORT.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Wheel driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    pub connection: ConnectionConfig,

    /// Number of addressable filter slots (N).
    pub filter_count: u8,

    /// Ceiling on settings enumerated during discovery.
    pub max_settings: usize,

    /// Timeout for each individual line read, in seconds.
    pub read_timeout_secs: f64,

    /// Sleep between move-completion reads, in milliseconds.
    pub poll_interval_ms: u64,

    /// Overall bound on a move, in seconds.
    ///
    /// Absent by default: the wheel is polled until it confirms the move or
    /// a single read fails.
    pub move_deadline_secs: Option<f64>,

    /// Start with all I/O bypassed.
    pub simulation: bool,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            filter_count: DEFAULT_FILTER_COUNT,
            max_settings: DEFAULT_MAX_SETTINGS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs_f64(),
            poll_interval_ms: 100,
            move_deadline_secs: None,
            simulation: false,
        }
    }
}

impl WheelConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter_count == 0 || self.filter_count > MAX_FILTER_COUNT {
            return Err(ConfigError::Invalid(format!(
                "filter_count must be 1-{MAX_FILTER_COUNT}, got {}",
                self.filter_count
            )));
        }
        if !is_positive_duration(self.read_timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "read_timeout_secs must be positive, got {}",
                self.read_timeout_secs
            )));
        }
        if let Some(deadline) = self.move_deadline_secs {
            if !is_positive_duration(deadline) {
                return Err(ConfigError::Invalid(format!(
                    "move_deadline_secs must be positive, got {deadline}"
                )));
            }
        }
        if let ConnectionConfig::Tcp { address } = &self.connection {
            if address.is_empty() {
                return Err(ConfigError::Invalid("tcp address is empty".to_string()));
            }
        }
        Ok(())
    }

    /// Per-read timeout. Values that cannot be a duration fall back to
    /// [`DEFAULT_READ_TIMEOUT`]; [`validate`](Self::validate) rejects them.
    pub fn read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.read_timeout_secs).unwrap_or(DEFAULT_READ_TIMEOUT)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn move_deadline(&self) -> Option<Duration> {
        self.move_deadline_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

fn is_positive_duration(secs: f64) -> bool {
    secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}
