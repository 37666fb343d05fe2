//! Simulation configuration.
//!
//! Configuration can be loaded from:
//! - A file passed with `--config`
//! - `chat-sim.toml` in one of the default locations
//! - Environment variables (CHAT_SIM_*) for the defaults

use anyhow::{Context, Result};
use chatcore::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Simulated workload.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Simulated workload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated connected users.
    #[serde(default = "default_users")]
    pub users: usize,

    /// Inbox capacity per user.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Number of producer tasks.
    #[serde(default = "default_producers")]
    pub producers: usize,

    /// Delay between two messages of one producer, in milliseconds.
    #[serde(default = "default_message_interval")]
    pub message_interval_ms: u64,

    /// Every n-th message of a producer is a direct message. 0 disables them.
    #[serde(default = "default_direct_every")]
    pub direct_every: u64,

    /// How long a user stays before leaving and rejoining, in milliseconds.
    /// 0 keeps users connected for the whole run.
    #[serde(default)]
    pub session_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_users() -> usize {
    std::env::var("CHAT_SIM_USERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8)
}

fn default_inbox_capacity() -> usize {
    16
}

fn default_producers() -> usize {
    std::env::var("CHAT_SIM_PRODUCERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2)
}

fn default_message_interval() -> u64 {
    250
}

fn default_direct_every() -> u64 {
    3
}

fn default_metrics_port() -> u16 {
    std::env::var("CHAT_SIM_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090)
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: default_users(),
            inbox_capacity: default_inbox_capacity(),
            producers: default_producers(),
            message_interval_ms: default_message_interval(),
            direct_every: default_direct_every(),
            session_ms: 0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl SimulationConfig {
    /// Delay between two messages of one producer.
    #[must_use]
    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms)
    }

    /// Session length, if users cycle.
    #[must_use]
    pub fn session(&self) -> Option<Duration> {
        (self.session_ms > 0).then(|| Duration::from_millis(self.session_ms))
    }
}

impl Config {
    /// Load configuration from the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "chat-sim.toml",
            "/etc/chat-sim/chat-sim.toml",
            "~/.config/chat-sim/chat-sim.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
