//! Configuration for the gateway.
//!
//! The config file is JSON with three sections: `gateway` (which link to
//! use), `reconnect` (backoff and health-check tuning) and `features`. Every
//! field has a default so a missing file section means "use defaults". Values
//! are deserialized loosely here and validated by the transport selector, so
//! that a bad value produces a typed [`ConfigError`] instead of a parse error.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

/// Default meshtasticd API port.
pub const DEFAULT_TCP_PORT: i64 = 4403;

/// Environment variable naming the config file for the daemon.
pub const CONFIG_ENV: &str = "MESHGATE_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: TransportConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub features: FeatureConfig,
}

/// Which radio link to use and how to reach it.
///
/// Ports and bitrate are kept as wide integers so out-of-range values reach
/// validation intact.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// "serial" or "tcp"
    #[serde(default = "default_connection_type")]
    pub connection_type: String,

    /// Serial device path; auto-detected when absent
    #[serde(default)]
    pub port: Option<String>,

    /// meshtasticd host for TCP mode
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_tcp_port")]
    pub tcp_port: i64,

    /// Link speed reported to the host framework (bits/s)
    #[serde(default = "default_bitrate")]
    pub bitrate: i64,

    /// Serial line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connection_type: default_connection_type(),
            port: None,
            host: default_host(),
            tcp_port: default_tcp_port(),
            bitrate: default_bitrate(),
            baud_rate: default_baud_rate(),
        }
    }
}

fn default_connection_type() -> String {
    ConnectionType::Serial.to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_tcp_port() -> i64 {
    DEFAULT_TCP_PORT
}

fn default_bitrate() -> i64 {
    500
}

fn default_baud_rate() -> u32 {
    115_200
}

/// Link selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    Serial,
    Tcp,
}

/// Reconnect, health-check and timeout tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub health_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub send_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            health_interval_secs: 30,
            connect_timeout_secs: 10,
            send_timeout_ms: 5_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts_per_cycle: self.max_attempts.max(1),
            ..BackoffPolicy::default()
        }
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Optional behaviour switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Fail sends fast after repeated transmit errors
    pub circuit_breaker: bool,

    /// Inbound frames buffered between the radio and the host ingress
    pub ingress_queue_depth: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: true,
            ingress_queue_depth: 64,
        }
    }
}

impl Config {
    /// Load configuration from a specific file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parse configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
