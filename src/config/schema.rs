//! Process settings schema.
//!
//! Settings describe how this process runs (its role, listener, storage and
//! timing); the site configuration it serves lives in the backing store.
//! All types derive Serde traits for deserialization from TOML.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::DeployType;

/// Root settings for a `siteconf` process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Role of this process.
    pub mode: ConfigurationMode,

    pub deploy_type: DeployType,

    /// HTTP listener (server and empty roles).
    pub listener: ListenerConfig,

    /// Where client-role processes read the configuration from.
    pub internal_api: InternalApiConfig,

    /// Backing store of the server role.
    pub storage: StorageConfig,

    pub escape_hatch: EscapeHatchConfig,

    /// Timing of the background update loop.
    pub updates: UpdateConfig,

    pub timeouts: TimeoutConfig,

    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Role of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationMode {
    /// Owns the backing store and the write path.
    Server,
    /// Reads the configuration from a server-role process.
    #[default]
    Client,
    /// Serves `{}` and never changes.
    Empty,
}

impl ConfigurationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationMode::Server => "server",
            ConfigurationMode::Client => "client",
            ConfigurationMode::Empty => "empty",
        }
    }
}

impl fmt::Display for ConfigurationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigurationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "server" => Ok(ConfigurationMode::Server),
            "" | "client" => Ok(ConfigurationMode::Client),
            "empty" => Ok(ConfigurationMode::Empty),
            other => Err(format!("unknown configuration mode '{}'", other)),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3090").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InternalApiConfig {
    /// Base URL of the server-role process.
    pub url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for InternalApiConfig {
    fn default() -> Self {
        Self {
            url: "http://frontend-internal:3090".to_string(),
            timeout_secs: 10,
        }
    }
}

impl InternalApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the site configuration history file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/site-config-db.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EscapeHatchConfig {
    pub enabled: bool,

    /// File location; `$VAR` references are expanded. Defaults to
    /// `$HOME/site-config.json`.
    pub path: Option<String>,

    pub poll_interval_ms: u64,

    /// Wait after a failed sync before trying again.
    pub retry_delay_ms: u64,
}

impl Default for EscapeHatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            poll_interval_ms: 1000,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Upper bound of the random wait between polls, in milliseconds.
    pub max_jitter_ms: u64,

    /// Unreachable-source errors stay at debug level for this long after the last
    /// successful fetch.
    pub unreachable_grace_secs: u64,

    /// Server role only: panic when a read waits longer than this for the first
    /// configuration. Unset means 5 minutes, or 60 seconds for `dev` deploys.
    pub deadlock_timeout_secs: Option<u64>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_jitter_ms: 5000,
            unreachable_grace_secs: 15,
            deadlock_timeout_secs: None,
        }
    }
}

impl UpdateConfig {
    pub fn deadlock_timeout(&self, deploy_type: DeployType) -> Duration {
        match self.deadlock_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None if deploy_type.is_dev() => Duration::from_secs(60),
            None => Duration::from_secs(5 * 60),
        }
    }
}

/// Timeout configuration for the HTTP API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// API key for the admin routes (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
