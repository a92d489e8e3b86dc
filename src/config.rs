//! Runtime configuration.
//!
//! A [`ConnectionManager`](crate::manager::ConnectionManager) is configured from a single
//! [`RuntimeConfig`], typically loaded from a TOML file whose path is passed on the command line,
//! mirroring the configuration-file convention this crate's ambient stack is built from.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("ttl_seconds must be greater than zero")]
    ZeroTtl,
    #[error("metrics_namespace must not be empty")]
    EmptyNamespace,
}

/// Loads and validates a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig, ConfigError> {
    let path_str = path.as_ref().display().to_string();
    let config_str = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path_str.clone(),
        source,
    })?;
    let config: RuntimeConfig = toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
        path: path_str,
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Returns the default configuration.
///
/// For demonstration purposes: a five-minute purge TTL, no metrics namespace prefix, and `info`
/// logging.
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/// Runtime configuration options.
///
/// ## Example
/// ```toml
/// ttl_seconds = 300
/// metrics_namespace = "flow_recon"
/// log_level = "info"
///
/// [housekeeper]
///     reconcile_flow_source_interval_seconds = 5
///     invalidate_cache_interval_seconds = 30
///     purge_flows_interval_seconds = 10
///     rebuild_pairs_interval_seconds = 3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long an unreconciled or idle flow may sit in a flow table before the housekeeper purges
    /// it. Defaults to `300` (five minutes).
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Prefix applied to every metric name this crate registers. Defaults to `"flow_recon"`.
    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,

    /// Log level passed through to the embedding application's logger init. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Housekeeper tick cadences.
    #[serde(default)]
    pub housekeeper: HousekeeperConfig,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        if self.metrics_namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            ttl_seconds: default_ttl_seconds(),
            metrics_namespace: default_metrics_namespace(),
            log_level: default_log_level(),
            housekeeper: HousekeeperConfig::default(),
        }
    }
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_metrics_namespace() -> String {
    "flow_recon".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tick cadences for the housekeeper's five periodic tasks (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeeperConfig {
    #[serde(default = "default_reconcile_flow_source_interval")]
    pub reconcile_flow_source_interval_seconds: u64,
    #[serde(default = "default_invalidate_cache_interval")]
    pub invalidate_cache_interval_seconds: u64,
    #[serde(default = "default_purge_flows_interval")]
    pub purge_flows_interval_seconds: u64,
    #[serde(default = "default_rebuild_pairs_interval")]
    pub rebuild_pairs_interval_seconds: u64,
}

impl Default for HousekeeperConfig {
    fn default() -> Self {
        HousekeeperConfig {
            reconcile_flow_source_interval_seconds: default_reconcile_flow_source_interval(),
            invalidate_cache_interval_seconds: default_invalidate_cache_interval(),
            purge_flows_interval_seconds: default_purge_flows_interval(),
            rebuild_pairs_interval_seconds: default_rebuild_pairs_interval(),
        }
    }
}

fn default_reconcile_flow_source_interval() -> u64 {
    5
}

fn default_invalidate_cache_interval() -> u64 {
    30
}

fn default_purge_flows_interval() -> u64 {
    10
}

fn default_rebuild_pairs_interval() -> u64 {
    3
}
