//! Configuration management for herakles-vm-collector.
//!
//! This module handles loading and validating configuration from files.
//! It supports YAML, JSON, and TOML formats. CLI overrides are applied
//! by the binary on top of the loaded file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::collector::CollectorSettings;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_DATA_LENGTH: usize = 100;
pub const DEFAULT_LOCAL_DATA_DIRECTORY: &str = "/var/lib/herakles/vms";
pub const DEFAULT_SQL_CONNECTION: &str = "/var/lib/herakles/usage.db";
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Collection
    /// Seconds between two collection cycles
    #[serde(alias = "data-collector-interval")]
    pub data_collector_interval: Option<u64>,
    /// Maximum samples retained per VM, locally and on backfill
    #[serde(alias = "data-length")]
    pub data_length: Option<usize>,
    /// Directory holding one rolling history file per VM
    #[serde(alias = "local-data-directory")]
    pub local_data_directory: Option<PathBuf>,
    /// Remote usage store (path, sqlite://path or :memory:)
    #[serde(alias = "sql-connection")]
    pub sql_connection: Option<String>,

    // Hypervisor
    /// procfs mount used to discover QEMU guests
    #[serde(alias = "proc-root")]
    pub proc_root: Option<PathBuf>,
    /// Per-core MHz override for hosts whose cpuinfo lacks "cpu MHz"
    #[serde(alias = "host-cpu-mhz")]
    pub host_cpu_mhz: Option<u64>,

    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    #[serde(alias = "enable-http")]
    pub enable_http: Option<bool>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_collector_interval: Some(DEFAULT_INTERVAL_SECONDS),
            data_length: Some(DEFAULT_DATA_LENGTH),
            local_data_directory: Some(PathBuf::from(DEFAULT_LOCAL_DATA_DIRECTORY)),
            sql_connection: Some(DEFAULT_SQL_CONNECTION.to_string()),
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            host_cpu_mhz: None,
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            enable_http: Some(true),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            self.data_collector_interval
                .unwrap_or(DEFAULT_INTERVAL_SECONDS),
        )
    }

    pub fn data_length(&self) -> usize {
        self.data_length.unwrap_or(DEFAULT_DATA_LENGTH)
    }

    pub fn local_data_directory(&self) -> PathBuf {
        self.local_data_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DATA_DIRECTORY))
    }

    pub fn sql_connection(&self) -> &str {
        self.sql_connection
            .as_deref()
            .unwrap_or(DEFAULT_SQL_CONNECTION)
    }

    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT))
    }

    /// Values the cycle orchestrator consumes.
    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            data_length: self.data_length(),
            local_data_directory: self.local_data_directory(),
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.data_collector_interval == Some(0) {
        return Err(ConfigError::Invalid(
            "data_collector_interval must be at least 1 second".into(),
        ));
    }

    if cfg
        .local_data_directory
        .as_ref()
        .is_some_and(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::Invalid(
            "local_data_directory must not be empty".into(),
        ));
    }

    if cfg
        .sql_connection
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "sql_connection must not be empty".into(),
        ));
    }

    if cfg.host_cpu_mhz == Some(0) {
        return Err(ConfigError::Invalid(
            "host_cpu_mhz override must be greater than 0".into(),
        ));
    }

    if cfg.enable_http.unwrap_or(true) && cfg.port == Some(0) {
        return Err(ConfigError::Invalid(
            "port must be greater than 0 when the HTTP server is enabled".into(),
        ));
    }

    Ok(())
}

/// Enhanced configuration loading with multiple format support
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/herakles/vm-collector.yaml",
            "/etc/herakles/vm-collector.yml",
            "/etc/herakles/vm-collector.json",
            "./herakles-vm-collector.yaml",
            "./herakles-vm-collector.yml",
            "./herakles-vm-collector.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_default()
    };

    if path.as_os_str().is_empty() || !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;

    let parse_err = |message: String| ConfigError::Parse {
        path: path.clone(),
        message,
    };

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        // Default to YAML
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
    };

    info!("Loaded configuration from: {}", path.display());
    Ok(config.with_defaults())
}

impl Config {
    /// Fills every unset field with its default value.
    pub fn with_defaults(self) -> Self {
        let d = Config::default();
        Self {
            data_collector_interval: self.data_collector_interval.or(d.data_collector_interval),
            data_length: self.data_length.or(d.data_length),
            local_data_directory: self.local_data_directory.or(d.local_data_directory),
            sql_connection: self.sql_connection.or(d.sql_connection),
            proc_root: self.proc_root.or(d.proc_root),
            host_cpu_mhz: self.host_cpu_mhz.or(d.host_cpu_mhz),
            port: self.port.or(d.port),
            bind: self.bind.or(d.bind),
            enable_http: self.enable_http.or(d.enable_http),
            log_level: self.log_level.or(d.log_level),
        }
    }
}
