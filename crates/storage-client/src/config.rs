//! Loads the data/metadata server lists, per-server connection limit,
//! chunk size and default distribution from a TOML file, with
//! `JSC_`-prefixed environment variables taking precedence over whatever
//! the file says.

use std::path::Path;

use distribution::DistributionPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
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

    #[error("invalid environment override {key}={value}: {reason}")]
    Env { key: String, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bare hostnames, no port: the wire protocol's port is fixed and is
    /// appended by the connection pool itself.
    pub data_servers: Vec<String>,
    pub metadata_servers: Vec<String>,
    /// Connections allowed per server; 0 means "use the CPU count".
    pub max_connections: u32,
    /// Default distribution chunk size, `B`.
    pub block_size: u64,
    pub default_distribution: DistributionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_servers: vec!["127.0.0.1".to_string()],
            metadata_servers: vec!["127.0.0.1".to_string()],
            max_connections: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            default_distribution: DistributionPolicy::round_robin(DEFAULT_BLOCK_SIZE),
        }
    }
}

impl Config {
    /// Loads a TOML config file, then applies any `JSC_*` environment
    /// overrides on top of it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Starts from [`Config::default`] and applies `JSC_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("JSC_MAX_CONNECTIONS") {
            self.max_connections = parse_env("JSC_MAX_CONNECTIONS", &value)?;
        }
        if let Ok(value) = std::env::var("JSC_BLOCK_SIZE") {
            self.block_size = parse_env("JSC_BLOCK_SIZE", &value)?;
        }
        if let Ok(value) = std::env::var("JSC_DATA_SERVERS") {
            self.data_servers = split_server_list(&value);
        }
        if let Ok(value) = std::env::var("JSC_METADATA_SERVERS") {
            self.metadata_servers = split_server_list(&value);
        }
        Ok(())
    }

    /// Resolves `max_connections == 0` to the machine's available
    /// parallelism, falling back to 4 if that can't be determined.
    pub fn resolved_max_connections(&self) -> usize {
        if self.max_connections == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            self.max_connections as usize
        }
    }
}

fn split_server_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).map(String::from).collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected an integer".to_string(),
    })
}
