//! Server configuration: an optional TOML file, then `BITSERVE_*`
//! environment overrides, then command-line flags.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub address: SocketAddr,
    pub base_url: String,
    pub static_root: PathBuf,
    /// JSON catalog of episodes, collections and plans; an empty catalog
    /// when unset.
    pub catalog_path: Option<PathBuf>,
    /// Asset manifest mapping public names to hashed file names.
    pub asset_manifest: Option<PathBuf>,
    /// File the in-memory tables are restored from at startup and saved to
    /// on shutdown. Without it, users and sessions last one run.
    pub data_path: Option<PathBuf>,
    pub log_filter: String,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub task_timeout_ms: Option<u64>,
    pub github_client_id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: "http://localhost:8080".into(),
            static_root: PathBuf::from("static"),
            catalog_path: None,
            asset_manifest: None,
            data_path: None,
            log_filter: "info".into(),
            max_connections: 16,
            acquire_timeout_ms: 5_000,
            task_timeout_ms: Some(30_000),
            github_client_id: String::new(),
        }
    }
}

impl SiteConfig {
    /// Read `path`, or fall back to the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `BITSERVE_*` overrides looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var("BITSERVE_ADDRESS") {
            self.address = value.parse().map_err(|_| ConfigError::Env {
                name: "BITSERVE_ADDRESS",
                value,
            })?;
        }
        if let Some(value) = var("BITSERVE_BASE_URL") {
            self.base_url = value;
        }
        if let Some(value) = var("BITSERVE_STATIC_ROOT") {
            self.static_root = PathBuf::from(value);
        }
        if let Some(value) = var("BITSERVE_DATA_PATH") {
            self.data_path = Some(PathBuf::from(value));
        }
        if let Some(value) = var("BITSERVE_LOG") {
            self.log_filter = value;
        }
        if let Some(value) = var("BITSERVE_MAX_CONNECTIONS") {
            self.max_connections = match value.parse() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Env {
                        name: "BITSERVE_MAX_CONNECTIONS",
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}
