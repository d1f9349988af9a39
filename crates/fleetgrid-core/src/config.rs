//! fleetgrid.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetgrid_state::{StateResult, StateStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub store: StoreConfig,
    pub deployment: DeploymentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// redb database file. In-memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Namespace used when a deployment request leaves it empty.
    pub default_namespace: String,
    /// Upper bound for one member's install/upgrade/delete call; 0 disables it.
    pub member_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            member_timeout_secs: 300,
        }
    }
}

impl DeploymentConfig {
    pub fn member_timeout(&self) -> Option<Duration> {
        (self.member_timeout_secs > 0).then(|| Duration::from_secs(self.member_timeout_secs))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl StoreConfig {
    pub fn open(&self) -> StateResult<StateStore> {
        match &self.path {
            Some(path) => StateStore::open(path),
            None => StateStore::open_in_memory(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
