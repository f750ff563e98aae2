use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::DEFAULT_PAGE_SIZE;

pub const DEFAULT_NAMESPACE: &str = "sqltools";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const NAMESPACE_ENV: &str = "SQLPANEL_EXT_NAMESPACE";
pub const HOST_ADDR_ENV: &str = "SQLPANEL_HOST_ADDR";

const CONFIG_FILE: &str = "config.toml";
const STATE_FILE: &str = "panel-state.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PanelConfig {
    /// Prefix joined with a query type to form the host command name.
    pub namespace: String,
    pub page_size: u64,
    pub request_timeout_ms: u64,
    pub state_path: Option<PathBuf>,
    pub host_address: Option<String>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            state_path: None,
            host_address: None,
        }
    }
}

impl PanelConfig {
    /// Loads `config.toml` from the default config directory, applies
    /// environment overrides and fills in the default state path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_dir = default_config_dir()?;
        let mut config = Self::load_from_path(config_dir.join(CONFIG_FILE))?
            .with_env_overrides(|key| env::var(key).ok());
        if config.state_path.is_none() {
            config.state_path = Some(config_dir.join(STATE_FILE));
        }
        Ok(config)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(namespace) = lookup(NAMESPACE_ENV).filter(|value| !value.is_empty()) {
            self.namespace = namespace;
        }
        if let Some(address) = lookup(HOST_ADDR_ENV).filter(|value| !value.is_empty()) {
            self.host_address = Some(address);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be greater than 0",
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: "must be greater than 0",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os("SQLPANEL_CONFIG_DIR") {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("sqlpanel"))
}
