//! Server configuration
//!
//! Read from a JSON file when one is given (or found in the platform config
//! directory), otherwise built from defaults. Missing keys fall back to
//! their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::filesystem::config::FileSystemConfig;

pub const DEFAULT_PORT: u16 = 9850;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the WebSocket server binds to
    pub bind: String,
    pub port: u16,
    /// JSON file holding usernames and password hashes
    pub user_db: PathBuf,
    pub filesystem: FileSystemConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            user_db: data_dir().join("users.json"),
            filesystem: FileSystemConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `explicit` if given, else the platform config file if it exists,
    /// else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_file().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

fn data_dir() -> PathBuf {
    dirs_next::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("burrow")
}

fn default_config_file() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("burrow").join("config.json"))
}
