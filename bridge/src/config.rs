use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::BridgeError;

pub const DEFAULT_PEER_COMMAND: &str = "mangadb-nativehost";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    pub peer_command: Option<String>,
    #[serde(default)]
    pub peer_args: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl BridgeConfig {
    pub fn peer_command(&self) -> &str {
        self.peer_command.as_deref().unwrap_or(DEFAULT_PEER_COMMAND)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .as_deref()
            .and_then(|level| log::LevelFilter::from_str(level).ok())
            .unwrap_or(log::LevelFilter::Info)
    }

    pub fn from_toml(content: &str) -> Result<Self, BridgeError> {
        toml::from_str(content).map_err(|e| BridgeError::Config(format!("Invalid config: {}", e)))
    }
}

pub fn get_mangadb_dir() -> Result<PathBuf, BridgeError> {
    dirs::home_dir()
        .map(|home| home.join(".mangadb"))
        .ok_or_else(|| BridgeError::Config("Could not find home directory".to_string()))
}

pub fn get_config_path() -> Result<PathBuf, BridgeError> {
    Ok(get_mangadb_dir()?.join("bridge.toml"))
}

/// Reads `~/.mangadb/bridge.toml`; a missing file yields the defaults.
pub fn load_config() -> Result<BridgeConfig, BridgeError> {
    let path = get_config_path()?;
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    BridgeConfig::from_toml(&content)
}
