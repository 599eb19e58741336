//! Configuration file support

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use taskwire_session::SessionConfig;

/// Base URL used when neither the config nor the command line sets one
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Configuration for taskwire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Task server API root
    pub base_url: Option<String>,
    /// Agent to run tasks with when the task has none
    pub agent_id: Option<i64>,
    /// Minimum milliseconds between transcript redraws while streaming
    pub throttle_ms: Option<u64>,
    /// Let the server skip future approvals for a tool once approved
    pub auto_approve: Option<bool>,
    /// Extra HTTP headers sent with every request (e.g. Authorization)
    pub headers: BTreeMap<String, String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskwire")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TASKWIRE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            throttle_ms: Some(100),
            auto_approve: Some(false),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Base URL from the config, falling back to the default
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Session settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(ms) = self.throttle_ms {
            config.throttle_interval = Duration::from_millis(ms);
        }
        config
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# taskwire configuration file
# Place at ~/.config/taskwire/config.toml (Linux) or set TASKWIRE_CONFIG_PATH

# Task server API root
base_url = "http://localhost:8000/api"

# Agent used when the task has none selected (optional)
# agent_id = 1

# Minimum milliseconds between transcript redraws while streaming
throttle_ms = 100

# Let the server skip future approvals for a tool once approved
auto_approve = false

# Extra headers sent with every request (optional)
[headers]
# Authorization = "Bearer ..."
"#
}
