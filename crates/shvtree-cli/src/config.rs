//! Configuration loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shvtree_core::AccessLevel;
use std::path::Path;
use tracing::{debug, Level};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub call: CallConfig,
    #[serde(default)]
    pub dummy: DummyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Access level granted to local calls
    #[serde(default = "default_access")]
    pub access: AccessLevel,
    /// User the calls are made on behalf of
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            access: default_access(),
            user_id: None,
        }
    }
}

fn default_access() -> AccessLevel {
    AccessLevel::Superuser
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DummyConfig {
    /// Seed of the random values, fresh values on every run when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Tracing level of a level name, `None` for unknown names
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Load configuration from file, defaults when it doesn't exist
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration {}", path.display()))?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        debug!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
