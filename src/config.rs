//! Editor configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MACHINES_CONFIG)
//! 3. Environment variables

use machines_core::Dialect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Editor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dialect of machines created without an explicit `--dialect`.
    pub default_dialect: Dialect,
    /// Log filter used when RUST_LOG is not set.
    pub log_level: String,
    /// Indent JSON written to bundles and printed by `show`.
    pub pretty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_dialect: Dialect::Swiftfsm,
            log_level: "info".to_string(),
            pretty: true,
        }
    }
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("MACHINES_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dialect) = var("MACHINES_DIALECT") {
            match dialect.parse() {
                Ok(parsed) => self.default_dialect = parsed,
                Err(e) => tracing::warn!("Ignoring MACHINES_DIALECT: {}", e),
            }
        }

        if let Some(level) = var("MACHINES_LOG") {
            if !level.is_empty() {
                self.log_level = level;
            }
        }

        if let Some(pretty) = var("MACHINES_PRETTY") {
            self.pretty = pretty == "1" || pretty.to_lowercase() == "true";
        }
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),
}
