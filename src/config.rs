//! Executor configuration
//!
//! Read from a `docpipe.toml` file. A missing file yields the defaults.
//!
//! ## Environment Variables
//!
//! The following environment variables override config file settings:
//!
//! - `DOCPIPE_MAX_IN_FLIGHT` - Maximum number of concurrent store operations
//! - `DOCPIPE_ALLOW_DISK_USE` - Default `allowDiskUse` for aggregates
//! - `DOCPIPE_BATCH_SIZE` - Default cursor batch size
//! - `DOCPIPE_MAX_TIME_MS` - Default aggregate time limit
//! - `DOCPIPE_HUMAN_READABLE_BINDS` - Encode bound values in human-readable form
//!
//! These can be set in a `.env` file next to the config file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DocpipeError, DocpipeResult};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "docpipe.toml";

/// Environment variable names
pub const ENV_MAX_IN_FLIGHT: &str = "DOCPIPE_MAX_IN_FLIGHT";
pub const ENV_ALLOW_DISK_USE: &str = "DOCPIPE_ALLOW_DISK_USE";
pub const ENV_BATCH_SIZE: &str = "DOCPIPE_BATCH_SIZE";
pub const ENV_MAX_TIME_MS: &str = "DOCPIPE_MAX_TIME_MS";
pub const ENV_HUMAN_READABLE_BINDS: &str = "DOCPIPE_HUMAN_READABLE_BINDS";

fn default_max_in_flight() -> usize {
    16
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Size of the permit pool bounding concurrent store operations
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub allow_disk_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_ms: Option<u64>,
    #[serde(default)]
    pub human_readable_binds: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            allow_disk_use: false,
            batch_size: None,
            max_time_ms: None,
            human_readable_binds: false,
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from a directory
    ///
    /// This also loads any `.env` file in the directory and applies
    /// environment variable overrides.
    pub fn load(dir: &Path) -> DocpipeResult<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_IN_FLIGHT).and_then(|v| v.parse().ok()) {
            self.max_in_flight = value;
        }
        if let Some(value) = lookup(ENV_ALLOW_DISK_USE).and_then(|v| parse_flag(&v)) {
            self.allow_disk_use = value;
        }
        if let Some(value) = lookup(ENV_BATCH_SIZE).and_then(|v| v.parse().ok()) {
            self.batch_size = Some(value);
        }
        if let Some(value) = lookup(ENV_MAX_TIME_MS).and_then(|v| v.parse().ok()) {
            self.max_time_ms = Some(value);
        }
        if let Some(value) = lookup(ENV_HUMAN_READABLE_BINDS).and_then(|v| parse_flag(&v)) {
            self.human_readable_binds = value;
        }
    }

    fn validate(&self) -> DocpipeResult<()> {
        if self.max_in_flight == 0 {
            return Err(DocpipeError::Config(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> DocpipeResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ExecutorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_in_flight, 16);
        assert!(!config.allow_disk_use);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "max_in_flight = 4\nallow_disk_use = true\nbatch_size = 500\n",
        )
        .unwrap();
        let config = ExecutorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_in_flight, 4);
        assert!(config.allow_disk_use);
        assert_eq!(config.batch_size, Some(500));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = ExecutorConfig {
            max_in_flight: 2,
            ..ExecutorConfig::default()
        };
        config.save(dir.path()).unwrap();
        let content = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(content.contains("max_in_flight = 2"));
        assert_eq!(ExecutorConfig::load(dir.path()).unwrap().max_in_flight, 2);
    }

    #[test]
    fn test_invalid_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "max_in_flight = \"many\"").unwrap();
        assert!(matches!(
            ExecutorConfig::load(dir.path()),
            Err(DocpipeError::Config(_))
        ));
    }

    #[test]
    fn test_zero_permits_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "max_in_flight = 0").unwrap();
        assert!(ExecutorConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_IN_FLIGHT, "8"),
            (ENV_ALLOW_DISK_USE, "yes"),
            (ENV_MAX_TIME_MS, "1500"),
            (ENV_HUMAN_READABLE_BINDS, "nope"),
        ]
        .into_iter()
        .collect();

        let mut config = ExecutorConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.max_in_flight, 8);
        assert!(config.allow_disk_use);
        assert_eq!(config.max_time_ms, Some(1500));
        assert!(!config.human_readable_binds);
        assert_eq!(config.batch_size, None);
    }

    #[test]
    fn test_dotenv_file_applied() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "DOCPIPE_HUMAN_READABLE_BINDS=true\n").unwrap();
        let config = ExecutorConfig::load(dir.path()).unwrap();
        assert!(config.human_readable_binds);
    }
}
