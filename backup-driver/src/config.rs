//! Configuration management for the backup driver.
//!
//! Loads configuration from a TOML file, then applies environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default engine image; selects the binary directory on the host
    #[serde(default = "default_image")]
    pub image: String,

    /// Host directory holding one sub-directory per engine image
    #[serde(default = "default_binary_dir")]
    pub binary_dir: PathBuf,

    /// File name of the engine binary inside the image directory
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Bound for cheap reads and listings, in minutes
    #[serde(default = "default_execute_timeout_minutes")]
    pub execute_timeout_minutes: u64,

    /// Time between SIGTERM and SIGKILL when a bounded call expires
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_image() -> String {
    "longhornio/longhorn-engine:master-head".to_string()
}

fn default_binary_dir() -> PathBuf {
    PathBuf::from("/var/lib/longhorn/engine-binaries")
}

fn default_binary_name() -> String {
    "longhorn".to_string()
}

fn default_execute_timeout_minutes() -> u64 {
    1
}

fn default_terminate_grace_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            image: default_image(),
            binary_dir: default_binary_dir(),
            binary_name: default_binary_name(),
            execute_timeout_minutes: default_execute_timeout_minutes(),
            terminate_grace_secs: default_terminate_grace_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Path of the engine binary shipped with the configured image.
    pub fn binary_path(&self) -> PathBuf {
        binary_path_for_image(&self.binary_dir, &self.image, &self.binary_name)
    }

    /// Bound applied to calls running under the default timeout policy.
    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_minutes * 60)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

/// `<dir>/<image with '/' and ':' replaced by '-'>/<binary>`
pub fn binary_path_for_image(binary_dir: &Path, image: &str, binary_name: &str) -> PathBuf {
    let image_dir = image.replace(['/', ':'], "-");
    binary_dir.join(image_dir).join(binary_name)
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BACKUP_ENGINE_IMAGE`, `BACKUP_ENGINE_BINARY_DIR`,
    /// `BACKUP_EXECUTION_TIMEOUT` (minutes) and `LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup("BACKUP_ENGINE_IMAGE") {
            self.engine.image = image;
        }
        if let Some(dir) = lookup("BACKUP_ENGINE_BINARY_DIR") {
            self.engine.binary_dir = PathBuf::from(dir);
        }
        if let Some(timeout) = lookup("BACKUP_EXECUTION_TIMEOUT") {
            self.engine.execute_timeout_minutes = timeout.trim().parse().map_err(|_| {
                EngineError::Config(format!("invalid BACKUP_EXECUTION_TIMEOUT '{}'", timeout))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.engine.execute_timeout_minutes == 0 {
            return Err(EngineError::Config(
                "execute_timeout_minutes must be greater than zero".to_string(),
            ));
        }
        if self.engine.image.is_empty() {
            return Err(EngineError::Config("engine image must not be empty".to_string()));
        }
        Ok(())
    }
}
