//! Configuration loading and management
//!
//! Handles parsing of `.stm/config.toml`.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::{CONFIG_FILE, CONTROL_DIR};

/// Current configuration schema version
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration schema version
    #[serde(default = "default_schema")]
    pub schema: u32,

    /// Lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Task storage configuration
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            lock: LockConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

fn default_schema() -> u32 {
    CONFIG_SCHEMA_VERSION
}

/// Advisory lock timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a mutation waits for the lock before failing
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between acquisition attempts
    #[serde(default = "default_lock_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Age after which a lock marker is considered abandoned
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

fn default_stale_threshold_ms() -> u64 {
    30_000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            poll_interval_ms: default_lock_poll_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
        }
    }
}

/// Task storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Task directory, relative to `.stm/`
    #[serde(default = "default_tasks_dir")]
    pub dir: String,

    /// Maximum title length in characters
    #[serde(default = "default_max_title_length")]
    pub max_title_length: usize,

    /// Maximum body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_tasks_dir() -> String {
    "tasks".to_string()
}

fn default_max_title_length() -> usize {
    200
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            dir: default_tasks_dir(),
            max_title_length: default_max_title_length(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.stm/config.toml` under `root`, or return defaults when absent
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(CONTROL_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::storage::write_atomic(path, content.as_bytes())
    }

    pub fn validate(&self) -> Result<()> {
        self.lock.validate()?;
        self.tasks.validate()?;
        Ok(())
    }
}

impl LockConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "lock.poll_interval_ms must be > 0".to_string(),
            ));
        }
        // Anything tighter risks stealing a lock from a slow but live holder.
        if self.stale_threshold_ms < self.poll_interval_ms.saturating_mul(10) {
            return Err(Error::InvalidConfig(format!(
                "lock.stale_threshold_ms ({}) must be at least 10x lock.poll_interval_ms ({})",
                self.stale_threshold_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

impl TasksConfig {
    fn validate(&self) -> Result<()> {
        let dir = self.dir.trim();
        if dir.is_empty() {
            return Err(Error::InvalidConfig("tasks.dir cannot be empty".to_string()));
        }
        let path = Path::new(dir);
        if path.is_absolute()
            || path
                .components()
                .any(|part| !matches!(part, Component::Normal(_)))
        {
            return Err(Error::InvalidConfig(format!(
                "tasks.dir must be a plain relative path, got '{dir}'"
            )));
        }
        if self.max_title_length == 0 {
            return Err(Error::InvalidConfig(
                "tasks.max_title_length must be > 0".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::InvalidConfig(
                "tasks.max_body_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
