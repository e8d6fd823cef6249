//! Configuration for the Master daemon (Section 10.3).
//!
//! Precedence: CLI flag > `--config` file > environment variable > default.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Daemon configuration. Field names match the environment inputs named in
/// Section 6, plus the ambient fields a real daemon needs (Section 10.3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP surface binds to.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Optional bearer token required on every request. `None` disables auth
    /// (intended for local development only).
    pub auth_token: Option<String>,

    /// Number of ETL Processor worker tasks (Section 6, default 5).
    pub workers: u32,
    /// Retry cap for transient Merger errors (Section 6, default 3).
    pub max_retries: u32,
    /// Initial backoff before the first retry, doubling each attempt
    /// (Section 6, default 100).
    pub backoff_initial_ms: u64,
    /// Bounded capacity of the Result Queue (Section 6, default 1024).
    pub result_queue_capacity: usize,

    /// Default `max_attempts` for a Task Store reclaim, overridable per
    /// stage via the workflow steps spec (Section 3.5, default 3).
    pub default_max_attempts: u32,
    /// Lease duration granted to a claimed Task (seconds).
    pub lease_duration_secs: u64,
    /// How long an Agent's heartbeat may go stale before it is considered
    /// offline (seconds).
    pub heartbeat_timeout_secs: u64,
    /// Poll interval of the background lease sweeper (milliseconds).
    pub sweeper_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            database_path: dirs::data_local_dir().map_or_else(
                || PathBuf::from("masterd.db"),
                |d| d.join("masterd").join("masterd.db"),
            ),
            auth_token: None,
            workers: 5,
            max_retries: 3,
            backoff_initial_ms: 100,
            result_queue_capacity: 1024,
            default_max_attempts: 3,
            lease_duration_secs: 300,
            heartbeat_timeout_secs: 90,
            sweeper_interval_ms: 5_000,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };
            let key = key.trim();
            let value = Self::unquote(value.trim());
            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "bind_addr" => self.bind_addr = value.to_string(),
            "database_path" => self.database_path = PathBuf::from(value),
            "auth_token" => {
                self.auth_token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "workers" => self.workers = Self::parse_int(key, value)?,
            "max_retries" => self.max_retries = Self::parse_int(key, value)?,
            "backoff_initial_ms" => self.backoff_initial_ms = Self::parse_int(key, value)?,
            "result_queue_capacity" => {
                self.result_queue_capacity = Self::parse_int(key, value)?;
            }
            "default_max_attempts" => self.default_max_attempts = Self::parse_int(key, value)?,
            "lease_duration_secs" => self.lease_duration_secs = Self::parse_int(key, value)?,
            "heartbeat_timeout_secs" => {
                self.heartbeat_timeout_secs = Self::parse_int(key, value)?;
            }
            "sweeper_interval_ms" => self.sweeper_interval_ms = Self::parse_int(key, value)?,
            _ => {
                eprintln!("warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
