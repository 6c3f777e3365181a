// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is
//! a valid configuration:
//!
//! ```toml
//! cache_ttl_ms = 3000
//! database_path = "/var/lib/chat/offline.db"
//!
//! [sync]
//! replay_window_secs = 2592000
//! max_threshold_secs = 43200
//!
//! [retry]
//! initial_delay_ms = 500
//! max_delay_ms = 30000
//! max_attempts = 0
//! call_attempts = 3
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_core::BackoffRetry;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;
use crate::logging;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TTL of the call cache in milliseconds. 0 disables caching.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// SQLite file for the offline store. In-memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Reconciliation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Largest gap (seconds) replayed incrementally; older gaps refetch the
    /// whole channel.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
    /// Pending entities older than this (seconds) are dropped locally
    /// instead of being resent.
    #[serde(default = "default_max_threshold_secs")]
    pub max_threshold_secs: u64,
}

/// Backoff of background retry jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts per job before giving up (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
    /// Attempts of a foreground read before its error is returned.
    #[serde(default = "default_call_attempts")]
    pub call_attempts: u32,
}

fn default_cache_ttl_ms() -> u64 {
    3_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_replay_window_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_max_threshold_secs() -> u64 {
    12 * 60 * 60
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_call_attempts() -> u32 {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            cache_ttl_ms: default_cache_ttl_ms(),
            database_path: None,
            log_filter: default_log_filter(),
            sync: SyncConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            replay_window_secs: default_replay_window_secs(),
            max_threshold_secs: default_max_threshold_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: 0,
            call_attempts: default_call_attempts(),
        }
    }
}

impl ClientConfig {
    /// Reads and validates the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.replay_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.replay_window_secs must be positive".into(),
            ));
        }
        if self.retry.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.initial_delay_ms must be positive".into(),
            ));
        }
        if let Err(e) = EnvFilter::try_new(&self.log_filter) {
            return Err(ConfigError::Invalid(format!(
                "log_filter {:?} is not a valid filter: {e}",
                self.log_filter
            )));
        }
        if self.retry.call_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.call_attempts must be positive".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Installs the stderr subscriber filtered by `log_filter`. Returns false
    /// if a subscriber is already installed.
    pub fn init_logging(&self) -> bool {
        logging::init(&self.log_filter)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

impl SyncConfig {
    pub fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }

    pub fn max_threshold(&self) -> Duration {
        Duration::from_secs(self.max_threshold_secs)
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Backoff for foreground calls retried in place.
    pub fn call_policy(&self) -> BackoffRetry {
        BackoffRetry {
            max_attempts: self.call_attempts,
            initial_delay: self.initial_delay(),
            max_delay: self.max_delay(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
