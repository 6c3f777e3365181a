// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the offline layer.

use chat_core::{CallError, FsmError};
use thiserror::Error;

/// Errors raised by a [`RepositoryFacade`](crate::repository::RepositoryFacade).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Errors raised while reconciling local and remote state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("sync phase machine: {0}")]
    Fsm(#[from] FsmError),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors raised while loading a [`ClientConfig`](crate::config::ClientConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by a [`ChatSession`](crate::session::ChatSession).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("connection machine: {0}")]
    Fsm(#[from] FsmError),

    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
