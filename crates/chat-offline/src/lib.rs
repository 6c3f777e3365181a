// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! chat-offline: local persistence and reconnect synchronization.
//!
//! Builds on the primitives of `chat-core`:
//!
//! - [`RepositoryFacade`]: local store ([`MemoryRepository`], [`SqliteRepository`])
//! - [`ChatBackend`]: transport contract, every operation a `Call`
//! - [`SyncScheduler`]: keyed background retries gated on [`Connectivity`]
//! - [`SyncCoordinator`]: replay after a gap, optimistic sends, entity retry
//! - [`ChatSession`]: owns one of each for a single user

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod session;
pub mod sync;

#[cfg(test)]
mod test_helpers;

pub use backend::{ChatBackend, Connectivity};
pub use config::{ClientConfig, RetryConfig, SyncConfig};
pub use error::{
    ConfigError, RepositoryError, RepositoryResult, SessionError, SessionResult, SyncError,
    SyncResult,
};
pub use models::{
    Attachment, Channel, ChannelSnapshot, ChatEvent, Message, QueryChannelsRequest, Reaction,
    SyncState, SyncStatus, Timestamp, UploadState, User,
};
pub use repository::{MemoryRepository, RepositoryFacade, SqliteRepository};
pub use scheduler::{JobFuture, SyncScheduler};
pub use session::{ChatSession, ConnectionEvent, ConnectionState};
pub use sync::{RetryReport, SyncCoordinator, SyncOutcome, SyncPhase};
