// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Local persistence contract.
//!
//! The offline layer only needs point lookups, idempotent upserts, deletes
//! and selection by [`SyncStatus`]. Inserting an entity whose key already
//! exists replaces the stored row.

mod memory;
mod sqlite;

pub use memory::MemoryRepository;
pub use sqlite::{run_migrations, SqliteRepository, SCHEMA};

use crate::error::RepositoryResult;
use crate::models::{Channel, Message, Reaction, SyncState, SyncStatus, User};

pub trait RepositoryFacade: Send + Sync {
    fn select_channel(&self, cid: &str) -> RepositoryResult<Option<Channel>>;
    fn insert_channel(&self, channel: &Channel) -> RepositoryResult<()>;
    /// Deletes the channel together with its messages.
    fn delete_channel(&self, cid: &str) -> RepositoryResult<()>;
    fn select_channel_cids_by_sync_status(&self, status: SyncStatus)
        -> RepositoryResult<Vec<String>>;

    fn select_message(&self, id: &str) -> RepositoryResult<Option<Message>>;
    /// Messages of a channel ordered by local creation time.
    fn select_messages_for_channel(&self, cid: &str) -> RepositoryResult<Vec<Message>>;
    fn insert_message(&self, message: &Message) -> RepositoryResult<()>;
    fn delete_message(&self, id: &str) -> RepositoryResult<()>;
    fn select_message_ids_by_sync_status(&self, status: SyncStatus)
        -> RepositoryResult<Vec<String>>;

    fn select_reaction(&self, id: &str) -> RepositoryResult<Option<Reaction>>;
    fn insert_reaction(&self, reaction: &Reaction) -> RepositoryResult<()>;
    fn delete_reaction(&self, id: &str) -> RepositoryResult<()>;
    fn select_reaction_ids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>>;

    fn select_user(&self, id: &str) -> RepositoryResult<Option<User>>;
    fn insert_user(&self, user: &User) -> RepositoryResult<()>;

    fn select_sync_state(&self, user_id: &str) -> RepositoryResult<Option<SyncState>>;
    fn insert_sync_state(&self, state: &SyncState) -> RepositoryResult<()>;
}
