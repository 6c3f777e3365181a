// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory repository for ephemeral sessions and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::RepositoryFacade;
use crate::error::RepositoryResult;
use crate::models::{Channel, Message, Reaction, SyncState, SyncStatus, User};

#[derive(Default)]
struct Tables {
    channels: BTreeMap<String, Channel>,
    messages: BTreeMap<String, Message>,
    reactions: BTreeMap<String, Reaction>,
    users: BTreeMap<String, User>,
    sync_states: BTreeMap<String, SyncState>,
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RepositoryFacade for MemoryRepository {
    fn select_channel(&self, cid: &str) -> RepositoryResult<Option<Channel>> {
        Ok(self.tables().channels.get(cid).cloned())
    }

    fn insert_channel(&self, channel: &Channel) -> RepositoryResult<()> {
        self.tables()
            .channels
            .insert(channel.cid.clone(), channel.clone());
        Ok(())
    }

    fn delete_channel(&self, cid: &str) -> RepositoryResult<()> {
        let mut tables = self.tables();
        tables.channels.remove(cid);
        tables.messages.retain(|_, m| m.cid != cid);
        Ok(())
    }

    fn select_channel_cids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>> {
        Ok(self
            .tables()
            .channels
            .values()
            .filter(|c| c.sync_status == status)
            .map(|c| c.cid.clone())
            .collect())
    }

    fn select_message(&self, id: &str) -> RepositoryResult<Option<Message>> {
        Ok(self.tables().messages.get(id).cloned())
    }

    fn select_messages_for_channel(&self, cid: &str) -> RepositoryResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .tables()
            .messages
            .values()
            .filter(|m| m.cid == cid)
            .cloned()
            .collect();
        messages.sort_by(|a, b| {
            (a.created_locally_at.or(a.created_at), &a.id)
                .cmp(&(b.created_locally_at.or(b.created_at), &b.id))
        });
        Ok(messages)
    }

    fn insert_message(&self, message: &Message) -> RepositoryResult<()> {
        self.tables()
            .messages
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    fn delete_message(&self, id: &str) -> RepositoryResult<()> {
        self.tables().messages.remove(id);
        Ok(())
    }

    fn select_message_ids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>> {
        Ok(self
            .tables()
            .messages
            .values()
            .filter(|m| m.sync_status == status)
            .map(|m| m.id.clone())
            .collect())
    }

    fn select_reaction(&self, id: &str) -> RepositoryResult<Option<Reaction>> {
        Ok(self.tables().reactions.get(id).cloned())
    }

    fn insert_reaction(&self, reaction: &Reaction) -> RepositoryResult<()> {
        self.tables()
            .reactions
            .insert(reaction.id.clone(), reaction.clone());
        Ok(())
    }

    fn delete_reaction(&self, id: &str) -> RepositoryResult<()> {
        self.tables().reactions.remove(id);
        Ok(())
    }

    fn select_reaction_ids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>> {
        Ok(self
            .tables()
            .reactions
            .values()
            .filter(|r| r.sync_status == status)
            .map(|r| r.id.clone())
            .collect())
    }

    fn select_user(&self, id: &str) -> RepositoryResult<Option<User>> {
        Ok(self.tables().users.get(id).cloned())
    }

    fn insert_user(&self, user: &User) -> RepositoryResult<()> {
        self.tables().users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn select_sync_state(&self, user_id: &str) -> RepositoryResult<Option<SyncState>> {
        Ok(self.tables().sync_states.get(user_id).cloned())
    }

    fn insert_sync_state(&self, state: &SyncState) -> RepositoryResult<()> {
        self.tables()
            .sync_states
            .insert(state.user_id.clone(), state.clone());
        Ok(())
    }
}
