// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Entities persisted by the offline layer.
//!
//! Channels are addressed by their cid (`type:id`). Messages and reactions
//! carry a [`SyncStatus`] that tells the retry pass whether they still have
//! to reach the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RepositoryError;

pub type Timestamp = DateTime<Utc>;

/// Delivery state of a locally created or modified entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created or changed locally, not yet acknowledged by the server.
    SyncNeeded,
    /// A delivery attempt is running.
    InProgress,
    /// In sync with the server.
    Completed,
    /// The server rejected the entity; it is never retried.
    FailedPermanently,
    /// Waiting for attachment uploads before it can be sent.
    AwaitingAttachments,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::SyncNeeded => "sync_needed",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::FailedPermanently => "failed_permanently",
            SyncStatus::AwaitingAttachments => "awaiting_attachments",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_needed" => Ok(SyncStatus::SyncNeeded),
            "in_progress" => Ok(SyncStatus::InProgress),
            "completed" => Ok(SyncStatus::Completed),
            "failed_permanently" => Ok(SyncStatus::FailedPermanently),
            "awaiting_attachments" => Ok(SyncStatus::AwaitingAttachments),
            _ => Err(RepositoryError::CorruptedData(format!(
                "unknown sync status '{s}'"
            ))),
        }
    }
}

/// Splits a cid into `(type, id)`.
pub fn split_cid(cid: &str) -> Option<(&str, &str)> {
    match cid.split_once(':') {
        Some((channel_type, id)) if !channel_type.is_empty() && !id.is_empty() => {
            Some((channel_type, id))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub cid: String,
    pub channel_type: String,
    pub id: String,
    pub name: Option<String>,
    pub created_at: Option<Timestamp>,
    pub sync_status: SyncStatus,
}

impl Channel {
    pub fn new(channel_type: impl Into<String>, id: impl Into<String>) -> Self {
        let channel_type = channel_type.into();
        let id = id.into();
        Channel {
            cid: format!("{channel_type}:{id}"),
            channel_type,
            id,
            name: None,
            created_at: None,
            sync_status: SyncStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: Option<String>,
    pub upload_state: UploadState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub cid: String,
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Server creation time; `None` until the server has seen the message.
    pub created_at: Option<Timestamp>,
    pub created_locally_at: Option<Timestamp>,
    pub updated_locally_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    pub sync_status: SyncStatus,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        cid: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Message {
            id: id.into(),
            cid: cid.into(),
            user_id: user_id.into(),
            text: text.into(),
            attachments: Vec::new(),
            created_at: None,
            created_locally_at: None,
            updated_locally_at: None,
            deleted_at: None,
            sync_status: SyncStatus::SyncNeeded,
        }
    }

    pub fn has_failed_attachment(&self) -> bool {
        self.attachments
            .iter()
            .any(|a| a.upload_state == UploadState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub reaction_type: String,
    pub created_locally_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    pub sync_status: SyncStatus,
}

impl Reaction {
    /// A reaction is identified by message, user and type.
    pub fn new(
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        reaction_type: impl Into<String>,
    ) -> Self {
        let message_id = message_id.into();
        let user_id = user_id.into();
        let reaction_type = reaction_type.into();
        Reaction {
            id: format!("{message_id}/{user_id}/{reaction_type}"),
            message_id,
            user_id,
            reaction_type,
            created_locally_at: None,
            deleted_at: None,
            sync_status: SyncStatus::SyncNeeded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
}

/// Reconciliation bookmark of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub user_id: String,
    pub active_channel_ids: Vec<String>,
    pub last_synced_at: Option<Timestamp>,
    pub marked_all_read_at: Option<Timestamp>,
}

impl SyncState {
    pub fn new(user_id: impl Into<String>) -> Self {
        SyncState {
            user_id: user_id.into(),
            active_channel_ids: Vec::new(),
            last_synced_at: None,
            marked_all_read_at: None,
        }
    }
}

/// Server-side event returned by a history replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageNew {
        created_at: Timestamp,
        message: Message,
    },
    MessageUpdated {
        created_at: Timestamp,
        message: Message,
    },
    MessageDeleted {
        created_at: Timestamp,
        cid: String,
        message_id: String,
        hard: bool,
    },
    ReactionNew {
        created_at: Timestamp,
        reaction: Reaction,
    },
    ReactionDeleted {
        created_at: Timestamp,
        reaction: Reaction,
    },
    ChannelUpdated {
        created_at: Timestamp,
        channel: Channel,
    },
    ChannelDeleted {
        created_at: Timestamp,
        cid: String,
    },
    MarkAllRead {
        created_at: Timestamp,
        user_id: String,
    },
}

impl ChatEvent {
    pub fn created_at(&self) -> Timestamp {
        match self {
            ChatEvent::MessageNew { created_at, .. }
            | ChatEvent::MessageUpdated { created_at, .. }
            | ChatEvent::MessageDeleted { created_at, .. }
            | ChatEvent::ReactionNew { created_at, .. }
            | ChatEvent::ReactionDeleted { created_at, .. }
            | ChatEvent::ChannelUpdated { created_at, .. }
            | ChatEvent::ChannelDeleted { created_at, .. }
            | ChatEvent::MarkAllRead { created_at, .. } => *created_at,
        }
    }

    /// Returns the cid this event belongs to, if any.
    pub fn cid(&self) -> Option<&str> {
        match self {
            ChatEvent::MessageNew { message, .. } | ChatEvent::MessageUpdated { message, .. } => {
                Some(&message.cid)
            }
            ChatEvent::MessageDeleted { cid, .. } | ChatEvent::ChannelDeleted { cid, .. } => {
                Some(cid)
            }
            ChatEvent::ChannelUpdated { channel, .. } => Some(&channel.cid),
            ChatEvent::ReactionNew { .. }
            | ChatEvent::ReactionDeleted { .. }
            | ChatEvent::MarkAllRead { .. } => None,
        }
    }
}

/// Channel state returned by a full refetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub messages: Vec<Message>,
}

/// Channel list query. Hashes into the cache fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryChannelsRequest {
    pub member_id: String,
    pub offset: u32,
    pub limit: u32,
}

impl QueryChannelsRequest {
    pub fn for_member(member_id: impl Into<String>) -> Self {
        QueryChannelsRequest {
            member_id: member_id.into(),
            offset: 0,
            limit: 30,
        }
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
