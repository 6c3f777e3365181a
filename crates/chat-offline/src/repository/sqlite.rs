// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed repository.
//!
//! Timestamps are stored as RFC 3339 text, list columns as JSON arrays.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::RepositoryFacade;
use crate::error::{RepositoryError, RepositoryResult};
use crate::models::{Channel, Message, Reaction, SyncState, SyncStatus, Timestamp, User};

/// SQL schema for the offline store.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS channels (
    cid TEXT PRIMARY KEY,
    channel_type TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT,
    created_at TEXT,
    sync_status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    user_id TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT,
    created_locally_at TEXT,
    updated_locally_at TEXT,
    deleted_at TEXT,
    sync_status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reactions (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    reaction_type TEXT NOT NULL,
    created_locally_at TEXT,
    deleted_at TEXT,
    sync_status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT
);

-- One row per user; active_channel_ids is a JSON array
CREATE TABLE IF NOT EXISTS sync_states (
    user_id TEXT PRIMARY KEY,
    active_channel_ids TEXT NOT NULL DEFAULT '[]',
    last_synced_at TEXT,
    marked_all_read_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_channels_sync_status ON channels(sync_status);
CREATE INDEX IF NOT EXISTS idx_messages_cid ON messages(cid);
CREATE INDEX IF NOT EXISTS idx_messages_sync_status ON messages(sync_status);
CREATE INDEX IF NOT EXISTS idx_reactions_sync_status ON reactions(sync_status);
"#;

fn corrupted(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(RepositoryError::CorruptedData(message)),
    )
}

fn parse_db<T: std::str::FromStr>(value: &str, column: &str) -> rusqlite::Result<T> {
    value
        .parse()
        .map_err(|_| corrupted(format!("invalid value '{value}' in column '{column}'")))
}

fn parse_timestamp_opt(value: Option<String>, column: &str) -> rusqlite::Result<Option<Timestamp>> {
    match value {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| corrupted(format!("invalid timestamp '{s}' in column '{column}'"))),
    }
}

fn parse_json<T: DeserializeOwned>(value: &str, column: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| corrupted(format!("invalid json in column '{column}': {e}")))
}

fn to_text(ts: &Option<Timestamp>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let status: String = row.get("sync_status")?;
    Ok(Channel {
        cid: row.get("cid")?,
        channel_type: row.get("channel_type")?,
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: parse_timestamp_opt(row.get("created_at")?, "created_at")?,
        sync_status: parse_db(&status, "sync_status")?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get("sync_status")?;
    let attachments: String = row.get("attachments")?;
    Ok(Message {
        id: row.get("id")?,
        cid: row.get("cid")?,
        user_id: row.get("user_id")?,
        text: row.get("text")?,
        attachments: parse_json(&attachments, "attachments")?,
        created_at: parse_timestamp_opt(row.get("created_at")?, "created_at")?,
        created_locally_at: parse_timestamp_opt(
            row.get("created_locally_at")?,
            "created_locally_at",
        )?,
        updated_locally_at: parse_timestamp_opt(
            row.get("updated_locally_at")?,
            "updated_locally_at",
        )?,
        deleted_at: parse_timestamp_opt(row.get("deleted_at")?, "deleted_at")?,
        sync_status: parse_db(&status, "sync_status")?,
    })
}

fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    let status: String = row.get("sync_status")?;
    Ok(Reaction {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        user_id: row.get("user_id")?,
        reaction_type: row.get("reaction_type")?,
        created_locally_at: parse_timestamp_opt(
            row.get("created_locally_at")?,
            "created_locally_at",
        )?,
        deleted_at: parse_timestamp_opt(row.get("deleted_at")?, "deleted_at")?,
        sync_status: parse_db(&status, "sync_status")?,
    })
}

fn sync_state_from_row(row: &Row<'_>) -> rusqlite::Result<SyncState> {
    let active: String = row.get("active_channel_ids")?;
    Ok(SyncState {
        user_id: row.get("user_id")?,
        active_channel_ids: parse_json(&active, "active_channel_ids")?,
        last_synced_at: parse_timestamp_opt(row.get("last_synced_at")?, "last_synced_at")?,
        marked_all_read_at: parse_timestamp_opt(
            row.get("marked_all_read_at")?,
            "marked_all_read_at",
        )?,
    })
}

/// Run schema creation and all migrations on a connection.
pub fn run_migrations(conn: &Connection) -> RepositoryResult<()> {
    conn.execute_batch(SCHEMA)?;
    migrate_add_attachments(conn)?;
    Ok(())
}

/// Migration: attachments column on messages.
fn migrate_add_attachments(conn: &Connection) -> RepositoryResult<()> {
    let has_column: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('messages') WHERE name = 'attachments'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if !has_column {
        conn.execute(
            "ALTER TABLE messages ADD COLUMN attachments TEXT NOT NULL DEFAULT '[]'",
            [],
        )?;
    }
    Ok(())
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open the store at `path`, creating and migrating if needed.
    pub fn open(path: &Path) -> RepositoryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        tracing::debug!("[open] offline store at {}", path.display());
        Ok(SqliteRepository {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(SqliteRepository {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn select_ids(&self, sql: &str, status: SyncStatus) -> RepositoryResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([status.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

impl RepositoryFacade for SqliteRepository {
    fn select_channel(&self, cid: &str) -> RepositoryResult<Option<Channel>> {
        let channel = self
            .conn()
            .query_row(
                "SELECT * FROM channels WHERE cid = ?1",
                [cid],
                channel_from_row,
            )
            .optional()?;
        Ok(channel)
    }

    fn insert_channel(&self, channel: &Channel) -> RepositoryResult<()> {
        self.conn().execute(
            "INSERT INTO channels (cid, channel_type, id, name, created_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(cid) DO UPDATE SET
                channel_type = excluded.channel_type,
                id = excluded.id,
                name = excluded.name,
                created_at = excluded.created_at,
                sync_status = excluded.sync_status",
            params![
                channel.cid,
                channel.channel_type,
                channel.id,
                channel.name,
                to_text(&channel.created_at),
                channel.sync_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn delete_channel(&self, cid: &str) -> RepositoryResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE cid = ?1", [cid])?;
        tx.execute("DELETE FROM channels WHERE cid = ?1", [cid])?;
        tx.commit()?;
        Ok(())
    }

    fn select_channel_cids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>> {
        self.select_ids(
            "SELECT cid FROM channels WHERE sync_status = ?1 ORDER BY cid",
            status,
        )
    }

    fn select_message(&self, id: &str) -> RepositoryResult<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                "SELECT * FROM messages WHERE id = ?1",
                [id],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    fn select_messages_for_channel(&self, cid: &str) -> RepositoryResult<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE cid = ?1
             ORDER BY COALESCE(created_locally_at, created_at), id",
        )?;
        let messages = stmt
            .query_map([cid], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn insert_message(&self, message: &Message) -> RepositoryResult<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        self.conn().execute(
            "INSERT INTO messages (id, cid, user_id, text, attachments, created_at,
             created_locally_at, updated_locally_at, deleted_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                cid = excluded.cid,
                user_id = excluded.user_id,
                text = excluded.text,
                attachments = excluded.attachments,
                created_at = excluded.created_at,
                created_locally_at = excluded.created_locally_at,
                updated_locally_at = excluded.updated_locally_at,
                deleted_at = excluded.deleted_at,
                sync_status = excluded.sync_status",
            params![
                message.id,
                message.cid,
                message.user_id,
                message.text,
                attachments,
                to_text(&message.created_at),
                to_text(&message.created_locally_at),
                to_text(&message.updated_locally_at),
                to_text(&message.deleted_at),
                message.sync_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn delete_message(&self, id: &str) -> RepositoryResult<()> {
        self.conn()
            .execute("DELETE FROM messages WHERE id = ?1", [id])?;
        Ok(())
    }

    fn select_message_ids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>> {
        self.select_ids(
            "SELECT id FROM messages WHERE sync_status = ?1
             ORDER BY COALESCE(created_locally_at, created_at), id",
            status,
        )
    }

    fn select_reaction(&self, id: &str) -> RepositoryResult<Option<Reaction>> {
        let reaction = self
            .conn()
            .query_row(
                "SELECT * FROM reactions WHERE id = ?1",
                [id],
                reaction_from_row,
            )
            .optional()?;
        Ok(reaction)
    }

    fn insert_reaction(&self, reaction: &Reaction) -> RepositoryResult<()> {
        self.conn().execute(
            "INSERT INTO reactions (id, message_id, user_id, reaction_type,
             created_locally_at, deleted_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                created_locally_at = excluded.created_locally_at,
                deleted_at = excluded.deleted_at,
                sync_status = excluded.sync_status",
            params![
                reaction.id,
                reaction.message_id,
                reaction.user_id,
                reaction.reaction_type,
                to_text(&reaction.created_locally_at),
                to_text(&reaction.deleted_at),
                reaction.sync_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn delete_reaction(&self, id: &str) -> RepositoryResult<()> {
        self.conn()
            .execute("DELETE FROM reactions WHERE id = ?1", [id])?;
        Ok(())
    }

    fn select_reaction_ids_by_sync_status(
        &self,
        status: SyncStatus,
    ) -> RepositoryResult<Vec<String>> {
        self.select_ids(
            "SELECT id FROM reactions WHERE sync_status = ?1 ORDER BY id",
            status,
        )
    }

    fn select_user(&self, id: &str) -> RepositoryResult<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, name FROM users WHERE id = ?1",
                [id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn insert_user(&self, user: &User) -> RepositoryResult<()> {
        self.conn().execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![user.id, user.name],
        )?;
        Ok(())
    }

    fn select_sync_state(&self, user_id: &str) -> RepositoryResult<Option<SyncState>> {
        let state = self
            .conn()
            .query_row(
                "SELECT * FROM sync_states WHERE user_id = ?1",
                [user_id],
                sync_state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    fn insert_sync_state(&self, state: &SyncState) -> RepositoryResult<()> {
        let active = serde_json::to_string(&state.active_channel_ids)?;
        self.conn().execute(
            "INSERT INTO sync_states (user_id, active_channel_ids, last_synced_at, marked_all_read_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                active_channel_ids = excluded.active_channel_ids,
                last_synced_at = excluded.last_synced_at,
                marked_all_read_at = excluded.marked_all_read_at",
            params![
                state.user_id,
                active,
                to_text(&state.last_synced_at),
                to_text(&state.marked_all_read_at),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
