// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport contract and network reachability.
//!
//! The offline layer never talks to the network directly. Every remote
//! operation is a [`Call`] built by a [`ChatBackend`]; building the call
//! does not issue the request.

use std::sync::Arc;

use chat_core::Call;
use tokio::sync::watch;

use crate::models::{
    Channel, ChannelSnapshot, ChatEvent, Message, QueryChannelsRequest, Reaction, Timestamp,
};

pub trait ChatBackend: Send + Sync {
    /// Opens the realtime connection, yielding the connection id.
    fn connect(&self, user_id: &str, token: &str) -> Call<String>;
    fn disconnect(&self) -> Call<()>;

    /// Re-subscribes to realtime events of a channel.
    fn watch_channel(&self, cid: &str) -> Call<Channel>;
    /// Fetches the complete current state of a channel.
    fn query_channel(&self, cid: &str) -> Call<ChannelSnapshot>;
    fn query_channels(&self, token: &str, request: &QueryChannelsRequest) -> Call<Vec<Channel>>;

    /// Events of `cids` created after `since`.
    ///
    /// Fails with a validation error when the gap holds more events than
    /// the server is willing to replay.
    fn sync_history(&self, cids: &[String], since: Timestamp) -> Call<Vec<ChatEvent>>;

    fn create_channel(&self, channel: &Channel) -> Call<Channel>;
    fn send_message(&self, message: &Message) -> Call<Message>;
    fn update_message(&self, message: &Message) -> Call<Message>;
    fn delete_message(&self, message_id: &str) -> Call<Message>;
    fn send_reaction(&self, reaction: &Reaction) -> Call<Reaction>;
    fn delete_reaction(&self, message_id: &str, reaction_type: &str) -> Call<()>;
}

/// Shared network reachability flag.
///
/// Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Connectivity { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::info!("[connectivity] online: {}", online);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once the network is reachable.
    pub async fn wait_online(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Connectivity::new(true)
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
