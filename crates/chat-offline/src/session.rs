// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client session.
//!
//! A [`ChatSession`] owns one instance of every runtime component for a
//! single user: token manager, call cache, repository, connectivity flag,
//! sync coordinator and the connection state machine.
//!
//! ```text
//!                 Connect              Established
//!  Disconnected ──────────► Connecting ───────────► Connected
//!       ▲                      │ Failed                 │ Lost
//!       └──────────────────────┘                        ▼
//!       ◄──────── Disconnect (any state) ─────── Reconnecting ◄─┐
//!                                                  │   Failed   │
//!                                                  └────────────┘
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chat_core::{
    fingerprint, stay, CacheCoordinator, Call, FiniteStateMachine, FsmError, TokenManager,
    TokenProvider, Variant,
};
use tokio::sync::watch;

use crate::backend::{ChatBackend, Connectivity};
use crate::config::ClientConfig;
use crate::error::{SessionError, SessionResult};
use crate::models::{Channel, Message, QueryChannelsRequest, Reaction, Timestamp};
use crate::repository::{MemoryRepository, RepositoryFacade, SqliteRepository};
use crate::sync::SyncCoordinator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected { connection_id: String },
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

impl Variant for ConnectionState {
    type Kind = ConnectionKind;

    fn kind(&self) -> ConnectionKind {
        match self {
            ConnectionState::Disconnected => ConnectionKind::Disconnected,
            ConnectionState::Connecting { .. } => ConnectionKind::Connecting,
            ConnectionState::Connected { .. } => ConnectionKind::Connected,
            ConnectionState::Reconnecting { .. } => ConnectionKind::Reconnecting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Established(String),
    Failed,
    Lost,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Connect,
    Established,
    Failed,
    Lost,
    Disconnect,
}

impl Variant for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Connect => ConnectionEventKind::Connect,
            ConnectionEvent::Established(_) => ConnectionEventKind::Established,
            ConnectionEvent::Failed => ConnectionEventKind::Failed,
            ConnectionEvent::Lost => ConnectionEventKind::Lost,
            ConnectionEvent::Disconnect => ConnectionEventKind::Disconnect,
        }
    }
}

type ConnectionMachine = FiniteStateMachine<ConnectionState, ConnectionEvent>;

fn established(_: &ConnectionState, event: &ConnectionEvent) -> ConnectionState {
    match event {
        ConnectionEvent::Established(connection_id) => ConnectionState::Connected {
            connection_id: connection_id.clone(),
        },
        _ => ConnectionState::Disconnected,
    }
}

fn disconnected(_: &ConnectionState, _: &ConnectionEvent) -> ConnectionState {
    ConnectionState::Disconnected
}

/// Unlisted pairs keep the current state.
fn connection_machine() -> Result<ConnectionMachine, FsmError> {
    use ConnectionEventKind as Ev;
    use ConnectionKind as St;

    FiniteStateMachine::builder()
        .initial_state(ConnectionState::Disconnected)
        .state(St::Disconnected, |s| {
            s.on_event(Ev::Connect, |_, _| ConnectionState::Connecting { attempt: 1 })
        })
        .state(St::Connecting, |s| {
            s.on_event(Ev::Established, established)
                .on_event(Ev::Failed, disconnected)
                .on_event(Ev::Disconnect, disconnected)
        })
        .state(St::Connected, |s| {
            s.on_event(Ev::Lost, |_, _| ConnectionState::Reconnecting { attempt: 1 })
                .on_event(Ev::Disconnect, disconnected)
                .on_event(Ev::Connect, stay)
        })
        .state(St::Reconnecting, |s| {
            s.on_event(Ev::Established, established)
                .on_event(Ev::Failed, |state, _| match state {
                    ConnectionState::Reconnecting { attempt } => ConnectionState::Reconnecting {
                        attempt: attempt.saturating_add(1),
                    },
                    other => other.clone(),
                })
                .on_event(Ev::Disconnect, disconnected)
        })
        .build()
}

pub struct ChatSession {
    user_id: String,
    config: ClientConfig,
    backend: Arc<dyn ChatBackend>,
    tokens: Arc<TokenManager>,
    cache: CacheCoordinator,
    repo: Arc<dyn RepositoryFacade>,
    connectivity: Connectivity,
    sync: Arc<SyncCoordinator>,
    connection: ConnectionMachine,
    watched: Mutex<BTreeSet<String>>,
}

impl ChatSession {
    /// Opens a session for `user_id`, persisting to `config.database_path`
    /// when set and in memory otherwise.
    pub fn new(
        user_id: impl Into<String>,
        config: ClientConfig,
        backend: Arc<dyn ChatBackend>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> SessionResult<Self> {
        let repo: Arc<dyn RepositoryFacade> = match &config.database_path {
            Some(path) => Arc::new(SqliteRepository::open(path)?),
            None => Arc::new(MemoryRepository::new()),
        };
        let tokens = Arc::new(TokenManager::with_provider(token_provider));
        Self::with_parts(
            user_id,
            config,
            backend,
            tokens,
            repo,
            Connectivity::default(),
        )
    }

    pub fn with_parts(
        user_id: impl Into<String>,
        config: ClientConfig,
        backend: Arc<dyn ChatBackend>,
        tokens: Arc<TokenManager>,
        repo: Arc<dyn RepositoryFacade>,
        connectivity: Connectivity,
    ) -> SessionResult<Self> {
        let user_id = user_id.into();
        let sync = SyncCoordinator::new(
            user_id.clone(),
            Arc::clone(&repo),
            Arc::clone(&backend),
            connectivity.clone(),
            &config,
        )?;
        Ok(ChatSession {
            cache: CacheCoordinator::new(config.cache_ttl()),
            connection: connection_machine()?,
            watched: Mutex::new(BTreeSet::new()),
            user_id,
            config,
            backend,
            tokens,
            repo,
            connectivity,
            sync,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<dyn RepositoryFacade> {
        &self.repo
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    /// Channels watched in this session, sorted.
    pub fn watched_channels(&self) -> Vec<String> {
        self.watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Opens the realtime connection.
    ///
    /// Entering `Connected` runs the reconnect sync. Sync problems are
    /// logged and retried in the background, never returned here.
    pub async fn connect(&self) -> SessionResult<ConnectionState> {
        let current = self.connection.state();
        match current {
            ConnectionState::Disconnected => self.connection.send_event(ConnectionEvent::Connect),
            ConnectionState::Reconnecting { .. } => {}
            other => {
                return Err(SessionError::InvalidState {
                    action: "connect",
                    state: other.label().to_string(),
                })
            }
        }

        let backend = Arc::clone(&self.backend);
        let user_id = self.user_id.clone();
        let call = Call::authorized(Arc::clone(&self.tokens), move |token| {
            backend.connect(&user_id, token)
        });
        match call.await_result().await {
            Ok(connection_id) => {
                tracing::info!("[connect] {} connected as {}", self.user_id, connection_id);
                self.connection
                    .send_event(ConnectionEvent::Established(connection_id));
            }
            Err(e) => {
                tracing::warn!("[connect] {} failed: {}", self.user_id, e);
                self.connection.send_event(ConnectionEvent::Failed);
                return Err(e.into());
            }
        }

        let state = self.connection.state();
        if state.is_connected() {
            self.connectivity.set_online(true);
            if let Err(e) = self.sync.on_connectivity_regained().await {
                tracing::error!("[connect] reconnect sync failed: {}", e);
            }
        }
        Ok(state)
    }

    /// Closes the connection, remembering the watched channels for the
    /// next reconnect.
    pub async fn disconnect(&self) -> SessionResult<()> {
        if self.connection.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.sync.on_connection_lost(&self.watched_channels())?;
        if let Err(e) = self.backend.disconnect().await_result().await {
            tracing::warn!("[disconnect] backend disconnect failed: {}", e);
        }
        self.connection.send_event(ConnectionEvent::Disconnect);
        self.cache.clear();
        tracing::info!("[disconnect] {} disconnected", self.user_id);
        Ok(())
    }

    /// The realtime connection dropped.
    pub fn on_connection_lost(&self) -> SessionResult<()> {
        if !self.connection.state().is_connected() {
            return Ok(());
        }
        self.sync.on_connection_lost(&self.watched_channels())?;
        self.connection.send_event(ConnectionEvent::Lost);
        Ok(())
    }

    /// The device lost network access.
    pub fn on_network_lost(&self) -> SessionResult<()> {
        self.connectivity.set_online(false);
        self.on_connection_lost()
    }

    /// The device regained network access; reconnects if the connection
    /// was lost.
    pub async fn on_network_available(&self) -> SessionResult<ConnectionState> {
        self.connectivity.set_online(true);
        match self.connection.state() {
            ConnectionState::Reconnecting { .. } => self.connect().await,
            other => Ok(other),
        }
    }

    /// Watches `cid` and keeps the channel locally.
    pub async fn watch_channel(&self, cid: &str) -> SessionResult<Channel> {
        let channel = self.backend.watch_channel(cid).await_result().await?;
        self.repo.insert_channel(&channel)?;
        self.watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.cid.clone());
        Ok(channel)
    }

    /// Queries channels through the cache. Identical requests within the
    /// cache TTL share one call unless `force_refresh` is set.
    ///
    /// Retryable failures are retried in place up to `retry.call_attempts`
    /// times.
    pub fn query_channels(
        &self,
        request: &QueryChannelsRequest,
        force_refresh: bool,
    ) -> Call<Vec<Channel>> {
        let backend = Arc::clone(&self.backend);
        let tokens = Arc::clone(&self.tokens);
        let repo = Arc::clone(&self.repo);
        let query = request.clone();
        let call = Call::retrying(self.config.retry.call_policy(), move || {
            let backend = Arc::clone(&backend);
            let query = query.clone();
            Call::authorized(Arc::clone(&tokens), move |token| {
                backend.query_channels(token, &query)
            })
        })
        .on_success(move |channels| {
            for channel in channels {
                if let Err(e) = repo.insert_channel(channel) {
                    tracing::warn!("[query_channels] failed to store {}: {}", channel.cid, e);
                }
            }
        });
        self.cache
            .cached_call(fingerprint(request), force_refresh, call)
    }

    pub async fn send_message(&self, message: Message) -> SessionResult<Message> {
        Ok(self.sync.send_message(message).await?)
    }

    pub async fn send_reaction(&self, reaction: Reaction) -> SessionResult<Reaction> {
        Ok(self.sync.send_reaction(reaction).await?)
    }

    pub fn mark_all_read(&self, at: Timestamp) -> SessionResult<bool> {
        Ok(self.sync.mark_all_read(&self.user_id, at)?)
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("user_id", &self.user_id)
            .field("state", &self.connection.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
