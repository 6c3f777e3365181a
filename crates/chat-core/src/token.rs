// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Credential management.
//!
//! [`TokenManager`] holds the current token for a session and loads it on
//! demand from a [`TokenProvider`]. Providers are wrapped in a
//! [`CachedTokenProvider`] so that any number of concurrent loads result in
//! a single provider fetch whose result is fanned out to every waiter.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use crate::error::{CallError, CallResult};

/// Opaque credential string. An empty token means no token.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Token(value.into())
    }

    /// The absent token.
    pub fn empty() -> Self {
        Token(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Token(<empty>)")
        } else {
            f.write_str("Token(<redacted>)")
        }
    }
}

/// Source of credentials. Loading may block.
pub trait TokenProvider: Send + Sync {
    fn load_token(&self) -> CallResult<Token>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> CallResult<Token> + Send + Sync,
{
    fn load_token(&self) -> CallResult<Token> {
        self()
    }
}

type Listener = Box<dyn FnOnce(CallResult<Token>) + Send + 'static>;

/// `generation` is bumped by every invalidation. A fetch only caches its
/// token, and only releases the waiters it queued, under the generation it
/// started in.
#[derive(Default)]
struct FetchState {
    token: Option<Token>,
    generation: u64,
    fetching: Option<u64>,
    waiters: Vec<(u64, Listener)>,
}

/// Single-flight wrapper around a [`TokenProvider`].
///
/// While a fetch is running, further requests are parked on a waiter list
/// and released together with the fetch result. The provider itself is
/// called without holding the state lock.
pub struct CachedTokenProvider {
    provider: Arc<dyn TokenProvider>,
    state: Mutex<FetchState>,
}

impl CachedTokenProvider {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        CachedTokenProvider {
            provider,
            state: Mutex::new(FetchState::default()),
        }
    }

    /// Delivers a token to `listener`.
    ///
    /// A cached token is delivered immediately on the calling thread. If a
    /// fetch is already in flight the listener is queued and called by the
    /// fetching thread. Otherwise the calling thread becomes the fetcher.
    pub fn get_token<F>(&self, listener: F)
    where
        F: FnOnce(CallResult<Token>) + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = state.token.clone() {
            drop(state);
            listener(Ok(token));
            return;
        }
        let generation = state.generation;
        if state.fetching == Some(generation) {
            state.waiters.push((generation, Box::new(listener)));
            tracing::trace!("[get_token] fetch in flight, {} waiting", state.waiters.len());
            return;
        }
        state.fetching = Some(generation);
        drop(state);

        tracing::debug!("[get_token] fetching token from provider");
        let provider = Arc::clone(&self.provider);
        let result = catch_unwind(AssertUnwindSafe(move || provider.load_token()))
            .unwrap_or_else(|_| Err(CallError::unknown("token provider panicked")));

        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.fetching == Some(generation) {
                state.fetching = None;
            }
            if state.generation == generation {
                if let Ok(token) = &result {
                    if !token.is_empty() {
                        state.token = Some(token.clone());
                    }
                }
            } else {
                tracing::debug!("[get_token] token invalidated during fetch, not caching");
            }
            let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|(waiting_for, _)| *waiting_for == generation);
            state.waiters = others;
            mine
        };

        listener(result.clone());
        for (_, waiter) in waiters {
            waiter(result.clone());
        }
    }

    /// Blocks until a token is available through [`CachedTokenProvider::get_token`].
    pub fn load_blocking(&self) -> CallResult<Token> {
        let (tx, rx) = mpsc::channel();
        self.get_token(move |result| {
            let _ = tx.send(result);
        });
        rx.recv()
            .unwrap_or_else(|_| Err(CallError::unknown("token fetch ended without a result")))
    }

    /// Drops the cached token so the next request fetches again. A fetch
    /// already in flight is not joined by later requests and does not
    /// repopulate the cache.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.token = None;
        state.generation = state.generation.wrapping_add(1);
    }
}

impl fmt::Debug for CachedTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("CachedTokenProvider")
            .field("cached", &state.token.is_some())
            .field("fetching", &state.fetching.is_some())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Current credential of a session.
///
/// Load failures never propagate from here: they leave an empty token and a
/// `warn` log, and the next operation that needs auth fails or retries.
#[derive(Debug, Default)]
pub struct TokenManager {
    provider: Mutex<Option<Arc<CachedTokenProvider>>>,
    token: Mutex<TokenSlot>,
}

/// `epoch` is bumped whenever the token is expired or the provider
/// replaced; a load started in an older epoch never stores its token.
#[derive(Debug, Default)]
struct TokenSlot {
    token: Token,
    epoch: u64,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(provider: Arc<dyn TokenProvider>) -> Self {
        let manager = Self::new();
        manager.set_token_provider(provider);
        manager
    }

    /// Installs `provider` and clears the current token.
    pub fn set_token_provider(&self, provider: Arc<dyn TokenProvider>) {
        let mut slot = self.provider.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(CachedTokenProvider::new(provider)));
        drop(slot);
        self.reset_token();
        tracing::debug!("[set_token_provider] provider installed");
    }

    pub fn has_token_provider(&self) -> bool {
        self.provider
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Loads a token if none is present.
    pub fn ensure_token_loaded(&self) {
        if !self.has_token() {
            self.load_sync();
        }
    }

    /// Fetches a token through the provider, blocking the caller.
    ///
    /// Returns the empty token when no provider is set or the provider
    /// fails.
    pub fn load_sync(&self) -> Token {
        let epoch = self.lock_token().epoch;
        let provider = self
            .provider
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(provider) = provider else {
            tracing::warn!("[load_sync] no token provider set");
            return Token::empty();
        };

        let token = match provider.load_blocking() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("[load_sync] token provider failed: {}", e);
                Token::empty()
            }
        };
        let mut slot = self.lock_token();
        if slot.epoch == epoch {
            slot.token = token.clone();
        } else {
            tracing::debug!("[load_sync] token expired during load, not storing");
        }
        token
    }

    pub fn get_token(&self) -> Token {
        self.lock_token().token.clone()
    }

    pub fn has_token(&self) -> bool {
        !self.lock_token().token.is_empty()
    }

    /// Clears the token so the next access fetches a fresh one.
    pub fn expire_token(&self) {
        if let Some(provider) = self
            .provider
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            provider.invalidate();
        }
        self.reset_token();
        tracing::debug!("[expire_token] token expired");
    }

    fn reset_token(&self) {
        let mut slot = self.lock_token();
        slot.token = Token::empty();
        slot.epoch = slot.epoch.wrapping_add(1);
    }

    fn lock_token(&self) -> MutexGuard<'_, TokenSlot> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
