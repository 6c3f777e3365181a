// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Time-boxed de-duplication of identical calls.
//!
//! Callers hash a request into a fingerprint and route the call through
//! [`CacheCoordinator::cached_call`]. Within the TTL, every caller with the
//! same fingerprint receives the first stored [`Call`] handle. Since a call
//! runs its work at most once, they all share one network operation and
//! one result, failures included.
//!
//! Expiry is coarse: the coordinator remembers only when it last stored an
//! entry, and clears the whole table once that is older than the TTL.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::call::Call;
use crate::clock::{ClockSource, SystemClock};

/// Hashes a request description into a cache fingerprint.
pub fn fingerprint<H: Hash + ?Sized>(request: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.hash(&mut hasher);
    hasher.finish()
}

struct Entry {
    created_at_ms: u64,
    call: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<u64, Entry>,
    last_request_ms: Option<u64>,
}

pub struct CacheCoordinator {
    ttl_ms: u64,
    clock: Arc<dyn ClockSource>,
    table: Mutex<Table>,
}

impl CacheCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn ClockSource>) -> Self {
        CacheCoordinator {
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            clock,
            table: Mutex::new(Table::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Returns the call to use for `fingerprint`.
    ///
    /// `call` is stored and returned when `force_refresh` is set, when no
    /// entry exists, or when the stored entry is older than the TTL.
    /// Otherwise the stored call is returned and `call` is dropped
    /// unexecuted. A TTL of zero disables caching.
    pub fn cached_call<T>(&self, fingerprint: u64, force_refresh: bool, call: Call<T>) -> Call<T>
    where
        T: Clone + Send + 'static,
    {
        let now = self.clock.now_ms();
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(last) = table.last_request_ms {
            if now.saturating_sub(last) > self.ttl_ms && !table.entries.is_empty() {
                tracing::debug!("[cached_call] sweeping {} entries", table.entries.len());
                table.entries.clear();
            }
        }

        if !force_refresh {
            let hit = table
                .entries
                .get(&fingerprint)
                .filter(|entry| !self.is_stale(entry, now))
                .and_then(|entry| entry.call.downcast_ref::<Call<T>>())
                .cloned();
            if let Some(cached) = hit {
                tracing::trace!("[cached_call] hit {:#x}", fingerprint);
                return cached;
            }
        }

        table.entries.insert(
            fingerprint,
            Entry {
                created_at_ms: now,
                call: Box::new(call.clone()),
            },
        );
        table.last_request_ms = Some(now);
        call
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.entries.clear();
        table.last_request_ms = None;
    }

    fn is_stale(&self, entry: &Entry, now: u64) -> bool {
        self.ttl_ms == 0 || now.saturating_sub(entry.created_at_ms) > self.ttl_ms
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("ttl_ms", &self.ttl_ms)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
