// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Background retry jobs gated on connectivity.
//!
//! A job is an async closure keyed by a string. Scheduling a key that is
//! already pending replaces the pending job. Each attempt waits for the
//! network to be reachable; failed attempts back off exponentially up to
//! `max_delay`. Permanent failures end the job immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_core::CallResult;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::backend::Connectivity;
use crate::config::RetryConfig;

pub type JobFuture = BoxFuture<'static, CallResult<()>>;

type JobTable = HashMap<String, (u64, CancellationToken)>;

pub struct SyncScheduler {
    connectivity: Connectivity,
    config: RetryConfig,
    jobs: Arc<Mutex<JobTable>>,
    next_id: AtomicU64,
}

impl SyncScheduler {
    pub fn new(connectivity: Connectivity, config: RetryConfig) -> Self {
        SyncScheduler {
            connectivity,
            config,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Schedules `job` under `key`, canceling any job pending for that key.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: impl Into<String>, job: F)
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();

        let previous = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), (id, cancel_token.clone()));
        if let Some((_, previous)) = previous {
            tracing::debug!("[schedule] replacing pending job {}", key);
            previous.cancel();
        }

        let connectivity = self.connectivity.clone();
        let config = self.config.clone();
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            run_job(&key, job, connectivity, config, cancel_token).await;
            let mut jobs = jobs.lock().unwrap_or_else(|e| e.into_inner());
            if jobs.get(&key).is_some_and(|(owner, _)| *owner == id) {
                jobs.remove(&key);
            }
        });
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// Keys of jobs that have not finished, sorted.
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels the job pending under `key`. Returns false if none was.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        match removed {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (key, (_, token)) in drained {
            tracing::debug!("[cancel_all] dropping job {}", key);
            token.cancel();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("pending", &self.pending_keys())
            .finish_non_exhaustive()
    }
}

async fn run_job<F>(
    key: &str,
    job: F,
    connectivity: Connectivity,
    config: RetryConfig,
    cancel_token: CancellationToken,
) where
    F: Fn() -> JobFuture + Send + Sync + 'static,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay();

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return,
            _ = connectivity.wait_online() => {}
        }

        // A replaced job must never start, even if it was already online.
        if cancel_token.is_cancelled() {
            return;
        }
        attempt = attempt.saturating_add(1);
        let result = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return,
            result = job() => result,
        };

        match result {
            Ok(()) => {
                tracing::debug!("[job] {} succeeded after {} attempt(s)", key, attempt);
                return;
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("[job] {} failed permanently: {}", key, e);
                return;
            }
            Err(e) => {
                // 0 = unlimited
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    tracing::warn!("[job] {} giving up after {} attempts: {}", key, attempt, e);
                    return;
                }
                tracing::debug!(
                    "[job] {} attempt {} failed ({}), retrying in {:?}",
                    key,
                    attempt,
                    e,
                    delay
                );
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = next_delay(delay, config.max_delay());
            }
        }
    }
}

fn next_delay(delay: Duration, max: Duration) -> Duration {
    delay.saturating_mul(2).min(max)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
