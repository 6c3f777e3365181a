// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Deferred, cancellable units of work.
//!
//! A [`Call`] wraps one piece of work that produces a [`CallResult`]. Building
//! a call never runs it; the work runs on the first [`Call::execute`],
//! [`Call::enqueue`] or [`Call::await_result`]. A call runs its work at most
//! once: concurrent executions wait for the running one and later executions
//! receive the stored result. Handles are cheap to clone and all clones share
//! the same work, result and cancellation flag.
//!
//! Combinators ([`Call::map`], [`Call::zip_with`], hooks) build new calls that
//! close over their parent. Canceling a combined call cancels its parents.
//!
//! ```text
//!   Call<T> ──map(f)──► Call<K>
//!      │
//!      └──zip_with(Call<K>)──► Call<(T, K)>
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::{CallError, CallResult};
use crate::token::TokenManager;

type Work<T> = Box<dyn FnOnce(&CancelFlag) -> CallResult<T> + Send + 'static>;
type CancelHook = Box<dyn Fn() + Send + Sync + 'static>;

/// Cancellation flag shared between a call and its running work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Returns true once the owning call has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sets the flag, returning true if it was not already set.
    fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

enum Slot<T> {
    Idle(Work<T>),
    Running,
    Done(CallResult<T>),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
    canceled: CancelFlag,
    cancel_hooks: Mutex<Vec<CancelHook>>,
}

/// A deferred unit of work producing `CallResult<T>`.
pub struct Call<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Call<T> {
    fn clone(&self) -> Self {
        Call {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("canceled", &self.inner.canceled.is_canceled())
            .finish_non_exhaustive()
    }
}

impl<T> Call<T> {
    /// Returns true if both handles refer to the same underlying call.
    pub fn ptr_eq(&self, other: &Call<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns true if [`Call::cancel`] has been invoked on this call.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.is_canceled()
    }

    /// Returns true once the work has produced a result.
    pub fn is_completed(&self) -> bool {
        let slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        matches!(*slot, Slot::Done(_))
    }

    /// Cancels the call.
    ///
    /// Idempotent and best effort: work that has not started is skipped,
    /// work already running is not interrupted but its result is never
    /// delivered. Results delivered before cancel are not revoked.
    pub fn cancel(&self) {
        if !self.inner.canceled.set() {
            return;
        }
        tracing::debug!("[cancel] call canceled");
        let hooks = self
            .inner
            .cancel_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for hook in hooks.iter() {
            hook();
        }
    }

    /// Registers a hook fired when this call is canceled.
    fn on_cancel(&self, hook: CancelHook) {
        let mut hooks = self
            .inner
            .cancel_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.is_canceled() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(hook);
    }

    /// Propagates cancellation of this call to `parent`.
    fn cancels<P: Send + 'static>(self, parent: &Call<P>) -> Self {
        let parent = parent.clone();
        self.on_cancel(Box::new(move || parent.cancel()));
        self
    }
}

impl<T: Clone + Send + 'static> Call<T> {
    /// Creates a call from a unit of work. The work is not run yet.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> CallResult<T> + Send + 'static,
    {
        Self::with_cancel_flag(move |_| work())
    }

    /// Creates a call whose work can observe the call's cancellation flag.
    pub fn with_cancel_flag<F>(work: F) -> Self
    where
        F: FnOnce(&CancelFlag) -> CallResult<T> + Send + 'static,
    {
        Call {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Idle(Box::new(work))),
                done: Condvar::new(),
                canceled: CancelFlag::default(),
                cancel_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a call that succeeds with `value`.
    pub fn success(value: T) -> Self {
        Self::new(move || Ok(value))
    }

    /// Creates a call that fails with `error`.
    pub fn failure(error: CallError) -> Self {
        Self::new(move || Err(error))
    }

    /// Runs the call on the current thread and returns its result.
    ///
    /// Never panics for failures of the work: panics are caught and returned
    /// as [`CallError::Unknown`]. A call canceled before its work completed
    /// returns [`CallError::Canceled`]; a result stored before the cancel is
    /// returned unchanged.
    pub fn execute(&self) -> CallResult<T> {
        self.run()
    }

    /// Runs the call on the Tokio blocking pool and hands the result to
    /// `callback`, unless the call is canceled before delivery.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(CallResult<T>) + Send + 'static,
    {
        let call = self.clone();
        tokio::task::spawn_blocking(move || {
            let result = call.run();
            if matches!(result, Err(CallError::Canceled)) {
                tracing::debug!("[enqueue] result dropped, call was canceled");
                return;
            }
            callback(result);
        })
    }

    /// Runs the call on the Tokio blocking pool and awaits its result.
    pub async fn await_result(&self) -> CallResult<T> {
        let call = self.clone();
        match tokio::task::spawn_blocking(move || call.execute()).await {
            Ok(result) => result,
            Err(e) => Err(CallError::unknown(format!("call worker failed: {e}"))),
        }
    }

    /// Runs the work once; every other caller waits for and shares the result.
    fn run(&self) -> CallResult<T> {
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match std::mem::replace(&mut *slot, Slot::Running) {
                Slot::Idle(work) => {
                    drop(slot);
                    let result = if self.is_canceled() {
                        Err(CallError::Canceled)
                    } else {
                        let flag = self.inner.canceled.clone();
                        catch_unwind(AssertUnwindSafe(move || work(&flag)))
                            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())))
                    };
                    let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
                    // Decided under the slot lock: a cancel after this point
                    // no longer affects the stored result.
                    let result = if self.is_canceled() {
                        Err(CallError::Canceled)
                    } else {
                        result
                    };
                    *slot = Slot::Done(result.clone());
                    self.inner.done.notify_all();
                    return result;
                }
                Slot::Running => {
                    slot = self
                        .inner
                        .done
                        .wait(slot)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Slot::Done(result) => {
                    *slot = Slot::Done(result.clone());
                    return result;
                }
            }
        }
    }

    /// Transforms a successful value. Errors pass through untouched.
    pub fn map<K, F>(&self, f: F) -> Call<K>
    where
        K: Clone + Send + 'static,
        F: FnOnce(T) -> K + Send + 'static,
    {
        let parent = self.clone();
        Call::new(move || parent.execute().map(f)).cancels(self)
    }

    /// Chains a dependent call built from a successful value.
    pub fn flat_map<K, F>(&self, f: F) -> Call<K>
    where
        K: Clone + Send + 'static,
        F: FnOnce(T) -> Call<K> + Send + 'static,
    {
        let parent = self.clone();
        Call::with_cancel_flag(move |flag| {
            let next = f(parent.execute()?);
            if flag.is_canceled() {
                next.cancel();
            }
            next.execute()
        })
        .cancels(self)
    }

    /// Runs `hook` with the value once, when the call succeeds.
    pub fn on_success<F>(&self, hook: F) -> Call<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let parent = self.clone();
        Call::new(move || {
            let result = parent.execute();
            if let Ok(value) = &result {
                hook(value);
            }
            result
        })
        .cancels(self)
    }

    /// Runs `hook` with the error once, when the call fails.
    pub fn on_error<F>(&self, hook: F) -> Call<T>
    where
        F: FnOnce(&CallError) + Send + 'static,
    {
        let parent = self.clone();
        Call::new(move || {
            let result = parent.execute();
            if let Err(err) = &result {
                hook(err);
            }
            result
        })
        .cancels(self)
    }

    /// Runs `hook` right before the parent work starts.
    pub fn do_on_start<F>(&self, hook: F) -> Call<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let parent = self.clone();
        Call::new(move || {
            hook();
            parent.execute()
        })
        .cancels(self)
    }

    /// Runs `hook` with the terminal result, success or failure.
    pub fn do_on_result<F>(&self, hook: F) -> Call<T>
    where
        F: FnOnce(&CallResult<T>) + Send + 'static,
    {
        let parent = self.clone();
        Call::new(move || {
            let result = parent.execute();
            hook(&result);
            result
        })
        .cancels(self)
    }

    /// Runs `check` first; the parent only runs if the check passes.
    pub fn precondition<F>(&self, check: F) -> Call<T>
    where
        F: FnOnce() -> CallResult<()> + Send + 'static,
    {
        let parent = self.clone();
        Call::new(move || {
            if let Err(err) = check() {
                tracing::debug!("[precondition] rejected: {}", err);
                return Err(err);
            }
            parent.execute()
        })
        .cancels(self)
    }

    /// Runs this call and `other` concurrently and pairs their values.
    ///
    /// Completes once both sides have terminated. If either side fails the
    /// combined call fails with that error; if both fail, the first error
    /// observed wins. A failure never cancels the other side, which may be a
    /// handle shared with other consumers.
    pub fn zip_with<K>(&self, other: &Call<K>) -> Call<(T, K)>
    where
        K: Clone + Send + 'static,
    {
        let a = self.clone();
        let b = other.clone();
        Call::new(move || zip_run(&a, &b))
            .cancels(self)
            .cancels(other)
    }

    /// Three-way variant of [`Call::zip_with`].
    pub fn zip_with3<K, P>(&self, second: &Call<K>, third: &Call<P>) -> Call<(T, K, P)>
    where
        K: Clone + Send + 'static,
        P: Clone + Send + 'static,
    {
        self.zip_with(second)
            .zip_with(third)
            .map(|((a, b), c)| (a, b, c))
    }

    /// Builds a call that re-creates and re-runs work from `factory` while
    /// `policy` allows it.
    pub fn retrying<P, F>(policy: P, factory: F) -> Call<T>
    where
        P: RetryPolicy + 'static,
        F: Fn() -> Call<T> + Send + 'static,
    {
        Call::with_cancel_flag(move |flag| {
            let mut attempt = 1u32;
            loop {
                let result = factory().execute();
                match result {
                    Err(err) if !flag.is_canceled() && policy.should_retry(attempt, &err) => {
                        let delay = policy.retry_interval(attempt);
                        tracing::debug!(
                            "[retrying] attempt {} failed ({}), retrying in {:?}",
                            attempt,
                            err,
                            delay
                        );
                        std::thread::sleep(delay);
                        attempt = attempt.saturating_add(1);
                    }
                    other => return other,
                }
            }
        })
    }

    /// Builds a call that needs a valid token.
    ///
    /// Loads the token if absent and runs the call built by `factory`. On an
    /// auth failure the token is expired, reloaded, and the call is retried
    /// once with the fresh token. Fails with [`CallError::Auth`] when no
    /// token can be obtained.
    pub fn authorized<F>(tokens: Arc<TokenManager>, factory: F) -> Call<T>
    where
        F: Fn(&str) -> Call<T> + Send + 'static,
    {
        Call::new(move || {
            tokens.ensure_token_loaded();
            let token = tokens.get_token();
            if token.is_empty() {
                return Err(CallError::auth("no token available"));
            }
            match factory(token.as_str()).execute() {
                Err(CallError::Auth { message }) => {
                    tracing::info!("[authorized] token rejected ({}), refreshing", message);
                    tokens.expire_token();
                    tokens.ensure_token_loaded();
                    let fresh = tokens.get_token();
                    if fresh.is_empty() {
                        return Err(CallError::auth(message));
                    }
                    factory(fresh.as_str()).execute()
                }
                other => other,
            }
        })
    }
}

enum Side<T, K> {
    Left(CallResult<T>),
    Right(CallResult<K>),
}

fn zip_run<T, K>(a: &Call<T>, b: &Call<K>) -> CallResult<(T, K)>
where
    T: Clone + Send + 'static,
    K: Clone + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Side<T, K>>();
    std::thread::scope(|scope| {
        let tx_right = tx.clone();
        scope.spawn(move || {
            let _ = tx.send(Side::Left(a.execute()));
        });
        scope.spawn(move || {
            let _ = tx_right.send(Side::Right(b.execute()));
        });

        let mut left = None;
        let mut right = None;
        let mut first_error: Option<CallError> = None;
        for side in rx.iter().take(2) {
            match side {
                Side::Left(Ok(value)) => left = Some(value),
                Side::Right(Ok(value)) => right = Some(value),
                Side::Left(Err(err)) | Side::Right(Err(err)) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        match (left, right) {
            (Some(l), Some(r)) => Ok((l, r)),
            _ => Err(CallError::unknown("zipped call ended without both results")),
        }
    })
}

fn panic_error(payload: &(dyn Any + Send)) -> CallError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "call panicked".to_string()
    };
    tracing::warn!("[execute] work panicked: {}", message);
    CallError::unknown(message)
}

/// Decides whether a failed attempt is retried and after how long.
pub trait RetryPolicy: Send + Sync {
    /// Returns true if attempt number `attempt` (1-based) should be retried.
    fn should_retry(&self, attempt: u32, error: &CallError) -> bool;

    /// Returns the delay before the attempt after `attempt`.
    fn retry_interval(&self, attempt: u32) -> Duration;
}

/// Policy that never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _error: &CallError) -> bool {
        false
    }

    fn retry_interval(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Capped exponential backoff over retryable errors.
#[derive(Debug, Clone, Copy)]
pub struct BackoffRetry {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for BackoffRetry {
    fn default() -> Self {
        BackoffRetry {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy for BackoffRetry {
    fn should_retry(&self, attempt: u32, error: &CallError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    fn retry_interval(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[cfg(test)]
#[path = "call_tests.rs"]
mod tests;
