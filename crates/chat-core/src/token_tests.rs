// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::Call;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::time::Duration;

/// Provider that hands out `token-1`, `token-2`, ... and counts fetches.
struct CountingProvider {
    fetches: AtomicUsize,
    delay: Duration,
}

impl CountingProvider {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(CountingProvider {
            fetches: AtomicUsize::new(0),
            delay,
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl TokenProvider for CountingProvider {
    fn load_token(&self) -> CallResult<Token> {
        std::thread::sleep(self.delay);
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::new(format!("token-{n}")))
    }
}

/// Provider whose first fetch blocks until released and yields `stale`;
/// later fetches yield `fresh` immediately.
struct GatedProvider {
    calls: AtomicUsize,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl GatedProvider {
    fn new() -> (Arc<Self>, mpsc::Sender<()>) {
        let (release, gate) = mpsc::channel();
        let provider = Arc::new(GatedProvider {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(gate),
        });
        (provider, release)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn wait_for_first_call(&self) {
        while self.calls() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl TokenProvider for GatedProvider {
    fn load_token(&self) -> CallResult<Token> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.gate.lock().unwrap().recv();
            return Ok(Token::new("stale"));
        }
        Ok(Token::new("fresh"))
    }
}

#[test]
fn concurrent_get_token_fetches_once() {
    let provider = CountingProvider::new(Duration::from_millis(100));
    let cached = Arc::new(CachedTokenProvider::new(provider.clone()));
    let barrier = Arc::new(Barrier::new(10));
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cached = Arc::clone(&cached);
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            std::thread::spawn(move || {
                barrier.wait();
                cached.get_token(move |result| {
                    tx.send(result).unwrap();
                });
            })
        })
        .collect();
    drop(tx);
    for handle in handles {
        handle.join().unwrap();
    }

    let results: Vec<_> = rx.iter().collect();
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r == &Ok(Token::from("token-1"))));
    assert_eq!(provider.fetches(), 1);
}

#[test]
fn cached_token_is_delivered_without_fetch() {
    let provider = CountingProvider::new(Duration::ZERO);
    let cached = CachedTokenProvider::new(provider.clone());

    assert_eq!(cached.load_blocking(), Ok(Token::from("token-1")));
    assert_eq!(cached.load_blocking(), Ok(Token::from("token-1")));
    assert_eq!(provider.fetches(), 1);

    cached.invalidate();
    assert_eq!(cached.load_blocking(), Ok(Token::from("token-2")));
    assert_eq!(provider.fetches(), 2);
}

#[test]
fn failed_fetch_is_not_cached() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let cached = CachedTokenProvider::new(Arc::new(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(CallError::network("auth server unreachable"))
        } else {
            Ok(Token::from("recovered"))
        }
    }));

    assert_eq!(
        cached.load_blocking(),
        Err(CallError::network("auth server unreachable"))
    );
    assert_eq!(cached.load_blocking(), Ok(Token::from("recovered")));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn panicking_provider_releases_waiters() {
    #[allow(clippy::panic)]
    let cached = CachedTokenProvider::new(Arc::new(|| -> CallResult<Token> {
        panic!("no keychain")
    }));

    let err = cached.load_blocking().unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Unknown);
    // The fetch flag must have been reset.
    assert!(cached.load_blocking().is_err());
}

#[test]
fn manager_without_provider() {
    let manager = TokenManager::new();

    assert!(!manager.has_token_provider());
    assert!(!manager.has_token());
    assert!(manager.load_sync().is_empty());

    manager.ensure_token_loaded();
    assert!(!manager.has_token());
}

#[test]
fn ensure_token_loaded_loads_once() {
    let provider = CountingProvider::new(Duration::ZERO);
    let manager = TokenManager::with_provider(provider.clone());

    assert!(manager.has_token_provider());
    assert!(!manager.has_token());

    manager.ensure_token_loaded();
    manager.ensure_token_loaded();

    assert_eq!(manager.get_token(), Token::from("token-1"));
    assert_eq!(provider.fetches(), 1);
}

#[test]
fn expire_token_forces_refetch() {
    let provider = CountingProvider::new(Duration::ZERO);
    let manager = TokenManager::with_provider(provider.clone());
    manager.ensure_token_loaded();

    manager.expire_token();
    assert!(!manager.has_token());

    manager.ensure_token_loaded();
    assert_eq!(manager.get_token(), Token::from("token-2"));
}

#[test]
fn provider_failure_degrades_to_empty_token() {
    let manager = TokenManager::with_provider(Arc::new(|| -> CallResult<Token> {
        Err(CallError::server(503, 0, "unavailable"))
    }));

    let token = manager.load_sync();

    assert!(token.is_empty());
    assert!(!manager.has_token());
}

#[test]
fn set_token_provider_clears_current_token() {
    let manager = TokenManager::with_provider(Arc::new(|| -> CallResult<Token> {
        Ok(Token::from("first"))
    }));
    manager.ensure_token_loaded();
    assert!(manager.has_token());

    manager.set_token_provider(Arc::new(|| -> CallResult<Token> {
        Ok(Token::from("second"))
    }));
    assert!(!manager.has_token());

    manager.ensure_token_loaded();
    assert_eq!(manager.get_token(), Token::from("second"));
}

#[test]
fn token_debug_is_redacted() {
    assert_eq!(format!("{:?}", Token::from("secret")), "Token(<redacted>)");
    assert_eq!(format!("{:?}", Token::empty()), "Token(<empty>)");
}

#[test]
fn authorized_call_passes_current_token() {
    let provider: Arc<dyn TokenProvider> = Arc::new(|| -> CallResult<Token> { Ok(Token::from("jwt")) });
    let manager = Arc::new(TokenManager::with_provider(provider));

    let call = Call::authorized(manager, |token| Call::success(format!("Bearer {token}")));

    assert_eq!(call.execute(), Ok("Bearer jwt".to_string()));
}

#[test]
fn authorized_call_retries_once_after_auth_failure() {
    let provider = CountingProvider::new(Duration::ZERO);
    let manager = Arc::new(TokenManager::with_provider(provider.clone()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let call = Call::authorized(manager, move |token| {
        counter.fetch_add(1, Ordering::SeqCst);
        if token == "token-1" {
            Call::failure(CallError::auth("token expired"))
        } else {
            Call::success(token.to_string())
        }
    });

    assert_eq!(call.execute(), Ok("token-2".to_string()));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(provider.fetches(), 2);
}

#[test]
fn authorized_call_gives_up_after_second_auth_failure() {
    let manager = Arc::new(TokenManager::with_provider(CountingProvider::new(
        Duration::ZERO,
    )));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let call = Call::<()>::authorized(manager, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Call::failure(CallError::auth("revoked"))
    });

    assert_eq!(call.execute(), Err(CallError::auth("revoked")));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn authorized_call_without_token_fails_fast() {
    let manager = Arc::new(TokenManager::new());
    let call = Call::<()>::authorized(manager, |_| Call::success(()));

    assert_eq!(call.execute().unwrap_err().kind(), crate::ErrorKind::Auth);
}

#[test]
fn invalidate_during_fetch_discards_stale_token() {
    let (provider, release) = GatedProvider::new();
    let cached = Arc::new(CachedTokenProvider::new(provider.clone()));
    let first = {
        let cached = Arc::clone(&cached);
        std::thread::spawn(move || cached.load_blocking())
    };
    provider.wait_for_first_call();

    cached.invalidate();
    assert_eq!(cached.load_blocking(), Ok(Token::from("fresh")));

    release.send(()).unwrap();
    assert_eq!(first.join().unwrap(), Ok(Token::from("stale")));
    assert_eq!(cached.load_blocking(), Ok(Token::from("fresh")));
    assert_eq!(provider.calls(), 2);
}

#[test]
fn expire_during_load_keeps_fresh_token() {
    let (provider, release) = GatedProvider::new();
    let manager = Arc::new(TokenManager::with_provider(provider.clone()));
    let first = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.load_sync())
    };
    provider.wait_for_first_call();

    manager.expire_token();
    manager.ensure_token_loaded();
    assert_eq!(manager.get_token(), Token::from("fresh"));

    release.send(()).unwrap();
    assert_eq!(first.join().unwrap(), Token::from("stale"));
    assert_eq!(manager.get_token(), Token::from("fresh"));
}
