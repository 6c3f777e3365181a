// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use tempfile::TempDir;
use yare::parameterized;

#[test]
fn empty_file_yields_defaults() {
    let config = ClientConfig::from_toml_str("").unwrap();
    assert_eq!(config, ClientConfig::default());
    assert_eq!(config.cache_ttl(), Duration::from_secs(3));
    assert_eq!(config.sync.max_threshold(), Duration::from_secs(12 * 3600));
    assert_eq!(config.retry.max_attempts, 0);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = ClientConfig::from_toml_str(
        r#"
cache_ttl_ms = 0

[retry]
max_attempts = 5
"#,
    )
    .unwrap();

    assert_eq!(config.cache_ttl_ms, 0);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.initial_delay_ms, 500);
    assert_eq!(config.sync, SyncConfig::default());
}

#[parameterized(
    zero_window = { "[sync]\nreplay_window_secs = 0", "replay_window_secs" },
    zero_delay = { "[retry]\ninitial_delay_ms = 0", "initial_delay_ms must be positive" },
    inverted_delays = { "[retry]\ninitial_delay_ms = 5000\nmax_delay_ms = 100", "exceeds" },
    zero_call_attempts = { "[retry]\ncall_attempts = 0", "call_attempts" },
    bad_log_filter = { "log_filter = \"chat_offline=loudest\"", "log_filter" },
)]
fn invalid_values_are_rejected(toml: &str, needle: &str) {
    let err = ClientConfig::from_toml_str(toml).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains(needle), "{err}");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = ClientConfig::from_toml_str("cache_ttl_ms = \"soon\"").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("client.toml");
    let config = ClientConfig {
        database_path: Some(dir.path().join("offline.db")),
        cache_ttl_ms: 250,
        ..ClientConfig::default()
    };

    config.save(&path).unwrap();

    assert_eq!(ClientConfig::load(&path).unwrap(), config);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = ClientConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn init_logging_uses_configured_filter() {
    let config = ClientConfig::from_toml_str("log_filter = \"chat_offline=debug\"").unwrap();
    assert_eq!(config.log_filter, "chat_offline=debug");

    let _ = config.init_logging();
    assert!(!config.init_logging());
}

#[test]
fn call_policy_follows_retry_table() {
    let config =
        ClientConfig::from_toml_str("[retry]\ninitial_delay_ms = 10\nmax_delay_ms = 40\ncall_attempts = 4")
            .unwrap();
    let policy = config.retry.call_policy();

    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.initial_delay, Duration::from_millis(10));
    assert_eq!(policy.max_delay, Duration::from_millis(40));
}
