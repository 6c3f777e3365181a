// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber setup for applications embedding the client.
//!
//! `RUST_LOG` wins over the configured filter. Both functions return false
//! when a global subscriber is already installed.

use std::fs;
use std::path::Path;

use tracing_subscriber::EnvFilter;

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Logs to stderr.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Appends to `log_path`, falling back to stderr if it cannot be opened.
pub fn init_with_file(log_path: &Path, default_filter: &str) -> bool {
    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter(default_filter))
            .with_writer(file)
            .with_ansi(false)
            .try_init()
            .is_ok(),
        Err(_) => init(default_filter),
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
