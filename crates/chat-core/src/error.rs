// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for call results.
//!
//! Every failure that crosses a [`Call`](crate::Call) boundary is a
//! [`CallError`]. Errors are cloneable so a single result can be delivered to
//! every caller sharing a call.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Shared, type-erased cause attached to an error.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient transport failure.
    Network,
    /// Token invalid or expired.
    Auth,
    /// Caller supplied bad input.
    Validation,
    /// Non-2xx response from the backend.
    Server,
    /// Unexpected failure caught at a call boundary.
    Unknown,
    /// The call was canceled before its result was delivered.
    Canceled,
}

impl ErrorKind {
    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure outcome of a call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("auth error: {message}")]
    Auth { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("server error {status} (code {code}): {message}")]
    Server {
        status: u16,
        code: i32,
        message: String,
    },

    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("call was canceled")]
    Canceled,
}

impl CallError {
    /// Creates a network error without a cause.
    pub fn network(message: impl Into<String>) -> Self {
        CallError::Network {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        CallError::Auth {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        CallError::Validation {
            message: message.into(),
        }
    }

    /// Creates a server error.
    pub fn server(status: u16, code: i32, message: impl Into<String>) -> Self {
        CallError::Server {
            status,
            code,
            message: message.into(),
        }
    }

    /// Creates an unknown error without a cause.
    pub fn unknown(message: impl Into<String>) -> Self {
        CallError::Unknown {
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps an arbitrary error as [`CallError::Unknown`], keeping it as the cause.
    pub fn wrap<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CallError::Unknown {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Network { .. } => ErrorKind::Network,
            CallError::Auth { .. } => ErrorKind::Auth,
            CallError::Validation { .. } => ErrorKind::Validation,
            CallError::Server { .. } => ErrorKind::Server,
            CallError::Unknown { .. } => ErrorKind::Unknown,
            CallError::Canceled => ErrorKind::Canceled,
        }
    }

    /// Returns the human-readable message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            CallError::Network { message, .. }
            | CallError::Auth { message }
            | CallError::Validation { message }
            | CallError::Server { message, .. }
            | CallError::Unknown { message, .. } => message,
            CallError::Canceled => "call was canceled",
        }
    }

    /// Returns true if retrying the same request may succeed.
    ///
    /// Network failures, 5xx responses and unexpected failures are retryable.
    /// Auth failures are handled by token refresh, not blind retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Network { .. } | CallError::Unknown { .. } => true,
            CallError::Server { status, .. } => *status >= 500,
            CallError::Auth { .. } | CallError::Validation { .. } | CallError::Canceled => false,
        }
    }

    /// Returns true if the request can never succeed as-is.
    pub fn is_permanent(&self) -> bool {
        match self {
            CallError::Validation { .. } => true,
            CallError::Server { status, .. } => (400..500).contains(status) && *status != 429,
            _ => false,
        }
    }
}

impl PartialEq for CallError {
    /// Errors compare by kind and message; causes are ignored.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                CallError::Server {
                    status: s1,
                    code: c1,
                    message: m1,
                },
                CallError::Server {
                    status: s2,
                    code: c2,
                    message: m2,
                },
            ) => s1 == s2 && c1 == c2 && m1 == m2,
            _ => self.kind() == other.kind() && self.message() == other.message(),
        }
    }
}

impl Eq for CallError {}

/// Result of executing a call.
pub type CallResult<T> = std::result::Result<T, CallError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
