// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! chat-core: call and coordination primitives for the chat client runtime.
//!
//! Every SDK feature (send message, query channels, add reaction, connect)
//! is expressed as a [`Call`]. The primitives in this crate compose, share,
//! authorize and sequence those calls:
//!
//! - [`Call`]: deferred, cancellable unit of work with `map`/`zip` combinators
//! - [`CacheCoordinator`]: TTL de-duplication of identical calls
//! - [`TokenManager`] / [`CachedTokenProvider`]: single-flight credentials
//! - [`FiniteStateMachine`]: serialized state/event dispatcher
//!
//! No component is a process-wide singleton; whoever builds a client session
//! owns one instance of each.

pub mod cache;
pub mod call;
pub mod clock;
pub mod error;
pub mod fsm;
pub mod token;

pub use cache::{fingerprint, CacheCoordinator};
pub use call::{BackoffRetry, Call, CancelFlag, NoRetry, RetryPolicy};
pub use clock::{ClockSource, SystemClock};
pub use error::{CallError, CallResult, ErrorKind};
pub use fsm::{stay, FiniteStateMachine, FsmBuilder, FsmError, StateBuilder, Variant};
pub use token::{CachedTokenProvider, Token, TokenManager, TokenProvider};
