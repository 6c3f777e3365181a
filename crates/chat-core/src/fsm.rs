// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized state/event dispatcher.
//!
//! States and events are closed enums implementing [`Variant`]. A transition
//! table maps `(state kind, event kind)` to a handler producing the next
//! state; pairs with no entry go to the default handler, which stays in
//! place unless overridden.
//!
//! All transitions run under one lock and are totally ordered. A handler
//! may read [`FiniteStateMachine::state`] while its own transition holds the
//! lock, and an event it sends is queued and dispatched right after the
//! current transition.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use thiserror::Error;
use tokio::sync::watch;

/// Maps an enum value to its fieldless discriminant.
pub trait Variant {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<S, E> = Arc<dyn Fn(&S, &E) -> S + Send + Sync>;

/// Handler that keeps the current state.
pub fn stay<S: Clone, E>(state: &S, _event: &E) -> S {
    state.clone()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsmError {
    #[error("state machine has no initial state")]
    MissingInitialState,
}

/// Event handlers registered for one state kind.
pub struct StateBuilder<S: Variant, E: Variant> {
    handlers: HashMap<E::Kind, Handler<S, E>>,
}

impl<S: Variant, E: Variant> StateBuilder<S, E> {
    pub fn on_event<F>(mut self, kind: E::Kind, handler: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }
}

pub struct FsmBuilder<S: Variant, E: Variant> {
    initial: Option<S>,
    table: HashMap<S::Kind, HashMap<E::Kind, Handler<S, E>>>,
    default_handler: Option<Handler<S, E>>,
}

impl<S: Variant, E: Variant> Default for FsmBuilder<S, E> {
    fn default() -> Self {
        FsmBuilder {
            initial: None,
            table: HashMap::new(),
            default_handler: None,
        }
    }
}

impl<S, E> FsmBuilder<S, E>
where
    S: Variant + Clone + Debug + Send + Sync + 'static,
    E: Variant + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_state(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Registers the handlers for `kind`. Registering a kind twice merges
    /// the handler sets, later handlers winning.
    pub fn state<F>(mut self, kind: S::Kind, configure: F) -> Self
    where
        F: FnOnce(StateBuilder<S, E>) -> StateBuilder<S, E>,
    {
        let built = configure(StateBuilder {
            handlers: HashMap::new(),
        });
        self.table.entry(kind).or_default().extend(built.handlers);
        self
    }

    /// Handler for every pair with no registered entry.
    pub fn default_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<FiniteStateMachine<S, E>, FsmError> {
        let initial = self.initial.ok_or(FsmError::MissingInitialState)?;
        let default_handler: Handler<S, E> = match self.default_handler {
            Some(handler) => handler,
            None => Arc::new(|state: &S, event: &E| {
                tracing::debug!("[fsm] unhandled {:?} in {:?}, staying", event, state);
                state.clone()
            }),
        };
        let (observer, _) = watch::channel(initial.clone());
        Ok(FiniteStateMachine {
            table: self.table,
            default_handler,
            transition: Mutex::new(()),
            owner: Mutex::new(None),
            cell: Mutex::new(initial),
            pending: Mutex::new(VecDeque::new()),
            observer,
        })
    }
}

pub struct FiniteStateMachine<S: Variant, E: Variant> {
    table: HashMap<S::Kind, HashMap<E::Kind, Handler<S, E>>>,
    default_handler: Handler<S, E>,
    transition: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
    cell: Mutex<S>,
    pending: Mutex<VecDeque<E>>,
    observer: watch::Sender<S>,
}

/// Clears the owning thread when the transition ends, even on unwind.
struct OwnerGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl<S, E> FiniteStateMachine<S, E>
where
    S: Variant + Clone + Debug + Send + Sync + 'static,
    E: Variant + Debug + Send + 'static,
{
    pub fn builder() -> FsmBuilder<S, E> {
        FsmBuilder::new()
    }

    /// Current state. Never observes a partial transition.
    pub fn state(&self) -> S {
        if self.in_transition() {
            return self.read_cell();
        }
        let _guard = self.lock_transition();
        self.read_cell()
    }

    /// Dispatches `event`. The only way to change the state.
    ///
    /// Called from inside a handler, the event is queued and dispatched
    /// after the running transition completes.
    pub fn send_event(&self, event: E) {
        if self.in_transition() {
            tracing::trace!("[fsm] queueing {:?} sent from a handler", event);
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(event);
            return;
        }

        let _guard = self.lock_transition();
        *self.owner.lock().unwrap_or_else(|e| e.into_inner()) = Some(std::thread::current().id());
        let _owner = OwnerGuard(&self.owner);

        let mut next = Some(event);
        while let Some(event) = next {
            self.apply(&event);
            next = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
        }
    }

    /// Receiver that sees every state the machine enters.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.observer.subscribe()
    }

    fn apply(&self, event: &E) {
        let current = self.read_cell();
        let handler = self
            .table
            .get(&current.kind())
            .and_then(|handlers| handlers.get(&event.kind()))
            .unwrap_or(&self.default_handler);
        let next = handler(&current, event);
        tracing::debug!("[fsm] {:?} --{:?}--> {:?}", current.kind(), event.kind(), next.kind());
        *self.cell.lock().unwrap_or_else(|e| e.into_inner()) = next.clone();
        self.observer.send_replace(next);
    }

    fn in_transition(&self) -> bool {
        *self.owner.lock().unwrap_or_else(|e| e.into_inner()) == Some(std::thread::current().id())
    }

    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_cell(&self) -> S {
        self.cell.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<S: Variant + Debug, E: Variant> Debug for FiniteStateMachine<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiniteStateMachine")
            .field("state", &*self.cell.lock().unwrap_or_else(|e| e.into_inner()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "fsm_tests.rs"]
mod tests;
