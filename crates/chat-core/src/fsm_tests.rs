// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Conn {
    Disconnected,
    Connecting { attempt: u32 },
    Connected { connection_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConnKind {
    Disconnected,
    Connecting,
    Connected,
}

impl Variant for Conn {
    type Kind = ConnKind;

    fn kind(&self) -> ConnKind {
        match self {
            Conn::Disconnected => ConnKind::Disconnected,
            Conn::Connecting { .. } => ConnKind::Connecting,
            Conn::Connected { .. } => ConnKind::Connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Ev {
    Connect,
    Established(String),
    Lost,
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EvKind {
    Connect,
    Established,
    Lost,
    Ping,
}

impl Variant for Ev {
    type Kind = EvKind;

    fn kind(&self) -> EvKind {
        match self {
            Ev::Connect => EvKind::Connect,
            Ev::Established(_) => EvKind::Established,
            Ev::Lost => EvKind::Lost,
            Ev::Ping => EvKind::Ping,
        }
    }
}

fn connection_builder() -> FsmBuilder<Conn, Ev> {
    FiniteStateMachine::builder()
        .initial_state(Conn::Disconnected)
        .state(ConnKind::Disconnected, |s| {
            s.on_event(EvKind::Connect, |_, _| Conn::Connecting { attempt: 1 })
        })
        .state(ConnKind::Connecting, |s| {
            s.on_event(EvKind::Established, |_, event| match event {
                Ev::Established(id) => Conn::Connected {
                    connection_id: id.clone(),
                },
                _ => Conn::Disconnected,
            })
            .on_event(EvKind::Lost, |state, _| match state {
                Conn::Connecting { attempt } => Conn::Connecting {
                    attempt: attempt + 1,
                },
                other => other.clone(),
            })
        })
        .state(ConnKind::Connected, |s| {
            s.on_event(EvKind::Lost, |_, _| Conn::Disconnected)
                .on_event(EvKind::Ping, stay)
        })
}

#[test]
fn transitions_follow_table() {
    let fsm = connection_builder().build().unwrap();
    assert_eq!(fsm.state(), Conn::Disconnected);

    fsm.send_event(Ev::Connect);
    assert_eq!(fsm.state(), Conn::Connecting { attempt: 1 });

    fsm.send_event(Ev::Lost);
    assert_eq!(fsm.state(), Conn::Connecting { attempt: 2 });

    fsm.send_event(Ev::Established("c-1".into()));
    assert_eq!(
        fsm.state(),
        Conn::Connected {
            connection_id: "c-1".into()
        }
    );

    fsm.send_event(Ev::Lost);
    assert_eq!(fsm.state(), Conn::Disconnected);
}

#[test]
fn unhandled_event_leaves_state_unchanged() {
    let fsm = connection_builder().build().unwrap();

    fsm.send_event(Ev::Ping);
    fsm.send_event(Ev::Lost);
    fsm.send_event(Ev::Established("ignored".into()));

    assert_eq!(fsm.state(), Conn::Disconnected);
}

#[test]
fn custom_default_handler_covers_unmodeled_pairs() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let fsm = connection_builder()
        .default_handler(move |state, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            state.clone()
        })
        .build()
        .unwrap();

    fsm.send_event(Ev::Ping);
    fsm.send_event(Ev::Connect);
    fsm.send_event(Ev::Connect);

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(fsm.state(), Conn::Connecting { attempt: 1 });
}

#[test]
fn build_requires_initial_state() {
    let result = FsmBuilder::<Conn, Ev>::new()
        .state(ConnKind::Disconnected, |s| s)
        .build();
    assert_eq!(result.err(), Some(FsmError::MissingInitialState));
}

#[test]
fn handler_can_read_state_without_deadlock() {
    let slot: Arc<OnceLock<Arc<FiniteStateMachine<Conn, Ev>>>> = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(None));
    let (slot_in, seen_in) = (Arc::clone(&slot), Arc::clone(&seen));

    let fsm = Arc::new(
        FiniteStateMachine::builder()
            .initial_state(Conn::Disconnected)
            .state(ConnKind::Disconnected, move |s| {
                s.on_event(EvKind::Connect, move |_, _| {
                    let inner = slot_in.get().unwrap().state();
                    *seen_in.lock().unwrap() = Some(inner);
                    Conn::Connecting { attempt: 1 }
                })
            })
            .build()
            .unwrap(),
    );
    slot.set(Arc::clone(&fsm)).ok().unwrap();

    fsm.send_event(Ev::Connect);

    assert_eq!(*seen.lock().unwrap(), Some(Conn::Disconnected));
    assert_eq!(fsm.state(), Conn::Connecting { attempt: 1 });
}

#[test]
fn event_sent_from_handler_runs_after_current_transition() {
    let slot: Arc<OnceLock<Arc<FiniteStateMachine<Conn, Ev>>>> = Arc::new(OnceLock::new());
    let slot_in = Arc::clone(&slot);

    let fsm = Arc::new(
        connection_builder()
            .state(ConnKind::Disconnected, move |s| {
                s.on_event(EvKind::Connect, move |_, _| {
                    slot_in
                        .get()
                        .unwrap()
                        .send_event(Ev::Established("auto".into()));
                    Conn::Connecting { attempt: 1 }
                })
            })
            .build()
            .unwrap(),
    );
    slot.set(Arc::clone(&fsm)).ok().unwrap();

    fsm.send_event(Ev::Connect);

    assert_eq!(
        fsm.state(),
        Conn::Connected {
            connection_id: "auto".into()
        }
    );
}

#[test]
fn concurrent_reads_never_disturb_transitions() {
    let fsm = Arc::new(connection_builder().build().unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let fsm = Arc::clone(&fsm);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut reads = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let _ = fsm.state();
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for round in 0..200 {
        fsm.send_event(Ev::Connect);
        assert_eq!(fsm.state(), Conn::Connecting { attempt: 1 });
        fsm.send_event(Ev::Established(format!("c-{round}")));
        assert_eq!(
            fsm.state(),
            Conn::Connected {
                connection_id: format!("c-{round}")
            }
        );
        fsm.send_event(Ev::Lost);
        assert_eq!(fsm.state(), Conn::Disconnected);
    }

    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn concurrent_senders_are_serialized() {
    let fsm = Arc::new(
        FiniteStateMachine::<Conn, Ev>::builder()
            .initial_state(Conn::Connecting { attempt: 0 })
            .state(ConnKind::Connecting, |s| {
                s.on_event(EvKind::Lost, |state, _| match state {
                    Conn::Connecting { attempt } => Conn::Connecting {
                        attempt: attempt + 1,
                    },
                    other => other.clone(),
                })
            })
            .build()
            .unwrap(),
    );

    let senders: Vec<_> = (0..8)
        .map(|_| {
            let fsm = Arc::clone(&fsm);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    fsm.send_event(Ev::Lost);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert_eq!(fsm.state(), Conn::Connecting { attempt: 800 });
}

#[test]
fn subscribers_observe_latest_state() {
    let fsm = connection_builder().build().unwrap();
    let mut rx = fsm.subscribe();
    assert_eq!(*rx.borrow_and_update(), Conn::Disconnected);

    fsm.send_event(Ev::Connect);

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), Conn::Connecting { attempt: 1 });
}
