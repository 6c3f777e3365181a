// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: a scripted in-process backend and a manual clock.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chat_core::{Call, CallError, CallResult, ClockSource};
use chrono::{DateTime, TimeZone, Utc};

use crate::backend::ChatBackend;
use crate::models::{
    Channel, ChannelSnapshot, ChatEvent, Message, QueryChannelsRequest, Reaction, Timestamp,
};

/// Scripted server behaviour. Unscripted operations succeed.
#[derive(Default)]
pub struct Script {
    /// Server copy of each channel, returned by watch and full refetch.
    pub channels: HashMap<String, ChannelSnapshot>,
    /// History replay result per cid. Missing entries replay nothing.
    pub history: HashMap<String, CallResult<Vec<ChatEvent>>>,
    /// Channels whose watch fails with a network error.
    pub unreachable: HashSet<String>,
    pub send_error: Option<CallError>,
    pub reaction_error: Option<CallError>,
    pub create_channel_error: Option<CallError>,
    /// Tokens answered with an auth error.
    pub rejected_tokens: HashSet<String>,
    pub connect_error: Option<CallError>,
    pub query_channels: Vec<Channel>,
    /// Errors returned by the next channel queries, one per query.
    pub query_channels_errors: Vec<CallError>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<Script>,
    log: Mutex<Vec<String>>,
}

impl Inner {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Inner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.inner.script.lock().unwrap());
    }

    /// Registers the server copy of a channel.
    pub fn serve_channel(&self, channel: Channel, messages: Vec<Message>) {
        self.script(|s| {
            s.channels
                .insert(channel.cid.clone(), ChannelSnapshot { channel, messages });
        });
    }

    /// Every executed operation, in order, as `op:arg`.
    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.log()
            .iter()
            .filter(|entry| entry.starts_with(&prefix))
            .count()
    }

    fn call<T, F>(&self, entry: String, work: F) -> Call<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&mut Script) -> CallResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        Call::new(move || {
            inner.record(entry);
            inner.with_script(work)
        })
    }
}

fn snapshot_of(script: &Script, cid: &str) -> ChannelSnapshot {
    script.channels.get(cid).cloned().unwrap_or_else(|| {
        let (channel_type, id) = cid.split_once(':').unwrap_or(("messaging", cid));
        ChannelSnapshot {
            channel: Channel::new(channel_type, id),
            messages: Vec::new(),
        }
    })
}

impl ChatBackend for FakeBackend {
    fn connect(&self, user_id: &str, token: &str) -> Call<String> {
        let user_id = user_id.to_string();
        let token = token.to_string();
        self.call(format!("connect:{token}"), move |s| {
            if s.rejected_tokens.contains(&token) {
                return Err(CallError::auth(format!("token {token} expired")));
            }
            match &s.connect_error {
                Some(e) => Err(e.clone()),
                None => Ok(format!("conn-{user_id}")),
            }
        })
    }

    fn disconnect(&self) -> Call<()> {
        self.call("disconnect:".into(), |_| Ok(()))
    }

    fn watch_channel(&self, cid: &str) -> Call<Channel> {
        let cid = cid.to_string();
        self.call(format!("watch_channel:{cid}"), move |s| {
            if s.unreachable.contains(&cid) {
                return Err(CallError::network(format!("{cid} unreachable")));
            }
            Ok(snapshot_of(s, &cid).channel)
        })
    }

    fn query_channel(&self, cid: &str) -> Call<ChannelSnapshot> {
        let cid = cid.to_string();
        self.call(format!("query_channel:{cid}"), move |s| {
            Ok(snapshot_of(s, &cid))
        })
    }

    fn query_channels(&self, token: &str, request: &QueryChannelsRequest) -> Call<Vec<Channel>> {
        let token = token.to_string();
        let entry = format!("query_channels:{}", request.member_id);
        self.call(entry, move |s| {
            if s.rejected_tokens.contains(&token) {
                return Err(CallError::auth("token expired"));
            }
            if !s.query_channels_errors.is_empty() {
                return Err(s.query_channels_errors.remove(0));
            }
            Ok(s.query_channels.clone())
        })
    }

    fn sync_history(&self, cids: &[String], _since: Timestamp) -> Call<Vec<ChatEvent>> {
        let cids = cids.to_vec();
        self.call(format!("sync_history:{}", cids.join(",")), move |s| {
            let mut events = Vec::new();
            for cid in &cids {
                match s.history.get(cid) {
                    Some(Ok(replay)) => events.extend(replay.iter().cloned()),
                    Some(Err(e)) => return Err(e.clone()),
                    None => {}
                }
            }
            Ok(events)
        })
    }

    fn create_channel(&self, channel: &Channel) -> Call<Channel> {
        let channel = channel.clone();
        self.call(format!("create_channel:{}", channel.cid), move |s| {
            match &s.create_channel_error {
                Some(e) => Err(e.clone()),
                None => Ok(channel),
            }
        })
    }

    fn send_message(&self, message: &Message) -> Call<Message> {
        let mut message = message.clone();
        self.call(format!("send_message:{}", message.id), move |s| {
            match &s.send_error {
                Some(e) => Err(e.clone()),
                None => {
                    message.created_at = Some(message.created_at.unwrap_or_else(Utc::now));
                    Ok(message)
                }
            }
        })
    }

    fn update_message(&self, message: &Message) -> Call<Message> {
        let message = message.clone();
        self.call(format!("update_message:{}", message.id), move |s| {
            match &s.send_error {
                Some(e) => Err(e.clone()),
                None => Ok(message),
            }
        })
    }

    fn delete_message(&self, message_id: &str) -> Call<Message> {
        let message_id = message_id.to_string();
        self.call(format!("delete_message:{message_id}"), move |s| {
            match &s.send_error {
                Some(e) => Err(e.clone()),
                None => Ok(Message::new(message_id, "messaging:unknown", "server", "")),
            }
        })
    }

    fn send_reaction(&self, reaction: &Reaction) -> Call<Reaction> {
        let reaction = reaction.clone();
        self.call(format!("send_reaction:{}", reaction.id), move |s| {
            match &s.reaction_error {
                Some(e) => Err(e.clone()),
                None => Ok(reaction),
            }
        })
    }

    fn delete_reaction(&self, message_id: &str, reaction_type: &str) -> Call<()> {
        let entry = format!("delete_reaction:{message_id}/{reaction_type}");
        self.call(entry, move |s| match &s.reaction_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        })
    }
}

/// Clock driven by the test.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn at(time: Timestamp) -> Arc<Self> {
        let clock = Arc::new(Self::default());
        clock.set(time);
        clock
    }

    pub fn set(&self, time: Timestamp) {
        self.0
            .store(u64::try_from(time.timestamp_millis()).unwrap(), Ordering::SeqCst);
    }

    pub fn now(&self) -> Timestamp {
        DateTime::from_timestamp_millis(i64::try_from(self.now_ms()).unwrap()).unwrap()
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// 2026-03-01 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).unwrap()
}
