// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline reconciliation.
//!
//! After a connectivity gap the coordinator re-watches the active channels,
//! replays the events missed since the persisted bookmark and applies them to
//! the local store as idempotent upserts. Gaps that are too old, or that the
//! server refuses to replay, fall back to a full channel refetch.
//!
//! Nothing here fails the foreground: sends are stored optimistically and
//! delivered independently, and failed replays are handed to the
//! [`SyncScheduler`] with exclusive-replace semantics.
//!
//! ```text
//!  Idle ──Start──► Syncing ──Finish──► Idle
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use chat_core::{
    CallError, CallResult, ClockSource, FiniteStateMachine, FsmError, SystemClock, Variant,
};
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::{ChatBackend, Connectivity};
use crate::config::{ClientConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::models::{ChatEvent, Message, Reaction, SyncState, SyncStatus, Timestamp};
use crate::repository::RepositoryFacade;
use crate::scheduler::SyncScheduler;

const RETRY_ENTITIES_JOB: &str = "retry:entities";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    Syncing,
}

impl Variant for SyncPhase {
    type Kind = SyncPhase;

    fn kind(&self) -> SyncPhase {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSignal {
    Start,
    Finish,
}

impl Variant for SyncSignal {
    type Kind = SyncSignal;

    fn kind(&self) -> SyncSignal {
        *self
    }
}

/// Result of one [`SyncCoordinator::sync`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to sync.
    Skipped,
    /// Offline; per-channel retries were scheduled.
    Deferred,
    /// Every channel synced and the bookmark advanced.
    Completed { channels: usize, events: usize },
    /// Some channels failed and were scheduled for retry. The bookmark did
    /// not move.
    Partial {
        synced: Vec<String>,
        failed: Vec<String>,
    },
}

/// Counts of one [`SyncCoordinator::retry_failed_entities`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Delivered to the server.
    pub sent: usize,
    /// Too old to resend; removed locally.
    pub dropped: usize,
    /// Marked [`SyncStatus::FailedPermanently`].
    pub failed: usize,
    /// Transient failures left for the next pass.
    pub pending: usize,
}

enum Delivery {
    Sent,
    Dropped,
    Failed,
    Pending,
}

impl RetryReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.sent += 1,
            Delivery::Dropped => self.dropped += 1,
            Delivery::Failed => self.failed += 1,
            Delivery::Pending => self.pending += 1,
        }
    }
}

#[derive(Debug, Default)]
struct ChannelReport {
    events: usize,
    latest: Option<Timestamp>,
}

pub struct SyncCoordinator {
    this: Weak<SyncCoordinator>,
    user_id: String,
    repo: Arc<dyn RepositoryFacade>,
    backend: Arc<dyn ChatBackend>,
    connectivity: Connectivity,
    scheduler: SyncScheduler,
    config: SyncConfig,
    clock: Arc<dyn ClockSource>,
    phase: FiniteStateMachine<SyncPhase, SyncSignal>,
    sync_lock: AsyncMutex<()>,
    retry_lock: AsyncMutex<()>,
}

/// Returns the phase to `Idle` when a sync pass ends, even if its future is
/// dropped.
struct PhaseGuard<'a>(&'a FiniteStateMachine<SyncPhase, SyncSignal>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.send_event(SyncSignal::Finish);
    }
}

fn phase_machine() -> Result<FiniteStateMachine<SyncPhase, SyncSignal>, FsmError> {
    FiniteStateMachine::builder()
        .initial_state(SyncPhase::Idle)
        .state(SyncPhase::Idle, |s| {
            s.on_event(SyncSignal::Start, |_, _| SyncPhase::Syncing)
        })
        .state(SyncPhase::Syncing, |s| {
            s.on_event(SyncSignal::Finish, |_, _| SyncPhase::Idle)
        })
        .build()
}

impl SyncCoordinator {
    pub fn new(
        user_id: impl Into<String>,
        repo: Arc<dyn RepositoryFacade>,
        backend: Arc<dyn ChatBackend>,
        connectivity: Connectivity,
        config: &ClientConfig,
    ) -> SyncResult<Arc<Self>> {
        Self::with_clock(
            user_id,
            repo,
            backend,
            connectivity,
            config,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        user_id: impl Into<String>,
        repo: Arc<dyn RepositoryFacade>,
        backend: Arc<dyn ChatBackend>,
        connectivity: Connectivity,
        config: &ClientConfig,
        clock: Arc<dyn ClockSource>,
    ) -> SyncResult<Arc<Self>> {
        let phase = phase_machine()?;
        let scheduler = SyncScheduler::new(connectivity.clone(), config.retry.clone());
        let user_id = user_id.into();
        let sync_config = config.sync.clone();
        Ok(Arc::new_cyclic(|this| SyncCoordinator {
            this: this.clone(),
            user_id,
            repo,
            backend,
            connectivity,
            scheduler,
            config: sync_config,
            clock,
            phase,
            sync_lock: AsyncMutex::new(()),
            retry_lock: AsyncMutex::new(()),
        }))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.state()
    }

    /// Resolves once no sync pass is running.
    pub async fn await_syncing(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|phase| *phase == SyncPhase::Idle).await;
    }

    /// Reconciles `cids` with the server.
    ///
    /// Offline, nothing local is touched and one retry job per channel is
    /// scheduled. Online, each channel is watched and replayed concurrently.
    /// Only a pass where every channel succeeded advances `last_synced_at`.
    pub async fn sync(&self, cids: &[String]) -> SyncResult<SyncOutcome> {
        if cids.is_empty() {
            tracing::debug!("[sync] no channels, skipping");
            return Ok(SyncOutcome::Skipped);
        }

        if !self.connectivity.is_online() {
            tracing::info!("[sync] offline, deferring {} channel(s)", cids.len());
            for cid in cids {
                self.schedule_channel_retry(cid, None);
            }
            return Ok(SyncOutcome::Deferred);
        }

        let _lock = self.sync_lock.lock().await;
        self.phase.send_event(SyncSignal::Start);
        let _phase = PhaseGuard(&self.phase);
        self.perform_sync(cids).await
    }

    async fn perform_sync(&self, cids: &[String]) -> SyncResult<SyncOutcome> {
        let state = self.load_state()?;
        let since = state.last_synced_at;
        let started = self.now();
        tracing::info!(
            "[perform_sync] cids: {}, since: {:?}",
            cids.join(","),
            since
        );

        let results = join_all(cids.iter().map(|cid| self.sync_channel(cid, since))).await;

        let mut synced = Vec::new();
        let mut failed = Vec::new();
        let mut events = 0;
        let mut latest: Option<Timestamp> = None;
        for (cid, result) in cids.iter().zip(results) {
            match result {
                Ok(report) => {
                    events += report.events;
                    latest = latest.max(report.latest);
                    synced.push(cid.clone());
                }
                Err(e) => {
                    tracing::warn!("[perform_sync] channel {} failed: {}", cid, e);
                    self.schedule_channel_retry(cid, since);
                    failed.push(cid.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Ok(SyncOutcome::Partial { synced, failed });
        }

        // Replayed MarkAllRead events may have rewritten the state.
        let mut state = self.load_state()?;
        state.last_synced_at = Some(latest.unwrap_or(started));
        if state.active_channel_ids.is_empty() {
            state.active_channel_ids = cids.to_vec();
        }
        self.repo.insert_sync_state(&state)?;
        tracing::info!(
            "[perform_sync] completed, {} event(s), last_synced_at: {:?}",
            events,
            state.last_synced_at
        );
        Ok(SyncOutcome::Completed {
            channels: cids.len(),
            events,
        })
    }

    async fn sync_channel(&self, cid: &str, since: Option<Timestamp>) -> SyncResult<ChannelReport> {
        let mut channel = self.backend.watch_channel(cid).await_result().await?;
        channel.sync_status = SyncStatus::Completed;
        self.repo.insert_channel(&channel)?;

        let now = self.now();
        let events = match since {
            Some(since) if !exceeds(since, now, self.config.replay_window()) => {
                let history = self
                    .backend
                    .sync_history(&[cid.to_string()], since)
                    .await_result()
                    .await;
                match history {
                    Ok(events) => Some(events),
                    Err(CallError::Validation { message }) => {
                        tracing::info!(
                            "[sync_channel] {} replay refused ({}), refetching",
                            cid,
                            message
                        );
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(_) => {
                tracing::info!("[sync_channel] {} gap exceeds replay window, refetching", cid);
                None
            }
            None => None,
        };

        match events {
            Some(events) => self.apply_events(events),
            None => self.refetch_channel(cid).await,
        }
    }

    async fn refetch_channel(&self, cid: &str) -> SyncResult<ChannelReport> {
        let snapshot = self.backend.query_channel(cid).await_result().await?;
        let mut channel = snapshot.channel;
        channel.sync_status = SyncStatus::Completed;
        self.repo.insert_channel(&channel)?;

        let now = self.now();
        let count = snapshot.messages.len();
        for message in snapshot.messages {
            let seen_at = message.created_at.unwrap_or(now);
            self.upsert_remote_message(message, seen_at)?;
        }
        tracing::debug!("[refetch_channel] {} refetched, {} message(s)", cid, count);
        Ok(ChannelReport {
            events: count,
            latest: None,
        })
    }

    fn apply_events(&self, mut events: Vec<ChatEvent>) -> SyncResult<ChannelReport> {
        // Stable: events with equal timestamps keep server order.
        events.sort_by_key(|event| event.created_at());
        let mut report = ChannelReport::default();
        for event in events {
            let created_at = event.created_at();
            self.apply_event(event)?;
            report.events += 1;
            report.latest = report.latest.max(Some(created_at));
        }
        Ok(report)
    }

    /// Applies one replayed event. Applying the same event twice leaves the
    /// store unchanged.
    fn apply_event(&self, event: ChatEvent) -> SyncResult<()> {
        match event {
            ChatEvent::MessageNew {
                created_at,
                message,
            }
            | ChatEvent::MessageUpdated {
                created_at,
                message,
            } => self.upsert_remote_message(message, created_at)?,
            ChatEvent::MessageDeleted {
                created_at,
                message_id,
                hard,
                ..
            } => {
                if hard {
                    self.repo.delete_message(&message_id)?;
                } else if let Some(mut message) = self.repo.select_message(&message_id)? {
                    message.deleted_at = Some(message.deleted_at.unwrap_or(created_at));
                    message.sync_status = SyncStatus::Completed;
                    self.repo.insert_message(&message)?;
                }
            }
            ChatEvent::ReactionNew { mut reaction, .. } => {
                reaction.sync_status = SyncStatus::Completed;
                self.repo.insert_reaction(&reaction)?;
            }
            ChatEvent::ReactionDeleted { reaction, .. } => {
                self.repo.delete_reaction(&reaction.id)?;
            }
            ChatEvent::ChannelUpdated { mut channel, .. } => {
                channel.sync_status = SyncStatus::Completed;
                self.repo.insert_channel(&channel)?;
            }
            ChatEvent::ChannelDeleted { cid, .. } => {
                self.repo.delete_channel(&cid)?;
            }
            ChatEvent::MarkAllRead {
                created_at,
                user_id,
            } => {
                self.mark_all_read(&user_id, created_at)?;
            }
        }
        Ok(())
    }

    /// Stores a server copy of a message unless a newer local edit is still
    /// waiting to be sent.
    fn upsert_remote_message(&self, mut message: Message, seen_at: Timestamp) -> SyncResult<()> {
        if let Some(local) = self.repo.select_message(&message.id)? {
            let newer_local_edit = local.sync_status == SyncStatus::SyncNeeded
                && local.updated_locally_at.is_some_and(|at| at > seen_at);
            if newer_local_edit {
                tracing::debug!("[upsert_remote_message] keeping local edit of {}", local.id);
                return Ok(());
            }
            if message.created_locally_at.is_none() {
                message.created_locally_at = local.created_locally_at;
            }
        }
        message.sync_status = SyncStatus::Completed;
        self.repo.insert_message(&message)?;
        Ok(())
    }

    /// Retries pending work, then syncs the persisted active channels.
    pub async fn on_connectivity_regained(&self) -> SyncResult<SyncOutcome> {
        tracing::info!("[on_connectivity_regained] user: {}", self.user_id);
        let report = self.retry_failed_entities().await?;
        tracing::debug!("[on_connectivity_regained] retry: {:?}", report);
        let state = self.load_state()?;
        self.sync(&state.active_channel_ids).await
    }

    /// Persists the channels that were active when the connection dropped.
    pub fn on_connection_lost(&self, active_cids: &[String]) -> SyncResult<()> {
        let mut state = self.load_state()?;
        state.active_channel_ids = active_cids.to_vec();
        self.repo.insert_sync_state(&state)?;
        tracing::info!(
            "[on_connection_lost] saved {} active channel(s)",
            active_cids.len()
        );
        Ok(())
    }

    /// Advances `marked_all_read_at` for the current user. Never moves it
    /// back. Returns true if the state changed.
    pub fn mark_all_read(&self, user_id: &str, at: Timestamp) -> SyncResult<bool> {
        if user_id != self.user_id {
            tracing::debug!("[mark_all_read] ignoring read state of {}", user_id);
            return Ok(false);
        }
        let mut state = self.load_state()?;
        if state.marked_all_read_at.is_some_and(|current| current >= at) {
            return Ok(false);
        }
        state.marked_all_read_at = Some(at);
        self.repo.insert_sync_state(&state)?;
        Ok(true)
    }

    /// Stores `message` locally and tries to deliver it.
    ///
    /// Returns the stored copy: `Completed` when delivered,
    /// `FailedPermanently` when rejected, `SyncNeeded` when delivery is left
    /// to the background retry.
    pub async fn send_message(&self, mut message: Message) -> SyncResult<Message> {
        let now = self.now();
        message.sync_status = SyncStatus::SyncNeeded;
        message.created_locally_at.get_or_insert(now);
        self.repo.insert_message(&message)?;

        if !self.connectivity.is_online() {
            tracing::info!("[send_message] offline, queued {}", message.id);
            self.schedule_entity_retry();
            return Ok(message);
        }

        match self.backend.send_message(&message).await_result().await {
            Ok(remote) => {
                message.created_at = remote.created_at.or(message.created_at);
                message.sync_status = SyncStatus::Completed;
                self.repo.insert_message(&message)?;
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("[send_message] {} rejected: {}", message.id, e);
                message = self.mark_message_failed(message)?;
            }
            Err(e) => {
                tracing::info!("[send_message] {} not delivered ({}), queued", message.id, e);
                self.schedule_entity_retry();
            }
        }
        Ok(message)
    }

    /// Stores `reaction` locally and tries to deliver it.
    pub async fn send_reaction(&self, mut reaction: Reaction) -> SyncResult<Reaction> {
        let now = self.now();
        reaction.sync_status = SyncStatus::SyncNeeded;
        reaction.created_locally_at.get_or_insert(now);
        self.repo.insert_reaction(&reaction)?;

        if !self.connectivity.is_online() {
            self.schedule_entity_retry();
            return Ok(reaction);
        }

        match self.backend.send_reaction(&reaction).await_result().await {
            Ok(_) => {
                reaction.sync_status = SyncStatus::Completed;
                self.repo.insert_reaction(&reaction)?;
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("[send_reaction] {} rejected: {}", reaction.id, e);
                reaction.sync_status = SyncStatus::FailedPermanently;
                self.repo.insert_reaction(&reaction)?;
            }
            Err(e) => {
                tracing::info!("[send_reaction] {} not delivered ({}), queued", reaction.id, e);
                self.schedule_entity_retry();
            }
        }
        Ok(reaction)
    }

    /// Resends channels, messages and reactions that never reached the
    /// server.
    ///
    /// Entities older than the sync threshold are removed locally instead.
    /// Rejected entities are marked failed and never retried.
    pub async fn retry_failed_entities(&self) -> SyncResult<RetryReport> {
        let _lock = self.retry_lock.lock().await;
        let mut report = RetryReport::default();
        self.retry_channels(&mut report).await?;
        self.retry_messages(&mut report).await?;
        self.retry_awaiting_attachments(&mut report).await?;
        self.retry_reactions(&mut report).await?;
        tracing::info!("[retry_failed_entities] {:?}", report);
        Ok(report)
    }

    async fn retry_channels(&self, report: &mut RetryReport) -> SyncResult<()> {
        let cids = self
            .repo
            .select_channel_cids_by_sync_status(SyncStatus::SyncNeeded)?;
        tracing::debug!("[retry_channels] cids.len: {}", cids.len());
        for cid in cids {
            let Some(mut channel) = self.repo.select_channel(&cid)? else {
                continue;
            };
            if self.exceeds_threshold(channel.created_at) {
                tracing::warn!("[retry_channels] outdated channel {}", cid);
                self.repo.delete_channel(&cid)?;
                report.record(Delivery::Dropped);
                continue;
            }
            let delivery = match self.backend.create_channel(&channel).await_result().await {
                Ok(_) => {
                    channel.sync_status = SyncStatus::Completed;
                    self.repo.insert_channel(&channel)?;
                    Delivery::Sent
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!("[retry_channels] {} rejected: {}", cid, e);
                    channel.sync_status = SyncStatus::FailedPermanently;
                    self.repo.insert_channel(&channel)?;
                    Delivery::Failed
                }
                Err(e) => {
                    tracing::debug!("[retry_channels] {} still pending: {}", cid, e);
                    Delivery::Pending
                }
            };
            report.record(delivery);
        }
        Ok(())
    }

    async fn retry_messages(&self, report: &mut RetryReport) -> SyncResult<()> {
        let ids = self
            .repo
            .select_message_ids_by_sync_status(SyncStatus::SyncNeeded)?;
        tracing::debug!("[retry_messages] ids.len: {}", ids.len());
        for id in ids {
            let Some(message) = self.repo.select_message(&id)? else {
                continue;
            };
            let delivery = if message.deleted_at.is_some() {
                if self.exceeds_threshold(message.deleted_at) {
                    self.drop_message(&message)?
                } else {
                    let result = self.backend.delete_message(&id).await_result().await;
                    self.settle_message(message, result.map(|_| ()))?
                }
            } else if message.updated_locally_at.is_some() && message.created_at.is_some() {
                if self.exceeds_threshold(message.updated_locally_at) {
                    self.drop_message(&message)?
                } else {
                    let result = self.backend.update_message(&message).await_result().await;
                    self.settle_message(message, result.map(|_| ()))?
                }
            } else if self.exceeds_threshold(message.created_locally_at) {
                self.drop_message(&message)?
            } else {
                let result = self.backend.send_message(&message).await_result().await;
                self.settle_message(message, result.map(|_| ()))?
            };
            report.record(delivery);
        }
        Ok(())
    }

    async fn retry_awaiting_attachments(&self, report: &mut RetryReport) -> SyncResult<()> {
        let ids = self
            .repo
            .select_message_ids_by_sync_status(SyncStatus::AwaitingAttachments)?;
        tracing::debug!("[retry_awaiting_attachments] ids.len: {}", ids.len());
        for id in ids {
            let Some(message) = self.repo.select_message(&id)? else {
                continue;
            };
            let delivery = if message.has_failed_attachment() {
                tracing::info!("[retry_awaiting_attachments] upload failed for {}", id);
                self.mark_message_failed(message)?;
                Delivery::Failed
            } else if self.exceeds_threshold(message.created_locally_at) {
                self.drop_message(&message)?
            } else {
                let result = self.backend.send_message(&message).await_result().await;
                self.settle_message(message, result.map(|_| ()))?
            };
            report.record(delivery);
        }
        Ok(())
    }

    async fn retry_reactions(&self, report: &mut RetryReport) -> SyncResult<()> {
        let ids = self
            .repo
            .select_reaction_ids_by_sync_status(SyncStatus::SyncNeeded)?;
        tracing::debug!("[retry_reactions] ids.len: {}", ids.len());
        for id in ids {
            let Some(mut reaction) = self.repo.select_reaction(&id)? else {
                continue;
            };
            let deleting = reaction.deleted_at.is_some();
            let stamp = if deleting {
                reaction.deleted_at
            } else {
                reaction.created_locally_at
            };
            if self.exceeds_threshold(stamp) {
                tracing::warn!("[retry_reactions] outdated reaction {}", id);
                self.repo.delete_reaction(&id)?;
                report.record(Delivery::Dropped);
                continue;
            }

            let result = if deleting {
                self.backend
                    .delete_reaction(&reaction.message_id, &reaction.reaction_type)
                    .await_result()
                    .await
            } else {
                self.backend
                    .send_reaction(&reaction)
                    .await_result()
                    .await
                    .map(|_| ())
            };
            let delivery = match result {
                Ok(()) if deleting => {
                    self.repo.delete_reaction(&id)?;
                    Delivery::Sent
                }
                Ok(()) => {
                    reaction.sync_status = SyncStatus::Completed;
                    self.repo.insert_reaction(&reaction)?;
                    Delivery::Sent
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!("[retry_reactions] {} rejected: {}", id, e);
                    reaction.sync_status = SyncStatus::FailedPermanently;
                    self.repo.insert_reaction(&reaction)?;
                    Delivery::Failed
                }
                Err(_) => Delivery::Pending,
            };
            report.record(delivery);
        }
        Ok(())
    }

    fn settle_message(&self, mut message: Message, result: CallResult<()>) -> SyncResult<Delivery> {
        match result {
            Ok(()) => {
                message.sync_status = SyncStatus::Completed;
                self.repo.insert_message(&message)?;
                Ok(Delivery::Sent)
            }
            Err(e) if e.is_permanent() => {
                tracing::warn!("[retry_messages] {} rejected: {}", message.id, e);
                self.mark_message_failed(message)?;
                Ok(Delivery::Failed)
            }
            Err(e) => {
                tracing::debug!("[retry_messages] {} still pending: {}", message.id, e);
                Ok(Delivery::Pending)
            }
        }
    }

    fn drop_message(&self, message: &Message) -> SyncResult<Delivery> {
        tracing::warn!("[retry_messages] outdated message {}", message.id);
        self.repo.delete_message(&message.id)?;
        Ok(Delivery::Dropped)
    }

    fn mark_message_failed(&self, mut message: Message) -> SyncResult<Message> {
        message.sync_status = SyncStatus::FailedPermanently;
        message.updated_locally_at = Some(self.now());
        self.repo.insert_message(&message)?;
        Ok(message)
    }

    /// Schedules a replay of `cid`. With `since` unset the job reads the
    /// bookmark when it runs.
    fn schedule_channel_retry(&self, cid: &str, since: Option<Timestamp>) {
        let this = self.this.clone();
        let cid = cid.to_string();
        let key = format!("sync:{cid}");
        self.scheduler.schedule(key, move || {
            let this = this.clone();
            let cid = cid.clone();
            Box::pin(async move {
                match this.upgrade() {
                    Some(this) => this.retry_channel(&cid, since).await,
                    None => Ok(()),
                }
            })
        });
    }

    async fn retry_channel(&self, cid: &str, since: Option<Timestamp>) -> CallResult<()> {
        let _lock = self.sync_lock.lock().await;
        let since = match since {
            Some(since) => Some(since),
            None => self
                .repo
                .select_sync_state(&self.user_id)
                .map_err(CallError::wrap)?
                .and_then(|state| state.last_synced_at),
        };
        let report = self
            .sync_channel(cid, since)
            .await
            .map_err(into_call_error)?;
        tracing::info!("[retry_channel] {} replayed {} event(s)", cid, report.events);
        Ok(())
    }

    fn schedule_entity_retry(&self) {
        let this = self.this.clone();
        self.scheduler.schedule(RETRY_ENTITIES_JOB, move || {
            let this = this.clone();
            Box::pin(async move {
                let Some(this) = this.upgrade() else {
                    return Ok(());
                };
                let report = this
                    .retry_failed_entities()
                    .await
                    .map_err(into_call_error)?;
                if report.pending > 0 {
                    return Err(CallError::network(format!(
                        "{} entities still pending",
                        report.pending
                    )));
                }
                Ok(())
            })
        });
    }

    fn load_state(&self) -> SyncResult<SyncState> {
        Ok(self
            .repo
            .select_sync_state(&self.user_id)?
            .unwrap_or_else(|| SyncState::new(self.user_id.clone())))
    }

    fn now(&self) -> Timestamp {
        i64::try_from(self.clock.now_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// Missing timestamps count as outdated.
    fn exceeds_threshold(&self, at: Option<Timestamp>) -> bool {
        match at {
            Some(at) => exceeds(at, self.now(), self.config.max_threshold()),
            None => true,
        }
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("user_id", &self.user_id)
            .field("phase", &self.phase.state())
            .finish_non_exhaustive()
    }
}

fn exceeds(at: Timestamp, now: Timestamp, limit: Duration) -> bool {
    now.signed_duration_since(at) > TimeDelta::from_std(limit).unwrap_or(TimeDelta::MAX)
}

fn into_call_error(err: SyncError) -> CallError {
    match err {
        SyncError::Call(e) => e,
        other => CallError::wrap(other),
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
