//! The engine worker.
//!
//! The worker task owns the operation queue. Handles talk to it through a
//! command channel; work it spawns (network requests, storage transactions,
//! timers, custom futures) reports back through an internal channel, so the
//! queue is only ever touched here.

use crate::bag::{BagToken, SubscriberBag};
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::AccountFinalStateEvents;
use crate::notifications::{resolve_notifications, NotificationBatch};
use crate::poller::{poll_difference, DifferenceOutcome};
use crate::queue::{
    BoxedWork, CompletionSubscriber, OperationContent, OperationId, OperationQueue,
    OperationSnapshot, Position, PrecomputedFinalState,
};
use crate::replay::{initial_snapshot, replay_update_groups, GroupReplay};
use crate::stats::SharedStats;
use crate::storage::{run_transaction, AccountEventSink, AccountStorage};
use crate::transport::AccountNetwork;
use acctsync_protocol::{
    AppUpdateInfo, DisplayAlert, MediaId, PeerId, PeerNearby, TermsOfServiceUpdate,
    UpdateGroup, Webpage,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Requests from handles.
pub(crate) enum Command {
    Reset,
    AddUpdateGroups(Vec<UpdateGroup>),
    ReplayPrecomputed {
        state: PrecomputedFinalState,
        completion: oneshot::Sender<bool>,
    },
    AddCustom(BoxedWork),
    PollCompletion(CompletionSubscriber),
    CancelCompletion(u64),
    SubscribeWebpage {
        media_id: MediaId,
        sender: mpsc::UnboundedSender<Webpage>,
        reply: oneshot::Sender<BagToken>,
    },
    SubscribePeersNearby {
        sender: mpsc::UnboundedSender<Vec<PeerNearby>>,
        reply: oneshot::Sender<BagToken>,
    },
    Unsubscribe(SubscriptionKey),
    Operations(oneshot::Sender<Vec<OperationSnapshot>>),
    Shutdown,
}

/// Identifies one subscriber for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionKey {
    Webpage(MediaId, BagToken),
    PeersNearby(BagToken),
}

/// Results of off-worker work, tagged with the operation they belong to.
enum Internal {
    TimerFired(OperationId),
    DifferencePolled(OperationId, DifferenceOutcome),
    GroupsReplayed(OperationId, SyncResult<GroupReplay>),
    PrecomputedReplayed(OperationId, SyncResult<GroupReplay>),
    CustomFinished(OperationId),
    FenceCompleted(OperationId, SyncResult<()>),
    EventsProcessed(OperationId, SyncResult<NotificationBatch>),
}

/// Last-value cells published by the worker.
#[derive(Debug)]
pub(crate) struct Cells {
    pub is_updating: watch::Sender<bool>,
    pub significant_updates: watch::Sender<u64>,
    pub notifications: watch::Sender<NotificationBatch>,
    pub display_alerts: watch::Sender<Vec<DisplayAlert>>,
    pub terms_of_service: watch::Sender<Option<TermsOfServiceUpdate>>,
    pub app_update: watch::Sender<Option<AppUpdateInfo>>,
    pub externally_updated_peers: watch::Sender<Vec<PeerId>>,
    pub read_acknowledgements: watch::Sender<Vec<(PeerId, i32)>>,
    pub max_read_message_id: watch::Sender<Option<i32>>,
    pub max_qts: watch::Sender<Option<i32>>,
    pub delay_notifications_until: watch::Sender<Option<i32>>,
    pub fatal_error: watch::Sender<Option<SyncError>>,
}

impl Cells {
    pub(crate) fn new() -> Self {
        Self {
            is_updating: watch::channel(false).0,
            significant_updates: watch::channel(0).0,
            notifications: watch::channel(NotificationBatch::default()).0,
            display_alerts: watch::channel(Vec::new()).0,
            terms_of_service: watch::channel(None).0,
            app_update: watch::channel(None).0,
            externally_updated_peers: watch::channel(Vec::new()).0,
            read_acknowledgements: watch::channel(Vec::new()).0,
            max_read_message_id: watch::channel(None).0,
            max_qts: watch::channel(None).0,
            delay_notifications_until: watch::channel(None).0,
            fatal_error: watch::channel(None).0,
        }
    }
}

pub(crate) struct Worker<S, N> {
    config: EngineConfig,
    storage: Arc<S>,
    network: Arc<N>,
    sink: Arc<dyn AccountEventSink>,
    cells: Arc<Cells>,
    stats: SharedStats,
    queue: OperationQueue,
    timer: Option<(OperationId, JoinHandle<()>)>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    webpage_subscribers: HashMap<MediaId, SubscriberBag<mpsc::UnboundedSender<Webpage>>>,
    peers_nearby_subscribers: SubscriberBag<mpsc::UnboundedSender<Vec<PeerNearby>>>,
}

impl<S, N> Worker<S, N>
where
    S: AccountStorage,
    N: AccountNetwork,
{
    pub(crate) fn new(
        config: EngineConfig,
        storage: Arc<S>,
        network: Arc<N>,
        sink: Arc<dyn AccountEventSink>,
        cells: Arc<Cells>,
        stats: SharedStats,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            storage,
            network,
            sink,
            cells,
            stats,
            queue: OperationQueue::new(),
            timer: None,
            internal_tx,
            internal_rx,
            webpage_subscribers: HashMap::new(),
            peers_nearby_subscribers: SubscriberBag::new(),
        }
    }

    /// Runs until shutdown or until every handle is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("engine worker started");
        loop {
            tokio::select! {
                biased;
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
            self.start_first_operation();
            self.refresh_is_updating();
        }

        self.cancel_timer();
        debug!(pending = self.queue.len(), "engine worker stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Reset => {
                debug!("reset requested");
                self.queue.replace_with(OperationContent::PollDifference {
                    events: AccountFinalStateEvents::new(),
                });
            }
            Command::AddUpdateGroups(groups) => self.add_update_groups(groups),
            Command::ReplayPrecomputed { state, completion } => {
                self.queue.insert(
                    OperationContent::ReplayPrecomputedFinalState {
                        state: Some(state),
                        completion: Some(completion),
                    },
                    Position::Last,
                );
            }
            Command::AddCustom(work) => {
                self.queue
                    .insert(OperationContent::Custom { work: Some(work) }, Position::Last);
            }
            Command::PollCompletion(subscriber) => {
                if let Err(subscriber) = self.queue.join_completion(subscriber) {
                    self.queue.insert(
                        OperationContent::PollCompletion {
                            message_ids: Vec::new(),
                            subscribers: vec![subscriber],
                        },
                        Position::Last,
                    );
                }
            }
            Command::CancelCompletion(id) => {
                if let Some((_, subscribers)) = self.queue.completion_subscribers_mut() {
                    subscribers.retain(|subscriber| subscriber.id != id);
                }
            }
            Command::SubscribeWebpage {
                media_id,
                sender,
                reply,
            } => {
                let bag = self.webpage_subscribers.entry(media_id).or_default();
                let token = bag.insert(sender);
                trace!(?media_id, subscribers = bag.len(), "webpage subscriber added");
                if reply.send(token).is_err() {
                    self.unsubscribe(SubscriptionKey::Webpage(media_id, token));
                }
            }
            Command::SubscribePeersNearby { sender, reply } => {
                let token = self.peers_nearby_subscribers.insert(sender);
                if reply.send(token).is_err() {
                    self.unsubscribe(SubscriptionKey::PeersNearby(token));
                }
            }
            Command::Unsubscribe(key) => self.unsubscribe(key),
            Command::Operations(reply) => {
                let _ = reply.send(self.queue.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn add_update_groups(&mut self, groups: Vec<UpdateGroup>) {
        if groups.is_empty() {
            return;
        }
        trace!(count = groups.len(), "pushed update groups");
        if let Err(groups) = self.queue.extend_pending_collect(groups) {
            self.queue.insert(
                OperationContent::CollectUpdateGroups {
                    groups,
                    timeout: Duration::ZERO,
                },
                Position::Last,
            );
        }
    }

    fn unsubscribe(&mut self, key: SubscriptionKey) {
        match key {
            SubscriptionKey::Webpage(media_id, token) => {
                if let Some(bag) = self.webpage_subscribers.get_mut(&media_id) {
                    bag.remove(token);
                    if bag.is_empty() {
                        self.webpage_subscribers.remove(&media_id);
                    }
                }
            }
            SubscriptionKey::PeersNearby(token) => {
                self.peers_nearby_subscribers.remove(token);
            }
        }
    }

    fn refresh_is_updating(&self) {
        let updating = self.queue.is_updating();
        self.cells.is_updating.send_if_modified(|current| {
            if *current == updating {
                return false;
            }
            *current = updating;
            true
        });
    }

    fn cancel_timer(&mut self) {
        if let Some((id, handle)) = self.timer.take() {
            trace!(%id, "debounce timer cancelled");
            handle.abort();
        }
    }

    /// Pops the running head if it is `id`.
    fn finish(&mut self, id: OperationId) -> Option<OperationContent> {
        if !self.queue.is_running_head(id) {
            warn!(%id, "completion for an operation that is not running");
            return None;
        }
        if self.timer.as_ref().map(|(timer_id, _)| *timer_id) == Some(id) {
            self.cancel_timer();
        }
        self.queue.pop_head(id).map(|operation| operation.content)
    }

    fn spawn_internal<F>(&self, task: F)
    where
        F: std::future::Future<Output = Internal> + Send + 'static,
    {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    /// Starts the head unless it is already running.
    fn start_first_operation(&mut self) {
        loop {
            let Some(head) = self.queue.head_mut() else {
                return;
            };
            if head.running {
                return;
            }
            head.running = true;
            let id = head.id;
            debug!(%id, content = ?head.content, "starting operation");
            if !self.start(id) {
                return;
            }
        }
    }

    /// Dispatches the running head. Returns true if it finished immediately.
    fn start(&mut self, id: OperationId) -> bool {
        let queued = self.queue.len();
        let Some(head) = self.queue.head_mut() else {
            return false;
        };

        match &mut head.content {
            OperationContent::PollDifference { events } => {
                let events = std::mem::take(events);
                let storage = Arc::clone(&self.storage);
                let network = Arc::clone(&self.network);
                let config = self.config.clone();
                let stats = self.stats.clone();
                self.spawn_internal(async move {
                    let outcome = poll_difference(storage, network, config, stats, events).await;
                    Internal::DifferencePolled(id, outcome)
                });
                false
            }
            OperationContent::CollectUpdateGroups { timeout, .. } => {
                let timeout = *timeout;
                self.cancel_timer();
                let tx = self.internal_tx.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(Internal::TimerFired(id));
                });
                self.timer = Some((id, handle));
                false
            }
            OperationContent::ProcessUpdateGroups { groups } => {
                let groups = std::mem::take(groups);
                let storage = Arc::clone(&self.storage);
                let threshold = self.config.slow_replay_threshold;
                let stats = self.stats.clone();
                self.spawn_internal(async move {
                    let result = replay_groups(storage, groups, threshold, &stats).await;
                    Internal::GroupsReplayed(id, result)
                });
                false
            }
            OperationContent::ReplayPrecomputedFinalState { state, .. } => {
                let state = state.take().unwrap_or_default();
                let storage = Arc::clone(&self.storage);
                let threshold = self.config.slow_replay_threshold;
                let stats = self.stats.clone();
                self.spawn_internal(async move {
                    let result = replay_precomputed(storage, state, threshold, &stats).await;
                    Internal::PrecomputedReplayed(id, result)
                });
                false
            }
            OperationContent::Custom { work } => {
                let Some(work) = work.take() else {
                    self.queue.pop_head(id);
                    return true;
                };
                let stats = self.stats.clone();
                self.spawn_internal(async move {
                    if let Err(err) = tokio::spawn(work).await {
                        let err = SyncError::Custom(err.to_string());
                        warn!(%id, error = %err, "custom operation aborted");
                        stats.record_error(&err);
                    }
                    Internal::CustomFinished(id)
                });
                false
            }
            OperationContent::PollCompletion { .. } => {
                if queued > 1 {
                    // Not the last one yet: go to the back of the line.
                    if let Some(operation) = self.queue.pop_head(id) {
                        let moved = self.queue.insert(operation.content, Position::Last);
                        trace!(%id, %moved, "completion poll deferred");
                    }
                    return true;
                }
                self.stats.update(|s| s.fences_issued += 1);
                let network = Arc::clone(&self.network);
                self.spawn_internal(async move {
                    let result = network.fence().await;
                    Internal::FenceCompleted(id, result)
                });
                false
            }
            OperationContent::ProcessEvents { events } => {
                let events = std::mem::take(events);
                self.start_process_events(id, events)
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::TimerFired(id) => self.on_timer_fired(id),
            Internal::DifferencePolled(id, outcome) => self.on_difference_polled(id, outcome),
            Internal::GroupsReplayed(id, result) => self.on_groups_replayed(id, result),
            Internal::PrecomputedReplayed(id, result) => self.on_precomputed_replayed(id, result),
            Internal::CustomFinished(id) => {
                if self.finish(id).is_some() {
                    self.stats.update(|s| s.custom_operations += 1);
                }
            }
            Internal::FenceCompleted(id, result) => self.on_fence_completed(id, result),
            Internal::EventsProcessed(id, result) => {
                if self.finish(id).is_none() {
                    return;
                }
                match result {
                    Ok(batch) if !batch.is_empty() => {
                        debug!(count = batch.notifications.len(), "publishing notifications");
                        self.cells.notifications.send_replace(batch);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "notification resolution failed");
                        self.stats.record_error(&err);
                    }
                }
            }
        }
    }

    fn on_timer_fired(&mut self, id: OperationId) {
        if self.timer.as_ref().map(|(timer_id, _)| *timer_id) != Some(id) {
            trace!(%id, "stale debounce timer");
            return;
        }
        self.timer = None;
        let Some(OperationContent::CollectUpdateGroups { groups, timeout }) = self.finish(id) else {
            return;
        };

        if timeout.is_zero() {
            self.queue
                .insert(OperationContent::ProcessUpdateGroups { groups }, Position::First);
        } else {
            warn!(
                held = groups.len(),
                "incomplete update groups did not resolve, polling difference"
            );
            self.queue.replace_with(OperationContent::PollDifference {
                events: AccountFinalStateEvents::new(),
            });
        }
    }

    fn on_difference_polled(&mut self, id: OperationId, outcome: DifferenceOutcome) {
        if self.finish(id).is_none() {
            return;
        }

        match outcome {
            DifferenceOutcome::StateInitialized { .. } => {}
            DifferenceOutcome::Applied { events, more: true } => {
                self.queue
                    .insert(OperationContent::PollDifference { events }, Position::First);
            }
            DifferenceOutcome::Applied {
                events,
                more: false,
            } => {
                info!(
                    messages = events.added_incoming_message_ids.len(),
                    "difference caught up"
                );
                self.flush_events(events);
                self.cells.significant_updates.send_modify(|count| *count += 1);
            }
            DifferenceOutcome::Mismatch { events } => {
                warn!("state changed during difference poll, polling again");
                self.stats.update(|s| s.state_mismatches += 1);
                self.queue
                    .insert(OperationContent::PollDifference { events }, Position::First);
            }
            DifferenceOutcome::TooLong { pts, events } => {
                self.report_poll_failure(SyncError::DifferenceTooLong { pts });
                self.flush_events(events);
            }
            DifferenceOutcome::Failed { events, error } => {
                self.stats.update(|s| s.replay_failures += 1);
                self.report_poll_failure(error);
                self.flush_events(events);
            }
            DifferenceOutcome::ReplayFailed { error } => {
                warn!(error = %error, "difference replay failed, restarting poll");
                self.stats.update(|s| s.replay_failures += 1);
                self.stats.record_error(&error);
                self.queue.replace_with(OperationContent::PollDifference {
                    events: AccountFinalStateEvents::new(),
                });
            }
        }
    }

    /// Records a dropped difference poll. Unrecoverable errors are published.
    fn report_poll_failure(&mut self, err: SyncError) {
        self.stats.record_error(&err);
        if err.is_fatal() {
            error!(error = %err, "state cannot be caught up");
            self.cells.fatal_error.send_replace(Some(err));
        } else if err.is_retryable() {
            warn!(error = %err, "difference poll failed");
        } else {
            error!(error = %err, "difference poll failed permanently");
        }
    }

    fn on_groups_replayed(&mut self, id: OperationId, result: SyncResult<GroupReplay>) {
        if self.finish(id).is_none() {
            return;
        }

        match result {
            Ok(replay) if !replay.should_poll => {
                self.stats.update(|s| s.batches_replayed += 1);
                self.flush_events(replay.events);
                if replay.incomplete {
                    self.requeue_remaining(replay.remaining);
                }
            }
            Ok(replay) => {
                debug!("update batch requested a difference");
                self.stats.update(|s| s.batches_replayed += 1);
                self.poll_after_failed_batch(replay.events.display_alerts);
            }
            Err(err) => {
                warn!(error = %err, "update batch replay failed, polling difference");
                let mismatch = matches!(err, SyncError::StateMismatch { .. });
                self.stats.update(|s| {
                    if mismatch {
                        s.state_mismatches += 1;
                    } else {
                        s.replay_failures += 1;
                    }
                });
                self.stats.record_error(&err);
                self.poll_after_failed_batch(Vec::new());
            }
        }
    }

    fn on_precomputed_replayed(&mut self, id: OperationId, result: SyncResult<GroupReplay>) {
        let Some(OperationContent::ReplayPrecomputedFinalState { completion, .. }) =
            self.finish(id)
        else {
            return;
        };

        let applied = match result {
            Ok(replay) => {
                self.stats.update(|s| s.batches_replayed += 1);
                if replay.should_poll {
                    self.poll_after_failed_batch(replay.events.display_alerts);
                } else {
                    self.flush_events(replay.events);
                    if replay.incomplete {
                        self.requeue_remaining(replay.remaining);
                    }
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "precomputed final state replay failed");
                self.stats.update(|s| s.replay_failures += 1);
                self.stats.record_error(&err);
                false
            }
        };

        if let Some(completion) = completion {
            let _ = completion.send(applied);
        }
    }

    fn on_fence_completed(&mut self, id: OperationId, result: SyncResult<()>) {
        let Some(OperationContent::PollCompletion {
            message_ids,
            subscribers,
        }) = self.finish(id)
        else {
            return;
        };

        if let Err(err) = result {
            // The fence only orders requests; a failed one still proves the queue drained.
            warn!(error = %err, "completion fence failed");
            self.stats.update(|s| s.fence_failures += 1);
        }

        debug!(
            ids = message_ids.len(),
            subscribers = subscribers.len(),
            "completion poll finished"
        );
        for subscriber in subscribers {
            let _ = subscriber.sender.send(message_ids.clone());
        }
    }

    fn flush_events(&mut self, events: AccountFinalStateEvents) {
        if !events.is_empty() {
            self.queue
                .insert(OperationContent::ProcessEvents { events }, Position::First);
        }
    }

    fn requeue_remaining(&mut self, remaining: Vec<UpdateGroup>) {
        debug!(count = remaining.len(), "update batch incomplete, waiting for missing groups");
        self.queue.insert(
            OperationContent::CollectUpdateGroups {
                groups: remaining,
                timeout: self.config.incomplete_retry_delay,
            },
            Position::Last,
        );
    }

    fn poll_after_failed_batch(&mut self, display_alerts: Vec<DisplayAlert>) {
        self.queue.replace_with(OperationContent::PollDifference {
            events: AccountFinalStateEvents::new(),
        });
        if !display_alerts.is_empty() {
            self.queue.insert(
                OperationContent::ProcessEvents {
                    events: AccountFinalStateEvents::with_display_alerts(display_alerts),
                },
                Position::First,
            );
        }
    }

    /// Dispatches an event set. Returns true if nothing is left to wait for.
    fn start_process_events(&mut self, id: OperationId, events: AccountFinalStateEvents) -> bool {
        let AccountFinalStateEvents {
            added_incoming_message_ids,
            updated_typing_activities,
            updated_webpages,
            updated_peers_nearby,
            updated_calls,
            is_contact_updates,
            updated_max_read_message_id,
            updated_qts,
            display_alerts,
            externally_updated_peer_ids,
            read_acknowledgements,
            delay_notifications_until,
            terms_of_service_update,
            app_update_info,
        } = events;

        if !display_alerts.is_empty() {
            self.cells.display_alerts.send_replace(display_alerts);
        }
        if !externally_updated_peer_ids.is_empty() {
            self.cells
                .externally_updated_peers
                .send_replace(externally_updated_peer_ids);
        }

        for (chat_id, users) in updated_typing_activities {
            for (user_id, activity) in users {
                self.sink.typing_activity(chat_id, user_id, activity);
            }
        }
        for call in &updated_calls {
            self.sink.call_update(call);
        }
        if !is_contact_updates.is_empty() {
            self.sink.contact_flags(&is_contact_updates);
        }

        for (media_id, webpage) in updated_webpages {
            if let Some(bag) = self.webpage_subscribers.get(&media_id) {
                for subscriber in bag.snapshot() {
                    let _ = subscriber.send(webpage.clone());
                }
            }
        }
        if let Some(peers) = updated_peers_nearby {
            for subscriber in self.peers_nearby_subscribers.snapshot() {
                let _ = subscriber.send(peers.clone());
            }
        }

        if let Some(max_id) = updated_max_read_message_id {
            self.cells.max_read_message_id.send_replace(Some(max_id));
        }
        if let Some(qts) = updated_qts {
            self.cells.max_qts.send_replace(Some(qts));
        }
        if !read_acknowledgements.is_empty() {
            self.cells.read_acknowledgements.send_replace(read_acknowledgements);
        }
        if let Some(until) = delay_notifications_until {
            self.cells.delay_notifications_until.send_replace(Some(until));
        }
        if let Some(terms) = terms_of_service_update {
            self.cells.terms_of_service.send_replace(Some(terms));
        }
        if let Some(info) = app_update_info {
            self.cells.app_update.send_replace(Some(info));
        }

        if added_incoming_message_ids.is_empty() {
            self.queue.pop_head(id);
            return true;
        }

        if let Some((message_ids, _)) = self.queue.completion_subscribers_mut() {
            message_ids.extend_from_slice(&added_incoming_message_ids);
        }

        let storage = Arc::clone(&self.storage);
        let now = unix_now();
        self.spawn_internal(async move {
            let result = run_transaction(storage, move |txn| {
                Ok(resolve_notifications(txn, &added_incoming_message_ids, now))
            })
            .await;
            Internal::EventsProcessed(id, result)
        });
        false
    }
}

async fn replay_groups<S: AccountStorage>(
    storage: Arc<S>,
    groups: Vec<UpdateGroup>,
    slow_threshold: Duration,
    stats: &SharedStats,
) -> SyncResult<GroupReplay> {
    let snapshot = run_transaction(Arc::clone(&storage), |txn| Ok(initial_snapshot(txn))).await?;
    let Some(expected) = snapshot else {
        return Err(SyncError::StateMismatch {
            expected: Default::default(),
            found: None,
        });
    };

    let started = Instant::now();
    let result =
        run_transaction(storage, move |txn| replay_update_groups(txn, expected, groups)).await;
    let elapsed = started.elapsed();
    if elapsed > slow_threshold {
        stats.update(|s| s.slow_replays += 1);
        warn!(elapsed_ms = elapsed.as_millis() as u64, "slow update batch replay");
    }
    result
}

async fn replay_precomputed<S: AccountStorage>(
    storage: Arc<S>,
    state: PrecomputedFinalState,
    slow_threshold: Duration,
    stats: &SharedStats,
) -> SyncResult<GroupReplay> {
    let PrecomputedFinalState { groups, resources } = state;
    if !resources.is_empty() {
        let writer = Arc::clone(&storage);
        tokio::task::spawn_blocking(move || writer.store_cached_resources(&resources))
            .await
            .map_err(|err| SyncError::storage(format!("storage task failed: {err}")))??;
    }
    replay_groups(storage, groups, slow_threshold, stats).await
}

fn unix_now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i32::try_from(elapsed.as_secs()).unwrap_or(i32::MAX))
        .unwrap_or(0)
}
