//! The public engine handle.

use crate::bag::BagToken;
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::notifications::NotificationBatch;
use crate::queue::{BoxedWork, CompletionSubscriber, OperationSnapshot, PrecomputedFinalState};
use crate::stats::{EngineStats, SharedStats};
use crate::storage::{AccountEventSink, AccountStorage};
use crate::transport::AccountNetwork;
use crate::worker::{Cells, Command, SubscriptionKey, Worker};
use acctsync_protocol::{
    group_updates, AppUpdateInfo, DisplayAlert, MediaId, MessageId, PeerId, PeerNearby,
    RawUpdates, TermsOfServiceUpdate, UpdateGroup, Webpage,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Keeps local account state in step with the server.
///
/// All queue state lives on a worker task spawned by [`spawn`](Self::spawn).
/// Every method here only enqueues a command, so none of them block.
///
/// # Example
///
/// ```rust,ignore
/// use acctsync_engine::{AccountStateManager, EngineConfig, MemoryStorage, MockNetwork, NoopEventSink};
/// use std::sync::Arc;
///
/// let manager = AccountStateManager::spawn(
///     EngineConfig::default(),
///     Arc::new(MemoryStorage::new()),
///     Arc::new(MockNetwork::new()),
///     Arc::new(NoopEventSink),
/// );
/// manager.reset();
/// let ids = manager.poll_state_update_completion().await?;
/// ```
pub struct AccountStateManager {
    commands: mpsc::UnboundedSender<Command>,
    cells: Arc<Cells>,
    stats: SharedStats,
    next_subscriber: AtomicU64,
    worker: JoinHandle<()>,
    forwarder: Option<JoinHandle<()>>,
}

impl AccountStateManager {
    /// Starts the engine on the current tokio runtime.
    ///
    /// Pushed updates from `network` are grouped and fed into the queue as
    /// they arrive.
    pub fn spawn<S, N>(
        config: EngineConfig,
        storage: Arc<S>,
        network: Arc<N>,
        sink: Arc<dyn AccountEventSink>,
    ) -> Self
    where
        S: AccountStorage,
        N: AccountNetwork,
    {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cells = Arc::new(Cells::new());
        let stats = SharedStats::default();

        let forwarder = network.pushed_updates().map(|mut pushed| {
            let commands = commands.downgrade();
            tokio::spawn(async move {
                while let Some(raw) = pushed.recv().await {
                    let Some(commands) = commands.upgrade() else {
                        break;
                    };
                    if commands
                        .send(Command::AddUpdateGroups(group_updates(raw)))
                        .is_err()
                    {
                        break;
                    }
                }
            })
        });

        let worker = Worker::new(
            config,
            storage,
            network,
            sink,
            Arc::clone(&cells),
            stats.clone(),
        );
        let worker = tokio::spawn(worker.run(commands_rx));

        Self {
            commands,
            cells,
            stats,
            next_subscriber: AtomicU64::new(1),
            worker,
            forwarder,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("engine worker stopped, command dropped");
        }
    }

    /// Drops pending sync work and fetches the difference from scratch.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Queues a raw pushed container.
    pub fn add_updates(&self, updates: RawUpdates) {
        self.add_update_groups(group_updates(updates));
    }

    /// Queues already grouped updates.
    pub fn add_update_groups(&self, groups: Vec<UpdateGroup>) {
        self.send(Command::AddUpdateGroups(groups));
    }

    /// Queues a final state built outside the engine.
    ///
    /// The receiver yields `true` once the state was replayed and `false`
    /// if the replay failed. It is answered exactly once.
    pub fn add_replay_asynchronously_built_final_state(
        &self,
        state: PrecomputedFinalState,
    ) -> oneshot::Receiver<bool> {
        let (completion, receiver) = oneshot::channel();
        self.send(Command::ReplayPrecomputed { state, completion });
        receiver
    }

    /// Runs `work` in queue order.
    ///
    /// The queue moves on once `work` finishes, whatever it returns. The
    /// result only goes to the returned receiver.
    pub fn add_custom_operation<F, T, E>(&self, work: F) -> oneshot::Receiver<Result<T, E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let work: BoxedWork = Box::pin(async move {
            let _ = tx.send(work.await);
        });
        self.send(Command::AddCustom(work));
        rx
    }

    /// Waits until everything queued so far has been applied.
    ///
    /// Resolves with the incoming message ids processed in the meantime.
    /// Dropping the returned future unsubscribes without affecting other
    /// waiters.
    pub fn poll_state_update_completion(&self) -> CompletionPoll {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.send(Command::PollCompletion(CompletionSubscriber { id, sender }));
        CompletionPoll {
            id,
            receiver,
            commands: self.commands.downgrade(),
            done: false,
        }
    }

    /// Subscribes to preview updates for one webpage.
    pub async fn updated_webpage(&self, media_id: MediaId) -> SyncResult<Subscription<Webpage>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (reply, token) = oneshot::channel();
        self.send(Command::SubscribeWebpage {
            media_id,
            sender,
            reply,
        });
        let token = token.await.map_err(|_| SyncError::ChannelClosed)?;
        Ok(self.subscription(receiver, SubscriptionKey::Webpage(media_id, token)))
    }

    /// Subscribes to peers-nearby updates.
    pub async fn updated_peers_nearby(&self) -> SyncResult<Subscription<Vec<PeerNearby>>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (reply, token) = oneshot::channel();
        self.send(Command::SubscribePeersNearby { sender, reply });
        let token: BagToken = token.await.map_err(|_| SyncError::ChannelClosed)?;
        Ok(self.subscription(receiver, SubscriptionKey::PeersNearby(token)))
    }

    fn subscription<T>(
        &self,
        receiver: mpsc::UnboundedReceiver<T>,
        key: SubscriptionKey,
    ) -> Subscription<T> {
        Subscription {
            receiver,
            key,
            commands: self.commands.downgrade(),
        }
    }

    /// True while a difference poll is outstanding.
    pub fn is_updating(&self) -> watch::Receiver<bool> {
        self.cells.is_updating.subscribe()
    }

    /// Number of completed catch-ups.
    pub fn significant_updates(&self) -> watch::Receiver<u64> {
        self.cells.significant_updates.subscribe()
    }

    /// Latest notification batch.
    pub fn notifications(&self) -> watch::Receiver<NotificationBatch> {
        self.cells.notifications.subscribe()
    }

    /// Latest service alerts.
    pub fn display_alerts(&self) -> watch::Receiver<Vec<DisplayAlert>> {
        self.cells.display_alerts.subscribe()
    }

    /// Latest terms-of-service update.
    pub fn terms_of_service(&self) -> watch::Receiver<Option<TermsOfServiceUpdate>> {
        self.cells.terms_of_service.subscribe()
    }

    /// Latest app update info.
    pub fn app_update(&self) -> watch::Receiver<Option<AppUpdateInfo>> {
        self.cells.app_update.subscribe()
    }

    /// Peers last reported as changed elsewhere.
    pub fn externally_updated_peers(&self) -> watch::Receiver<Vec<PeerId>> {
        self.cells.externally_updated_peers.subscribe()
    }

    /// Latest outgoing read acknowledgements, as (chat, max read id).
    pub fn read_acknowledgements(&self) -> watch::Receiver<Vec<(PeerId, i32)>> {
        self.cells.read_acknowledgements.subscribe()
    }

    /// Latest max read incoming message id.
    pub fn max_read_message_id(&self) -> watch::Receiver<Option<i32>> {
        self.cells.max_read_message_id.subscribe()
    }

    /// Latest qts.
    pub fn max_qts(&self) -> watch::Receiver<Option<i32>> {
        self.cells.max_qts.subscribe()
    }

    /// Date until which notifications are held back.
    pub fn delay_notifications_until(&self) -> watch::Receiver<Option<i32>> {
        self.cells.delay_notifications_until.subscribe()
    }

    /// Fatal error that stopped synchronization, if any.
    pub fn fatal_error(&self) -> watch::Receiver<Option<SyncError>> {
        self.cells.fatal_error.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Snapshot of the queue, head first.
    pub async fn operations(&self) -> SyncResult<Vec<OperationSnapshot>> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Command::Operations(reply));
        snapshot.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Pending operations are dropped; their callers see their channels
    /// close.
    pub async fn shutdown(self) -> SyncResult<()> {
        if let Some(forwarder) = &self.forwarder {
            forwarder.abort();
        }
        self.send(Command::Shutdown);
        self.worker.await.map_err(|_| SyncError::ChannelClosed)
    }
}

/// Pending result of [`AccountStateManager::poll_state_update_completion`].
#[must_use = "dropping the poll unsubscribes it"]
pub struct CompletionPoll {
    id: u64,
    receiver: oneshot::Receiver<Vec<MessageId>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    done: bool,
}

impl Future for CompletionPoll {
    type Output = SyncResult<Vec<MessageId>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(result) => {
                this.done = true;
                Poll::Ready(result.map_err(|_| SyncError::ChannelClosed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CompletionPoll {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::CancelCompletion(self.id));
        }
    }
}

/// A stream of values pushed by the engine.
///
/// Dropping it unsubscribes.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    key: SubscriptionKey,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl<T> Subscription<T> {
    /// Waits for the next value. Returns `None` once the engine stops.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns the next value if one is ready.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Unsubscribe(self.key));
        }
    }
}
