//! Network layer abstraction for the engine.

use crate::error::{SyncError, SyncResult};
use acctsync_protocol::{Difference, DifferenceRequest, RawUpdates, SequenceState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Network access the engine needs.
///
/// Implementations retry transient failures themselves; an error returned
/// here is final for the request. This trait abstracts the connection layer,
/// allowing for different implementations (MTProto session, mock for
/// testing, etc.).
pub trait AccountNetwork: Send + Sync + 'static {
    /// Fetches the current server sequencing state.
    fn current_state(&self) -> impl Future<Output = SyncResult<SequenceState>> + Send;

    /// Fetches the updates needed to catch up from `request.from`.
    ///
    /// A concurrent fetch by a duplicate session is reported as
    /// [`SyncError::DuplicateSession`].
    fn difference(
        &self,
        request: DifferenceRequest,
    ) -> impl Future<Output = SyncResult<Difference>> + Send;

    /// Sends a no-op request and waits for its answer.
    ///
    /// Used as a fence: once it returns, every earlier request on the
    /// connection has been answered.
    fn fence(&self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Takes the stream of server-pushed update containers.
    ///
    /// Returns `None` once the stream has been taken.
    fn pushed_updates(&self) -> Option<mpsc::UnboundedReceiver<RawUpdates>>;
}

type DifferenceHook = Box<dyn FnMut(&DifferenceRequest) + Send>;

/// A scripted network for testing.
pub struct MockNetwork {
    current_state: Mutex<SyncResult<SequenceState>>,
    differences: Mutex<VecDeque<SyncResult<Difference>>>,
    difference_hook: Mutex<Option<DifferenceHook>>,
    fence_result: Mutex<SyncResult<()>>,
    latency: Mutex<Duration>,
    difference_requests: Mutex<Vec<DifferenceRequest>>,
    current_state_calls: AtomicU64,
    fence_calls: AtomicU64,
    push_tx: mpsc::UnboundedSender<RawUpdates>,
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<RawUpdates>>>,
}

impl MockNetwork {
    /// Creates a mock network with no scripted responses.
    pub fn new() -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        Self {
            current_state: Mutex::new(Err(SyncError::transport_fatal(
                "no mock current state set",
            ))),
            differences: Mutex::new(VecDeque::new()),
            difference_hook: Mutex::new(None),
            fence_result: Mutex::new(Ok(())),
            latency: Mutex::new(Duration::ZERO),
            difference_requests: Mutex::new(Vec::new()),
            current_state_calls: AtomicU64::new(0),
            fence_calls: AtomicU64::new(0),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
        }
    }

    /// Sets the answer to current-state requests.
    pub fn set_current_state(&self, state: SequenceState) {
        *self.current_state.lock() = Ok(state);
    }

    /// Queues the answer to the next difference request.
    pub fn push_difference(&self, response: SyncResult<Difference>) {
        self.differences.lock().push_back(response);
    }

    /// Runs `hook` with every difference request before it is answered.
    pub fn on_difference(&self, hook: impl FnMut(&DifferenceRequest) + Send + 'static) {
        *self.difference_hook.lock() = Some(Box::new(hook));
    }

    /// Sets the answer to fence requests.
    pub fn set_fence_result(&self, result: SyncResult<()>) {
        *self.fence_result.lock() = result;
    }

    /// Delays every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Delivers a pushed update container.
    pub fn push_updates(&self, updates: RawUpdates) {
        let _ = self.push_tx.send(updates);
    }

    /// Difference requests received so far.
    pub fn difference_requests(&self) -> Vec<DifferenceRequest> {
        self.difference_requests.lock().clone()
    }

    /// Number of current-state requests received.
    pub fn current_state_calls(&self) -> u64 {
        self.current_state_calls.load(Ordering::SeqCst)
    }

    /// Number of fence requests received.
    pub fn fence_calls(&self) -> u64 {
        self.fence_calls.load(Ordering::SeqCst)
    }

    fn respond<T: Send + 'static>(
        &self,
        response: SyncResult<T>,
    ) -> impl Future<Output = SyncResult<T>> + Send {
        let latency = *self.latency.lock();
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            response
        }
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountNetwork for MockNetwork {
    fn current_state(&self) -> impl Future<Output = SyncResult<SequenceState>> + Send {
        self.current_state_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.current_state.lock().clone();
        self.respond(response)
    }

    fn difference(
        &self,
        request: DifferenceRequest,
    ) -> impl Future<Output = SyncResult<Difference>> + Send {
        self.difference_requests.lock().push(request);
        if let Some(hook) = self.difference_hook.lock().as_mut() {
            hook(&request);
        }
        let response = self
            .differences
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport_fatal("no mock difference queued")));
        self.respond(response)
    }

    fn fence(&self) -> impl Future<Output = SyncResult<()>> + Send {
        self.fence_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.fence_result.lock().clone();
        self.respond(response)
    }

    fn pushed_updates(&self) -> Option<mpsc::UnboundedReceiver<RawUpdates>> {
        self.push_rx.lock().take()
    }
}
