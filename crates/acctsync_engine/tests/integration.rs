//! Integration tests for the account state engine.

use acctsync_engine::{
    AccountEventSink, AccountStateManager, AccountStorage, EngineConfig, MemoryStorage,
    MockNetwork, NoopEventSink, OperationKind, PrecomputedFinalState, SyncError,
};
use acctsync_protocol::{
    CachedResource, CallUpdate, Difference, DisplayAlert, MediaId, Message, MessageId, PeerId,
    PeerNearby, RawUpdates, SequenceState, TypingActivity, Update, UpdateGroup, Webpage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

const START: SequenceState = SequenceState {
    pts: 10,
    qts: 0,
    date: 50,
    seq: 1,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn message(id: i32) -> Message {
    Message::incoming(MessageId::new(PeerId(1), id), PeerId(2), 100, format!("message {id}"))
}

fn new_message(id: i32, pts: i32) -> RawUpdates {
    RawUpdates::Short {
        update: Update::NewMessage {
            message: message(id),
            pts,
            pts_count: 1,
        },
        date: 100,
    }
}

fn ids(list: &[i32]) -> Vec<MessageId> {
    list.iter().map(|&id| MessageId::new(PeerId(1), id)).collect()
}

fn engine(storage: &Arc<MemoryStorage>, network: &Arc<MockNetwork>) -> AccountStateManager {
    init_tracing();
    AccountStateManager::spawn(
        EngineConfig::default(),
        Arc::clone(storage),
        Arc::clone(network),
        Arc::new(NoopEventSink),
    )
}

/// Holds the queue with a running custom operation until the sender fires.
fn hold_queue(manager: &AccountStateManager) -> oneshot::Sender<()> {
    let (open, gate) = oneshot::channel::<()>();
    let _ = manager.add_custom_operation(async move { gate.await.map_err(|_| "gate dropped") });
    open
}

async fn wait_for_requests(network: &MockNetwork, count: usize) {
    while network.difference_requests().len() < count {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn reset_without_state_initializes_from_server() {
    let storage = Arc::new(MemoryStorage::new());
    let network = Arc::new(MockNetwork::new());
    network.set_current_state(SequenceState::new(100, 5, 1000, 3));
    network.set_latency(Duration::from_millis(50));
    let manager = engine(&storage, &network);
    let mut updating = manager.is_updating();

    manager.reset();
    updating.wait_for(|updating| *updating).await.unwrap();
    updating.wait_for(|updating| !*updating).await.unwrap();

    assert_eq!(storage.state(), Some(SequenceState::new(100, 5, 1000, 3)));
    assert_eq!(network.current_state_calls(), 1);
    assert!(network.difference_requests().is_empty());
    assert!(manager.notifications().borrow().is_empty());
    assert_eq!(*manager.significant_updates().borrow(), 0);

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn pushed_update_reaches_completion_poll() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    manager.add_updates(new_message(1, 11));
    let completion = manager.poll_state_update_completion();

    assert_eq!(completion.await.unwrap(), ids(&[1]));
    assert_eq!(storage.state().unwrap().pts, 11);
    assert!(storage.message(MessageId::new(PeerId(1), 1)).is_some());
    assert_eq!(network.fence_calls(), 1);

    let batch = manager.notifications().borrow().clone();
    assert_eq!(batch.notifications.len(), 1);
    assert_eq!(batch.notifications[0].message_ids, ids(&[1]));
}

#[tokio::test(start_paused = true)]
async fn pushed_stream_is_forwarded_into_the_queue() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);
    let mut state = storage.state_view();

    network.push_updates(new_message(1, 11));
    state
        .wait_for(|state| state.map_or(false, |state| state.pts == 11))
        .await
        .unwrap();

    assert!(storage.message(MessageId::new(PeerId(1), 1)).is_some());
    drop(manager);
}

#[tokio::test(start_paused = true)]
async fn completion_subscribers_share_one_result() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let open = hold_queue(&manager);
    let first = manager.poll_state_update_completion();
    manager.add_updates(new_message(1, 11));
    let second = manager.poll_state_update_completion();
    manager.add_updates(new_message(2, 12));

    let operations = manager.operations().await.unwrap();
    let completions = operations
        .iter()
        .filter(|op| op.kind == OperationKind::PollCompletion)
        .count();
    assert_eq!(completions, 1);

    open.send(()).unwrap();
    assert_eq!(first.await.unwrap(), ids(&[1, 2]));
    assert_eq!(second.await.unwrap(), ids(&[1, 2]));
    assert_eq!(network.fence_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_completion_keeps_other_subscribers() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let open = hold_queue(&manager);
    let kept = manager.poll_state_update_completion();
    let cancelled = manager.poll_state_update_completion();
    manager.add_updates(new_message(1, 11));
    drop(cancelled);

    open.send(()).unwrap();
    assert_eq!(kept.await.unwrap(), ids(&[1]));
}

#[tokio::test(start_paused = true)]
async fn pushes_behind_busy_head_coalesce() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let open = hold_queue(&manager);
    manager.add_updates(new_message(1, 11));
    manager.add_updates(new_message(2, 12));

    let kinds: Vec<_> = manager
        .operations()
        .await
        .unwrap()
        .into_iter()
        .map(|op| (op.kind, op.running))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (OperationKind::Custom, true),
            (OperationKind::CollectUpdateGroups, false),
        ]
    );

    open.send(()).unwrap();
    let completed = manager.poll_state_update_completion().await.unwrap();
    assert_eq!(completed, ids(&[1, 2]));
    assert_eq!(manager.stats().batches_replayed, 1);
    assert_eq!(storage.state().unwrap().pts, 12);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_pushes_on_idle_engine_coalesce() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    manager.add_updates(new_message(1, 11));
    manager.add_updates(new_message(2, 12));

    let completed = manager.poll_state_update_completion().await.unwrap();
    assert_eq!(completed, ids(&[1, 2]));
    assert_eq!(manager.stats().batches_replayed, 1);
    assert_eq!(storage.state().unwrap().pts, 12);
}

#[tokio::test(start_paused = true)]
async fn slices_keep_updating_until_final_response() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    network.set_latency(Duration::from_millis(100));
    network.push_difference(Ok(Difference::Slice {
        new_messages: vec![message(1)],
        other_updates: vec![],
        intermediate_state: SequenceState::new(11, 0, 60, 1),
    }));
    network.push_difference(Ok(Difference::Full {
        new_messages: vec![message(2)],
        other_updates: vec![],
        state: SequenceState::new(12, 0, 70, 1),
    }));
    let manager = engine(&storage, &network);
    let updating = manager.is_updating();
    let significant = manager.significant_updates();

    manager.reset();
    let completion = manager.poll_state_update_completion();

    wait_for_requests(&network, 2).await;
    assert!(*updating.borrow());
    assert_eq!(*significant.borrow(), 0);
    assert_eq!(storage.state().unwrap().pts, 11);

    assert_eq!(completion.await.unwrap(), ids(&[1, 2]));
    assert_eq!(*significant.borrow(), 1);
    assert!(!*updating.borrow());
    assert_eq!(manager.stats().slices_applied, 1);
    assert_eq!(network.difference_requests()[1].from.pts, 11);
}

#[tokio::test(start_paused = true)]
async fn mismatch_mid_difference_repolls_with_events_intact() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    network.push_difference(Ok(Difference::Slice {
        new_messages: vec![message(1)],
        other_updates: vec![],
        intermediate_state: SequenceState::new(11, 0, 60, 1),
    }));
    network.push_difference(Ok(Difference::Full {
        new_messages: vec![message(2)],
        other_updates: vec![],
        state: SequenceState::new(13, 0, 70, 1),
    }));
    network.push_difference(Ok(Difference::Full {
        new_messages: vec![message(3)],
        other_updates: vec![],
        state: SequenceState::new(13, 0, 70, 1),
    }));

    let calls = Arc::new(AtomicUsize::new(0));
    let moved = Arc::clone(&storage);
    let counter = Arc::clone(&calls);
    network.on_difference(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            moved.set_state(SequenceState::new(12, 0, 60, 1));
        }
    });

    let manager = engine(&storage, &network);
    manager.reset();
    let completed = manager.poll_state_update_completion().await.unwrap();

    assert_eq!(completed, ids(&[1, 3]));
    assert!(storage.message(MessageId::new(PeerId(1), 2)).is_none());
    assert_eq!(storage.state(), Some(SequenceState::new(13, 0, 70, 1)));

    let requests = network.difference_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].from.pts, 12);
    assert_eq!(manager.stats().state_mismatches, 1);
    assert_eq!(*manager.significant_updates().borrow(), 1);
}

#[tokio::test(start_paused = true)]
async fn too_long_difference_is_fatal() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    network.push_difference(Ok(Difference::TooLong { pts: 999 }));
    let manager = engine(&storage, &network);
    let mut fatal = manager.fatal_error();
    let mut updating = manager.is_updating();

    manager.reset();
    fatal.wait_for(|error| error.is_some()).await.unwrap();
    assert_eq!(
        *fatal.borrow(),
        Some(SyncError::DifferenceTooLong { pts: 999 })
    );
    updating.wait_for(|updating| !*updating).await.unwrap();

    assert_eq!(storage.state(), Some(START));
    assert_eq!(network.difference_requests().len(), 1);
    assert!(manager.operations().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_difference_does_not_stall_the_queue() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    network.push_difference(Err(SyncError::transport_fatal("connection reset")));
    let manager = engine(&storage, &network);

    manager.reset();
    let after = manager.add_custom_operation(async { Ok::<_, SyncError>(()) });
    assert_eq!(after.await.unwrap(), Ok(()));

    let stats = manager.stats();
    assert_eq!(stats.replay_failures, 1);
    assert!(stats.last_error.unwrap().contains("connection reset"));
    assert!(manager.fatal_error().borrow().is_none());
}

#[tokio::test(start_paused = true)]
async fn custom_error_does_not_stall_the_queue() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let failing = manager.add_custom_operation(async { Err::<u32, _>("boom") });
    let succeeding = manager.add_custom_operation(async { Ok::<_, &str>(7) });

    assert_eq!(failing.await.unwrap(), Err("boom"));
    assert_eq!(succeeding.await.unwrap(), Ok(7));

    manager.poll_state_update_completion().await.unwrap();
    assert_eq!(manager.stats().custom_operations, 2);
}

fn explode() -> Result<u32, &'static str> {
    panic!("custom work exploded")
}

#[tokio::test(start_paused = true)]
async fn panicking_custom_work_releases_the_queue() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let panicking = manager.add_custom_operation(async { explode() });
    let succeeding = manager.add_custom_operation(async { Ok::<_, &str>(7) });

    assert!(panicking.await.is_err());
    assert_eq!(succeeding.await.unwrap(), Ok(7));
    let last_error = manager.stats().last_error.unwrap();
    assert!(last_error.contains("custom operation failed"));
}

#[tokio::test(start_paused = true)]
async fn precomputed_final_state_is_replayed() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let state = PrecomputedFinalState {
        groups: vec![UpdateGroup::WithPts {
            updates: vec![Update::NewMessage {
                message: message(1),
                pts: 11,
                pts_count: 1,
            }],
            pts: 11,
            pts_count: 1,
        }],
        resources: vec![CachedResource {
            id: "sticker-pack".into(),
            data: vec![1, 2, 3],
        }],
    };
    let completion = manager.add_replay_asynchronously_built_final_state(state);

    assert!(completion.await.unwrap());
    assert_eq!(storage.cached_resource("sticker-pack"), Some(vec![1, 2, 3]));
    assert_eq!(storage.state().unwrap().pts, 11);
    assert!(storage.message(MessageId::new(PeerId(1), 1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn precomputed_final_state_reports_failure() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    storage.fail_next_transactions(1);
    let completion = manager.add_replay_asynchronously_built_final_state(
        PrecomputedFinalState::default(),
    );
    assert!(!completion.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn webpage_subscribers_receive_their_media_only() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let mut watched = manager.updated_webpage(MediaId(7)).await.unwrap();
    let mut other = manager.updated_webpage(MediaId(8)).await.unwrap();
    let webpage = Webpage {
        media_id: MediaId(7),
        url: "https://example.com".into(),
        title: Some("Example".into()),
    };

    manager.add_updates(RawUpdates::Short {
        update: Update::WebpageUpdated {
            webpage: webpage.clone(),
            pts: 11,
            pts_count: 1,
        },
        date: 100,
    });

    assert_eq!(watched.recv().await, Some(webpage.clone()));
    manager.poll_state_update_completion().await.unwrap();
    assert_eq!(other.try_recv(), None);
    assert_eq!(storage.webpage(MediaId(7)), Some(webpage));

    drop(watched);
    manager.add_updates(RawUpdates::Short {
        update: Update::WebpageUpdated {
            webpage: Webpage {
                media_id: MediaId(8),
                url: "https://example.org".into(),
                title: None,
            },
            pts: 12,
            pts_count: 1,
        },
        date: 100,
    });
    let received = other.recv().await.unwrap();
    assert_eq!(received.url, "https://example.org");
}

#[tokio::test(start_paused = true)]
async fn peers_nearby_subscribers_receive_updates() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let mut nearby = manager.updated_peers_nearby().await.unwrap();
    let peers = vec![PeerNearby {
        peer_id: PeerId(9),
        expires: 500,
        distance: 120,
    }];
    manager.add_updates(RawUpdates::Short {
        update: Update::PeersNearby(peers.clone()),
        date: 100,
    });

    assert_eq!(nearby.recv().await, Some(peers));
}

#[tokio::test(start_paused = true)]
async fn incomplete_batch_falls_back_to_difference() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    network.push_difference(Ok(Difference::Full {
        new_messages: vec![message(1), message(2)],
        other_updates: vec![],
        state: SequenceState::new(12, 0, 70, 1),
    }));
    network.set_latency(Duration::from_millis(100));
    let manager = engine(&storage, &network);
    let updating = manager.is_updating();

    let started = tokio::time::Instant::now();
    manager.add_updates(new_message(2, 12));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(network.difference_requests().is_empty());
    assert!(*updating.borrow());

    wait_for_requests(&network, 1).await;
    assert!(started.elapsed() >= Duration::from_secs(2));

    let completed = manager.poll_state_update_completion().await.unwrap();
    assert_eq!(completed, ids(&[1, 2]));
    assert_eq!(storage.state().unwrap().pts, 12);
}

#[tokio::test(start_paused = true)]
async fn too_long_push_polls_difference_and_keeps_alerts() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    network.push_difference(Ok(Difference::Empty { date: 80, seq: 1 }));
    let manager = engine(&storage, &network);
    let mut significant = manager.significant_updates();

    manager.add_updates(RawUpdates::Batch {
        updates: vec![Update::ServiceNotification(DisplayAlert {
            text: "maintenance tonight".into(),
            is_drop_auth: false,
        })],
        seq: 0,
        date: 70,
    });
    manager.add_updates(RawUpdates::TooLong);

    significant.wait_for(|count| *count == 1).await.unwrap();
    assert_eq!(network.difference_requests().len(), 1);
    assert_eq!(storage.state().unwrap().date, 80);
    assert_eq!(
        manager.display_alerts().borrow()[0].text,
        "maintenance tonight"
    );
}

#[derive(Default)]
struct RecordingSink {
    typing: Mutex<Vec<(PeerId, PeerId, Option<TypingActivity>)>>,
    calls: Mutex<Vec<CallUpdate>>,
    contacts: Mutex<Vec<(PeerId, bool)>>,
}

impl AccountEventSink for RecordingSink {
    fn typing_activity(&self, chat_id: PeerId, user_id: PeerId, activity: Option<TypingActivity>) {
        self.typing.lock().push((chat_id, user_id, activity));
    }

    fn call_update(&self, update: &CallUpdate) {
        self.calls.lock().push(update.clone());
    }

    fn contact_flags(&self, updates: &[(PeerId, bool)]) {
        self.contacts.lock().extend_from_slice(updates);
    }
}

#[tokio::test(start_paused = true)]
async fn sink_receives_typing_calls_and_contacts() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let sink = Arc::new(RecordingSink::default());
    let manager = AccountStateManager::spawn(
        EngineConfig::default(),
        Arc::clone(&storage),
        Arc::clone(&network),
        Arc::clone(&sink) as Arc<dyn AccountEventSink>,
    );

    manager.add_updates(RawUpdates::Batch {
        updates: vec![
            Update::UserTyping {
                chat_id: PeerId(1),
                user_id: PeerId(3),
                activity: Some(TypingActivity::RecordingVoice),
            },
            Update::PhoneCall(CallUpdate {
                call_id: 44,
                peer_id: PeerId(3),
                state: "requested".into(),
            }),
            Update::ContactFlag {
                peer_id: PeerId(3),
                is_contact: true,
            },
            Update::DelayNotifications { until: 900 },
        ],
        seq: 2,
        date: 70,
    });
    manager.poll_state_update_completion().await.unwrap();

    assert_eq!(
        *sink.typing.lock(),
        vec![(PeerId(1), PeerId(3), Some(TypingActivity::RecordingVoice))]
    );
    assert_eq!(sink.calls.lock().len(), 1);
    assert_eq!(*sink.contacts.lock(), vec![(PeerId(3), true)]);
    assert_eq!(storage.is_contact(PeerId(3)), Some(true));
    assert_eq!(*manager.delay_notifications_until().borrow(), Some(900));
    assert_eq!(storage.state().unwrap().seq, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_pending_callers() {
    let storage = Arc::new(MemoryStorage::with_state(START));
    let network = Arc::new(MockNetwork::new());
    let manager = engine(&storage, &network);

    let _open = hold_queue(&manager);
    let completion = manager.poll_state_update_completion();
    manager.operations().await.unwrap();

    manager.shutdown().await.unwrap();
    assert_eq!(completion.await, Err(SyncError::ChannelClosed));
}
