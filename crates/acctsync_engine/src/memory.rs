//! In-memory storage.

use crate::error::{SyncError, SyncResult};
use crate::storage::{AccountStorage, AccountTransaction, NotificationSettings};
use acctsync_protocol::{
    CachedResource, MediaId, Message, MessageId, PeerId, SequenceState, Webpage,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::watch;

/// Account data held by [`MemoryStorage`].
///
/// Transactions run against a copy that replaces the committed data only
/// when the transaction body succeeds.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransaction {
    state: Option<SequenceState>,
    messages: BTreeMap<MessageId, Message>,
    inbox_read: HashMap<PeerId, i32>,
    notification_settings: HashMap<PeerId, NotificationSettings>,
    webpages: HashMap<MediaId, Webpage>,
    contacts: HashMap<PeerId, bool>,
}

impl AccountTransaction for MemoryTransaction {
    fn state(&self) -> Option<SequenceState> {
        self.state
    }

    fn set_state(&mut self, state: SequenceState) -> SyncResult<()> {
        self.state = Some(state);
        Ok(())
    }

    fn store_message(&mut self, message: Message) -> SyncResult<bool> {
        Ok(self.messages.insert(message.id, message).is_none())
    }

    fn delete_messages(&mut self, ids: &[MessageId]) -> SyncResult<()> {
        for id in ids {
            self.messages.remove(id);
        }
        Ok(())
    }

    fn message(&self, id: MessageId) -> Option<Message> {
        self.messages.get(&id).cloned()
    }

    fn apply_inbox_read(&mut self, peer_id: PeerId, max_id: i32) -> SyncResult<()> {
        let entry = self.inbox_read.entry(peer_id).or_insert(0);
        *entry = (*entry).max(max_id);
        Ok(())
    }

    fn inbox_max_read_id(&self, peer_id: PeerId) -> i32 {
        self.inbox_read.get(&peer_id).copied().unwrap_or(0)
    }

    fn notification_settings(&self, peer_id: PeerId) -> NotificationSettings {
        self.notification_settings
            .get(&peer_id)
            .copied()
            .unwrap_or_default()
    }

    fn store_webpage(&mut self, webpage: Webpage) -> SyncResult<()> {
        self.webpages.insert(webpage.media_id, webpage);
        Ok(())
    }

    fn set_contact(&mut self, peer_id: PeerId, is_contact: bool) -> SyncResult<()> {
        self.contacts.insert(peer_id, is_contact);
        Ok(())
    }
}

/// An in-memory account storage for testing and embedding.
pub struct MemoryStorage {
    data: Mutex<MemoryTransaction>,
    resources: RwLock<HashMap<String, Vec<u8>>>,
    state_tx: watch::Sender<Option<SequenceState>>,
    commits: AtomicU64,
    failures_pending: AtomicU32,
}

impl MemoryStorage {
    /// Creates an empty storage with no sequencing state.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            data: Mutex::new(MemoryTransaction::default()),
            resources: RwLock::new(HashMap::new()),
            state_tx,
            commits: AtomicU64::new(0),
            failures_pending: AtomicU32::new(0),
        }
    }

    /// Creates a storage already holding `state`.
    pub fn with_state(state: SequenceState) -> Self {
        let storage = Self::new();
        storage.set_state(state);
        storage
    }

    /// Overwrites the sequencing state outside of any transaction.
    pub fn set_state(&self, state: SequenceState) {
        self.data.lock().state = Some(state);
        self.state_tx.send_replace(Some(state));
    }

    /// Current sequencing state.
    pub fn state(&self) -> Option<SequenceState> {
        self.data.lock().state
    }

    /// Sets notification settings for a chat.
    pub fn set_notification_settings(&self, peer_id: PeerId, settings: NotificationSettings) {
        self.data
            .lock()
            .notification_settings
            .insert(peer_id, settings);
    }

    /// Looks up a stored message.
    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.data.lock().messages.get(&id).cloned()
    }

    /// All stored messages in id order.
    pub fn messages(&self) -> Vec<Message> {
        self.data.lock().messages.values().cloned().collect()
    }

    /// Looks up a stored webpage.
    pub fn webpage(&self, media_id: MediaId) -> Option<Webpage> {
        self.data.lock().webpages.get(&media_id).cloned()
    }

    /// Contact flag of a peer, if ever set.
    pub fn is_contact(&self, peer_id: PeerId) -> Option<bool> {
        self.data.lock().contacts.get(&peer_id).copied()
    }

    /// Highest read incoming id of a chat.
    pub fn inbox_max_read_id(&self, peer_id: PeerId) -> i32 {
        self.data.lock().inbox_max_read_id(peer_id)
    }

    /// Looks up a cached resource.
    pub fn cached_resource(&self, id: &str) -> Option<Vec<u8>> {
        self.resources.read().get(id).cloned()
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Makes the next `count` transactions fail without running their body.
    pub fn fail_next_transactions(&self, count: u32) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStorage for MemoryStorage {
    type Transaction = MemoryTransaction;

    fn transaction<T, F>(&self, body: F) -> SyncResult<T>
    where
        F: FnOnce(&mut Self::Transaction) -> SyncResult<T>,
    {
        if self.take_injected_failure() {
            return Err(SyncError::storage("injected transaction failure"));
        }

        let mut data = self.data.lock();
        let mut working = data.clone();
        let result = body(&mut working)?;

        let state_changed = working.state != data.state;
        *data = working;
        self.commits.fetch_add(1, Ordering::SeqCst);
        if state_changed {
            self.state_tx.send_replace(data.state);
        }
        Ok(result)
    }

    fn state_view(&self) -> watch::Receiver<Option<SequenceState>> {
        self.state_tx.subscribe()
    }

    fn store_cached_resources(&self, resources: &[CachedResource]) -> SyncResult<()> {
        let mut cache = self.resources.write();
        for resource in resources {
            cache.insert(resource.id.clone(), resource.data.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i32) -> Message {
        Message::incoming(MessageId::new(PeerId(1), id), PeerId(2), 100, "hello")
    }

    #[test]
    fn committed_transaction_is_visible() {
        let storage = MemoryStorage::new();
        let added = storage
            .transaction(|txn| {
                txn.set_state(SequenceState::new(5, 0, 100, 1))?;
                txn.store_message(message(1))
            })
            .unwrap();

        assert!(added);
        assert_eq!(storage.state(), Some(SequenceState::new(5, 0, 100, 1)));
        assert_eq!(storage.messages().len(), 1);
        assert_eq!(storage.commit_count(), 1);
    }

    #[test]
    fn failed_body_rolls_back() {
        let storage = MemoryStorage::with_state(SequenceState::new(1, 0, 0, 0));
        let result: SyncResult<()> = storage.transaction(|txn| {
            txn.store_message(message(1))?;
            txn.set_state(SequenceState::new(2, 0, 0, 0))?;
            Err(SyncError::storage("boom"))
        });

        assert!(result.is_err());
        assert!(storage.messages().is_empty());
        assert_eq!(storage.state(), Some(SequenceState::new(1, 0, 0, 0)));
        assert_eq!(storage.commit_count(), 0);
    }

    #[test]
    fn storing_twice_reports_existing() {
        let storage = MemoryStorage::new();
        storage
            .transaction(|txn| {
                assert!(txn.store_message(message(1))?);
                assert!(!txn.store_message(message(1))?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn injected_failures_are_consumed() {
        let storage = MemoryStorage::new();
        storage.fail_next_transactions(1);
        assert!(storage.transaction(|_| Ok(())).is_err());
        assert!(storage.transaction(|_| Ok(())).is_ok());
    }

    #[test]
    fn state_view_follows_commits() {
        let storage = MemoryStorage::new();
        let view = storage.state_view();
        assert_eq!(*view.borrow(), None);

        storage
            .transaction(|txn| txn.set_state(SequenceState::new(9, 1, 2, 3)))
            .unwrap();
        assert_eq!(*view.borrow(), Some(SequenceState::new(9, 1, 2, 3)));
    }

    #[test]
    fn inbox_read_never_moves_back() {
        let storage = MemoryStorage::new();
        storage
            .transaction(|txn| {
                txn.apply_inbox_read(PeerId(1), 10)?;
                txn.apply_inbox_read(PeerId(1), 4)
            })
            .unwrap();
        assert_eq!(storage.inbox_max_read_id(PeerId(1)), 10);
    }

    #[test]
    fn cached_resources_are_stored() {
        let storage = MemoryStorage::new();
        storage
            .store_cached_resources(&[CachedResource {
                id: "photo:1".into(),
                data: vec![1, 2, 3],
            }])
            .unwrap();
        assert_eq!(storage.cached_resource("photo:1"), Some(vec![1, 2, 3]));
    }
}
