//! Storage and event-sink collaborators.

use crate::error::{SyncError, SyncResult};
use acctsync_protocol::{
    CachedResource, CallUpdate, Message, MessageId, PeerId, SequenceState, TypingActivity,
    Webpage,
};
use std::sync::Arc;
use tokio::sync::watch;

/// Per-peer notification preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationSettings {
    /// Muted until this date (0 when not muted).
    pub mute_until: i32,
    /// Deliver without sound.
    pub silent: bool,
}

impl NotificationSettings {
    /// Returns true if the peer is muted at `now`.
    pub fn is_muted(&self, now: i32) -> bool {
        self.mute_until > now
    }
}

/// Read and write access inside one storage transaction.
pub trait AccountTransaction {
    /// Persisted sequencing state, `None` before the first authorization.
    fn state(&self) -> Option<SequenceState>;

    /// Replaces the persisted sequencing state.
    fn set_state(&mut self, state: SequenceState) -> SyncResult<()>;

    /// Stores a message. Returns true if it was not stored before.
    fn store_message(&mut self, message: Message) -> SyncResult<bool>;

    /// Deletes messages. Unknown ids are ignored.
    fn delete_messages(&mut self, ids: &[MessageId]) -> SyncResult<()>;

    /// Looks up a stored message.
    fn message(&self, id: MessageId) -> Option<Message>;

    /// Marks incoming messages up to `max_id` as read.
    fn apply_inbox_read(&mut self, peer_id: PeerId, max_id: i32) -> SyncResult<()>;

    /// Highest read incoming message id for a chat.
    fn inbox_max_read_id(&self, peer_id: PeerId) -> i32;

    /// Notification settings of a chat.
    fn notification_settings(&self, peer_id: PeerId) -> NotificationSettings;

    /// Stores a resolved webpage preview.
    fn store_webpage(&mut self, webpage: Webpage) -> SyncResult<()>;

    /// Updates the contact flag of a peer.
    fn set_contact(&mut self, peer_id: PeerId, is_contact: bool) -> SyncResult<()>;
}

/// Durable storage the engine replays into.
pub trait AccountStorage: Send + Sync + 'static {
    /// Transaction type handed to transaction bodies.
    type Transaction: AccountTransaction;

    /// Runs `body` atomically.
    ///
    /// Changes are committed when `body` returns `Ok` and discarded when it
    /// returns `Err`.
    fn transaction<T, F>(&self, body: F) -> SyncResult<T>
    where
        F: FnOnce(&mut Self::Transaction) -> SyncResult<T>;

    /// Observes the persisted sequencing state.
    fn state_view(&self) -> watch::Receiver<Option<SequenceState>>;

    /// Writes resources into the cache ahead of a replay that references them.
    fn store_cached_resources(&self, resources: &[CachedResource]) -> SyncResult<()>;
}

/// Runs a transaction on the blocking pool.
pub(crate) async fn run_transaction<S, T, F>(storage: Arc<S>, body: F) -> SyncResult<T>
where
    S: AccountStorage,
    T: Send + 'static,
    F: FnOnce(&mut S::Transaction) -> SyncResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || storage.transaction(body))
        .await
        .map_err(|err| SyncError::storage(format!("storage task failed: {err}")))?
}

/// Consumer of replay effects that live outside storage.
///
/// Typing-activity tracking, call-session management and contact lists hook
/// in here. Every method defaults to doing nothing.
pub trait AccountEventSink: Send + Sync + 'static {
    /// A user started or stopped an activity in a chat.
    fn typing_activity(&self, chat_id: PeerId, user_id: PeerId, activity: Option<TypingActivity>) {
        let _ = (chat_id, user_id, activity);
    }

    /// A call changed state.
    fn call_update(&self, update: &CallUpdate) {
        let _ = update;
    }

    /// Contact flags changed.
    fn contact_flags(&self, updates: &[(PeerId, bool)]) {
        let _ = updates;
    }
}

/// Event sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl AccountEventSink for NoopEventSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muted_until_future_date() {
        let settings = NotificationSettings {
            mute_until: 100,
            silent: false,
        };
        assert!(settings.is_muted(99));
        assert!(!settings.is_muted(100));
        assert!(!NotificationSettings::default().is_muted(0));
    }
}
