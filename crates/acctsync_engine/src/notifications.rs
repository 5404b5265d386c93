//! Resolving newly stored messages into user notifications.

use crate::storage::AccountTransaction;
use acctsync_protocol::{Message, MessageId, PeerId};

/// One notification, possibly covering several messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNotification {
    /// Chat the notification belongs to.
    pub peer_id: PeerId,
    /// First message of the notification.
    pub message: Message,
    /// Every message the notification covers, in arrival order.
    pub message_ids: Vec<MessageId>,
    /// Deliver without sound.
    pub silent: bool,
}

/// Notifications produced by one dispatched event set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationBatch {
    /// Notifications in arrival order.
    pub notifications: Vec<MessageNotification>,
}

impl NotificationBatch {
    /// Returns true if there is nothing to notify about.
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// Builds notifications for `ids` as of date `now`.
///
/// Messages that are gone, outgoing, already read or in a muted chat are
/// dropped. Messages of the same media album share one notification, as do
/// consecutive forwards from the same source into the same chat.
pub fn resolve_notifications<T: AccountTransaction>(
    txn: &T,
    ids: &[MessageId],
    now: i32,
) -> NotificationBatch {
    let mut notifications: Vec<MessageNotification> = Vec::new();

    for &id in ids {
        let Some(message) = txn.message(id) else {
            continue;
        };
        if !message.incoming || id.id <= txn.inbox_max_read_id(id.peer_id) {
            continue;
        }
        let settings = txn.notification_settings(id.peer_id);
        if settings.is_muted(now) {
            continue;
        }

        let joins = match message.group_id {
            Some(group_id) => notifications.iter_mut().rev().find(|existing| {
                existing.peer_id == id.peer_id && existing.message.group_id == Some(group_id)
            }),
            None => notifications.last_mut().filter(|last| {
                last.peer_id == id.peer_id
                    && last.message.group_id.is_none()
                    && last.message.forward_from.is_some()
                    && last.message.forward_from == message.forward_from
            }),
        };
        match joins {
            Some(existing) => existing.message_ids.push(id),
            None => notifications.push(MessageNotification {
                peer_id: id.peer_id,
                message,
                message_ids: vec![id],
                silent: settings.silent,
            }),
        }
    }

    NotificationBatch { notifications }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStorage, MemoryTransaction};
    use crate::storage::{AccountStorage, AccountTransaction, NotificationSettings};

    fn store(txn: &mut MemoryTransaction, message: Message) -> MessageId {
        let id = message.id;
        txn.store_message(message).unwrap();
        id
    }

    fn incoming(peer: i64, id: i32) -> Message {
        Message::incoming(MessageId::new(PeerId(peer), id), PeerId(100), 10, "text")
    }

    #[test]
    fn one_notification_per_plain_message() {
        let mut txn = MemoryTransaction::default();
        let a = store(&mut txn, incoming(1, 1));
        let b = store(&mut txn, incoming(1, 2));

        let batch = resolve_notifications(&txn, &[a, b], 0);
        assert_eq!(batch.notifications.len(), 2);
        assert_eq!(batch.notifications[0].message_ids, vec![a]);
    }

    #[test]
    fn skips_outgoing_read_and_missing() {
        let mut txn = MemoryTransaction::default();
        let outgoing = store(
            &mut txn,
            Message::outgoing(MessageId::new(PeerId(1), 1), 10, "mine"),
        );
        let read = store(&mut txn, incoming(1, 2));
        txn.apply_inbox_read(PeerId(1), 2).unwrap();
        let missing = MessageId::new(PeerId(1), 99);

        let batch = resolve_notifications(&txn, &[outgoing, read, missing], 0);
        assert!(batch.is_empty());
    }

    #[test]
    fn album_messages_share_a_notification() {
        let mut txn = MemoryTransaction::default();
        let a = store(&mut txn, incoming(1, 1).with_group(5));
        let b = store(&mut txn, incoming(1, 2).with_group(5));
        let c = store(&mut txn, incoming(1, 3).with_group(6));

        let batch = resolve_notifications(&txn, &[a, b, c], 0);
        assert_eq!(batch.notifications.len(), 2);
        assert_eq!(batch.notifications[0].message_ids, vec![a, b]);
        assert_eq!(batch.notifications[1].message_ids, vec![c]);
    }

    #[test]
    fn forwards_from_same_source_collapse() {
        let mut txn = MemoryTransaction::default();
        let a = store(&mut txn, incoming(1, 1).forwarded_from(PeerId(50)));
        let b = store(&mut txn, incoming(1, 2).forwarded_from(PeerId(50)));
        let c = store(&mut txn, incoming(1, 3).forwarded_from(PeerId(51)));

        let batch = resolve_notifications(&txn, &[a, b, c], 0);
        assert_eq!(batch.notifications.len(), 2);
        assert_eq!(batch.notifications[0].message_ids, vec![a, b]);
    }

    #[test]
    fn interrupted_forwards_do_not_collapse() {
        let mut txn = MemoryTransaction::default();
        let a = store(&mut txn, incoming(1, 1).forwarded_from(PeerId(50)));
        let b = store(&mut txn, incoming(1, 2));
        let c = store(&mut txn, incoming(1, 3).forwarded_from(PeerId(50)));

        let batch = resolve_notifications(&txn, &[a, b, c], 0);
        let groups: Vec<_> = batch
            .notifications
            .iter()
            .map(|n| n.message_ids.clone())
            .collect();
        assert_eq!(groups, vec![vec![a], vec![b], vec![c]]);
    }

    #[test]
    fn muted_chats_are_dropped_and_silent_marked() {
        let storage = MemoryStorage::new();
        storage.set_notification_settings(
            PeerId(1),
            NotificationSettings {
                mute_until: 1000,
                silent: false,
            },
        );
        storage.set_notification_settings(
            PeerId(2),
            NotificationSettings {
                mute_until: 0,
                silent: true,
            },
        );

        let batch = storage
            .transaction(|txn| {
                let a = store(txn, incoming(1, 1));
                let b = store(txn, incoming(2, 1));
                Ok(resolve_notifications(txn, &[a, b], 500))
            })
            .unwrap();

        assert_eq!(batch.notifications.len(), 1);
        assert_eq!(batch.notifications[0].peer_id, PeerId(2));
        assert!(batch.notifications[0].silent);
    }
}
