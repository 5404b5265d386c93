//! Applying update groups and differences to storage.
//!
//! Everything here runs inside a storage transaction. Callers read the
//! sequencing state first (the snapshot), do their network or scheduling
//! work, and then replay against the state they observed. Replay refuses to
//! touch storage if the persisted state moved in between, so a batch is
//! either applied on top of exactly the state it was prepared for or not at
//! all.

use crate::error::{SyncError, SyncResult};
use crate::events::AccountFinalStateEvents;
use crate::storage::AccountTransaction;
use acctsync_protocol::{Difference, Message, SequenceState, Update, UpdateGroup};
use tracing::trace;

/// Result of replaying a batch of update groups.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GroupReplay {
    /// Effects to dispatch.
    pub events: AccountFinalStateEvents,
    /// Some groups could not be applied yet because of a gap.
    pub incomplete: bool,
    /// The batch asked for a server difference.
    pub should_poll: bool,
    /// Groups held back by a gap.
    pub remaining: Vec<UpdateGroup>,
}

/// Result of replaying a difference response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DifferenceReplay {
    /// Storage moved away from the requested state; nothing was applied.
    Mismatch {
        /// State found in storage.
        found: Option<SequenceState>,
    },
    /// The difference was applied.
    Applied {
        /// State after the replay.
        state: SequenceState,
        /// Effects to dispatch.
        events: AccountFinalStateEvents,
        /// More slices follow.
        more: bool,
    },
}

/// Reads the state a batch will be validated against.
pub(crate) fn initial_snapshot<T: AccountTransaction>(txn: &T) -> Option<SequenceState> {
    txn.state()
}

fn ensure_state<T: AccountTransaction>(txn: &T, expected: SequenceState) -> SyncResult<()> {
    match txn.state() {
        Some(found) if found == expected => Ok(()),
        found => Err(SyncError::StateMismatch { expected, found }),
    }
}

/// Replays pushed update groups on top of `expected`.
///
/// pts groups are applied in order of their prior pts, qts groups in qts
/// order and seq groups in seq order. Groups already covered by the
/// persisted counters are skipped. The first gap in a counter holds back
/// that group and every later group of the same counter.
pub(crate) fn replay_update_groups<T: AccountTransaction>(
    txn: &mut T,
    expected: SequenceState,
    groups: Vec<UpdateGroup>,
) -> SyncResult<GroupReplay> {
    ensure_state(txn, expected)?;

    let mut pts_groups = Vec::new();
    let mut qts_groups = Vec::new();
    let mut seq_groups = Vec::new();
    let mut date_groups = Vec::new();
    let mut should_poll = false;

    for group in groups {
        match group {
            UpdateGroup::WithPts { .. } => pts_groups.push(group),
            UpdateGroup::WithQts { .. } => qts_groups.push(group),
            UpdateGroup::WithSeq { .. } => seq_groups.push(group),
            UpdateGroup::WithDate { .. } => date_groups.push(group),
            UpdateGroup::TooLong => should_poll = true,
        }
    }

    pts_groups.sort_by_key(|group| match group {
        UpdateGroup::WithPts { pts, pts_count, .. } => pts - pts_count,
        _ => 0,
    });
    qts_groups.sort_by_key(|group| match group {
        UpdateGroup::WithQts { qts, .. } => *qts,
        _ => 0,
    });
    seq_groups.sort_by_key(|group| match group {
        UpdateGroup::WithSeq { seq_start, .. } => *seq_start,
        _ => 0,
    });

    let mut state = expected;
    let mut events = AccountFinalStateEvents::new();
    let mut remaining = Vec::new();

    let mut pts_gap = false;
    for group in pts_groups {
        let UpdateGroup::WithPts {
            updates,
            pts,
            pts_count,
        } = group
        else {
            continue;
        };
        if !pts_gap && pts - pts_count == state.pts {
            apply_updates(txn, updates, &mut events)?;
            state.pts = pts;
        } else if !pts_gap && pts <= state.pts {
            trace!(pts, current = state.pts, "skipping already applied pts group");
        } else {
            pts_gap = true;
            remaining.push(UpdateGroup::WithPts {
                updates,
                pts,
                pts_count,
            });
        }
    }

    let mut qts_gap = false;
    for group in qts_groups {
        let UpdateGroup::WithQts { updates, qts } = group else {
            continue;
        };
        if !qts_gap && qts - 1 == state.qts {
            apply_updates(txn, updates, &mut events)?;
            state.qts = qts;
            events.updated_qts = Some(events.updated_qts.map_or(qts, |q| q.max(qts)));
        } else if !qts_gap && qts <= state.qts {
            trace!(qts, current = state.qts, "skipping already applied qts group");
        } else {
            qts_gap = true;
            remaining.push(UpdateGroup::WithQts { updates, qts });
        }
    }

    let mut seq_gap = false;
    for group in seq_groups {
        let UpdateGroup::WithSeq {
            updates,
            seq_start,
            seq_end,
            date,
        } = group
        else {
            continue;
        };
        if !seq_gap && (seq_start == 0 || seq_start == state.seq + 1) {
            apply_updates(txn, updates, &mut events)?;
            state.seq = state.seq.max(seq_end);
            state.date = state.date.max(date);
        } else if !seq_gap && seq_end <= state.seq {
            trace!(seq_end, current = state.seq, "skipping already applied seq group");
        } else {
            seq_gap = true;
            remaining.push(UpdateGroup::WithSeq {
                updates,
                seq_start,
                seq_end,
                date,
            });
        }
    }

    for group in date_groups {
        if let UpdateGroup::WithDate { updates, date } = group {
            apply_updates(txn, updates, &mut events)?;
            state.date = state.date.max(date);
        }
    }

    if state != expected {
        txn.set_state(state)?;
    }

    Ok(GroupReplay {
        events,
        incomplete: !remaining.is_empty(),
        should_poll,
        remaining,
    })
}

/// Replays a difference requested from `expected`.
///
/// The persisted state is compared before anything is written, so a
/// mismatch leaves storage untouched.
pub(crate) fn replay_difference<T: AccountTransaction>(
    txn: &mut T,
    expected: SequenceState,
    difference: Difference,
) -> SyncResult<DifferenceReplay> {
    let found = txn.state();
    if found != Some(expected) {
        return Ok(DifferenceReplay::Mismatch { found });
    }

    let mut events = AccountFinalStateEvents::new();
    let (state, more) = match difference {
        Difference::Empty { date, seq } => {
            let state = SequenceState {
                date,
                seq,
                ..expected
            };
            (state, false)
        }
        Difference::Full {
            new_messages,
            other_updates,
            state,
        } => {
            apply_messages(txn, new_messages, &mut events)?;
            apply_updates(txn, other_updates, &mut events)?;
            (state, false)
        }
        Difference::Slice {
            new_messages,
            other_updates,
            intermediate_state,
        } => {
            apply_messages(txn, new_messages, &mut events)?;
            apply_updates(txn, other_updates, &mut events)?;
            (intermediate_state, true)
        }
        Difference::TooLong { pts } => return Err(SyncError::DifferenceTooLong { pts }),
    };

    if state.qts != expected.qts {
        events.updated_qts = Some(state.qts);
    }
    if state != expected {
        txn.set_state(state)?;
    }

    Ok(DifferenceReplay::Applied {
        state,
        events,
        more,
    })
}

fn apply_messages<T: AccountTransaction>(
    txn: &mut T,
    messages: Vec<Message>,
    events: &mut AccountFinalStateEvents,
) -> SyncResult<()> {
    for message in messages {
        store_message(txn, message, events)?;
    }
    Ok(())
}

fn apply_updates<T: AccountTransaction>(
    txn: &mut T,
    updates: Vec<Update>,
    events: &mut AccountFinalStateEvents,
) -> SyncResult<()> {
    for update in updates {
        apply_update(txn, update, events)?;
    }
    Ok(())
}

fn store_message<T: AccountTransaction>(
    txn: &mut T,
    message: Message,
    events: &mut AccountFinalStateEvents,
) -> SyncResult<()> {
    let id = message.id;
    let incoming = message.incoming;
    let author = message.author;
    if txn.store_message(message)? && incoming {
        events.added_incoming_message_ids.push(id);
        if let Some(author) = author {
            // A sent message ends whatever its author was doing in the chat.
            events.set_typing(id.peer_id, author, None);
        }
    }
    Ok(())
}

fn apply_update<T: AccountTransaction>(
    txn: &mut T,
    update: Update,
    events: &mut AccountFinalStateEvents,
) -> SyncResult<()> {
    match update {
        Update::NewMessage { message, .. } | Update::NewEncryptedMessage { message, .. } => {
            store_message(txn, message, events)?;
        }
        Update::DeleteMessages { ids, .. } => {
            txn.delete_messages(&ids)?;
        }
        Update::ReadInbox {
            peer_id, max_id, ..
        } => {
            txn.apply_inbox_read(peer_id, max_id)?;
            events.updated_max_read_message_id = Some(
                events
                    .updated_max_read_message_id
                    .map_or(max_id, |current| current.max(max_id)),
            );
        }
        Update::ReadOutbox {
            peer_id, max_id, ..
        } => {
            events.read_acknowledgements.push((peer_id, max_id));
        }
        Update::WebpageUpdated { webpage, .. } => {
            txn.store_webpage(webpage.clone())?;
            events.updated_webpages.insert(webpage.media_id, webpage);
        }
        Update::UserTyping {
            chat_id,
            user_id,
            activity,
        } => {
            events.set_typing(chat_id, user_id, activity);
        }
        Update::PeersNearby(peers) => {
            events.updated_peers_nearby = Some(peers);
        }
        Update::PhoneCall(call) => {
            events.updated_calls.push(call);
        }
        Update::ContactFlag {
            peer_id,
            is_contact,
        } => {
            txn.set_contact(peer_id, is_contact)?;
            events.is_contact_updates.push((peer_id, is_contact));
        }
        Update::ServiceNotification(alert) => {
            events.display_alerts.push(alert);
        }
        Update::PeerUpdated(peer_id) => {
            events.externally_updated_peer_ids.push(peer_id);
        }
        Update::DelayNotifications { until } => {
            events.delay_notifications_until = Some(until);
        }
        Update::TermsOfService(terms) => {
            events.terms_of_service_update = Some(terms);
        }
        Update::AppUpdate(info) => {
            events.app_update_info = Some(info);
        }
    }
    Ok(())
}
