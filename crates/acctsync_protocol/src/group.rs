//! Pushed update containers and their split into sequencing groups.

use crate::update::{Sequencing, Update};
use serde::{Deserialize, Serialize};

/// An update container as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawUpdates {
    /// Too many updates to push; the client must fetch the difference.
    TooLong,
    /// A single update without a container sequence.
    Short {
        /// The update.
        update: Update,
        /// Server date.
        date: i32,
    },
    /// Several containers merged into one, covering `seq_start..=seq`.
    Combined {
        /// The updates.
        updates: Vec<Update>,
        /// First container seq covered.
        seq_start: i32,
        /// Last container seq covered.
        seq: i32,
        /// Server date.
        date: i32,
    },
    /// One container with sequence `seq` (0 when unsequenced).
    Batch {
        /// The updates.
        updates: Vec<Update>,
        /// Container seq.
        seq: i32,
        /// Server date.
        date: i32,
    },
}

/// A run of updates sharing one sequencing check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateGroup {
    /// Updates ending at `pts`, covering `pts_count` events.
    WithPts {
        /// The updates.
        updates: Vec<Update>,
        /// pts after the group.
        pts: i32,
        /// pts events covered.
        pts_count: i32,
    },
    /// Updates ending at `qts`.
    WithQts {
        /// The updates.
        updates: Vec<Update>,
        /// qts after the group.
        qts: i32,
    },
    /// Container updates covering `seq_start..=seq_end`.
    WithSeq {
        /// The updates.
        updates: Vec<Update>,
        /// First container seq (0 means unchecked).
        seq_start: i32,
        /// Last container seq.
        seq_end: i32,
        /// Server date.
        date: i32,
    },
    /// Updates ordered only by date.
    WithDate {
        /// The updates.
        updates: Vec<Update>,
        /// Server date.
        date: i32,
    },
    /// The server dropped updates; only a difference can recover.
    TooLong,
}

impl UpdateGroup {
    /// The updates carried by this group.
    pub fn updates(&self) -> &[Update] {
        match self {
            UpdateGroup::WithPts { updates, .. }
            | UpdateGroup::WithQts { updates, .. }
            | UpdateGroup::WithSeq { updates, .. }
            | UpdateGroup::WithDate { updates, .. } => updates,
            UpdateGroup::TooLong => &[],
        }
    }
}

/// Splits a pushed container into groups.
///
/// Every pts- or qts-stamped update becomes its own group so it can be
/// checked against the persisted counter independently. The remaining
/// updates stay together under the container's seq (or date, when the
/// container is unsequenced).
pub fn group_updates(raw: RawUpdates) -> Vec<UpdateGroup> {
    let (updates, seq_start, seq_end, date) = match raw {
        RawUpdates::TooLong => return vec![UpdateGroup::TooLong],
        RawUpdates::Short { update, date } => (vec![update], 0, 0, date),
        RawUpdates::Combined {
            updates,
            seq_start,
            seq,
            date,
        } => (updates, seq_start, seq, date),
        RawUpdates::Batch { updates, seq, date } => (updates, seq, seq, date),
    };

    let mut groups = Vec::new();
    let mut rest = Vec::new();
    for update in updates {
        match update.sequencing() {
            Sequencing::Pts { pts, count } => groups.push(UpdateGroup::WithPts {
                updates: vec![update],
                pts,
                pts_count: count,
            }),
            Sequencing::Qts(qts) => groups.push(UpdateGroup::WithQts {
                updates: vec![update],
                qts,
            }),
            Sequencing::Unsequenced => rest.push(update),
        }
    }

    if seq_end != 0 {
        groups.push(UpdateGroup::WithSeq {
            updates: rest,
            seq_start,
            seq_end,
            date,
        });
    } else if !rest.is_empty() {
        groups.push(UpdateGroup::WithDate {
            updates: rest,
            date,
        });
    }

    groups
}
