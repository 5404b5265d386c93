//! Difference responses.

use crate::message::Message;
use crate::state::SequenceState;
use crate::update::Update;
use serde::{Deserialize, Serialize};

/// Server answer to a difference request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difference {
    /// Nothing happened since the requested state.
    Empty {
        /// Current server date.
        date: i32,
        /// Current container seq.
        seq: i32,
    },
    /// Everything needed to reach `state`.
    Full {
        /// New messages.
        new_messages: Vec<Message>,
        /// Other updates.
        other_updates: Vec<Update>,
        /// The state after applying this difference.
        state: SequenceState,
    },
    /// Part of the difference; request again from `intermediate_state`.
    Slice {
        /// New messages.
        new_messages: Vec<Message>,
        /// Other updates.
        other_updates: Vec<Update>,
        /// The state after applying this slice.
        intermediate_state: SequenceState,
    },
    /// The gap is too large to be served as a difference.
    TooLong {
        /// Server pts to jump to.
        pts: i32,
    },
}

impl Difference {
    /// Returns true if more slices follow this one.
    pub fn has_more(&self) -> bool {
        matches!(self, Difference::Slice { .. })
    }
}
