//! Identifiers for peers, messages and media.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user, group or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub i64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Identifier of a message within the history of one peer.
///
/// Message ids are only unique per peer, so the peer is part of the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    /// The chat the message belongs to.
    pub peer_id: PeerId,
    /// Server-assigned id, monotonic within the chat.
    pub id: i32,
}

impl MessageId {
    /// Creates a message id.
    pub fn new(peer_id: PeerId, id: i32) -> Self {
        Self { peer_id, id }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.peer_id, self.id)
    }
}

/// Identifier of a media object such as a webpage preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaId(pub i64);
