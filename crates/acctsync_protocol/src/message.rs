//! Messages carried by updates and differences.

use crate::ids::{MessageId, PeerId};
use serde::{Deserialize, Serialize};

/// A message as delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id (chat + id).
    pub id: MessageId,
    /// Sender, if known. `None` for channel posts.
    pub author: Option<PeerId>,
    /// Server date.
    pub date: i32,
    /// Whether the message was sent to us rather than by us.
    pub incoming: bool,
    /// Text body.
    pub text: String,
    /// Media album the message is part of.
    pub group_id: Option<i64>,
    /// Original source when the message was forwarded.
    pub forward_from: Option<PeerId>,
}

impl Message {
    /// Creates an incoming text message.
    pub fn incoming(id: MessageId, author: PeerId, date: i32, text: impl Into<String>) -> Self {
        Self {
            id,
            author: Some(author),
            date,
            incoming: true,
            text: text.into(),
            group_id: None,
            forward_from: None,
        }
    }

    /// Creates an outgoing text message.
    pub fn outgoing(id: MessageId, date: i32, text: impl Into<String>) -> Self {
        Self {
            id,
            author: None,
            date,
            incoming: false,
            text: text.into(),
            group_id: None,
            forward_from: None,
        }
    }

    /// Marks the message as part of a media album.
    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Marks the message as forwarded from `source`.
    pub fn forwarded_from(mut self, source: PeerId) -> Self {
        self.forward_from = Some(source);
        self
    }

    /// The chat this message belongs to.
    pub fn peer_id(&self) -> PeerId {
        self.id.peer_id
    }
}
