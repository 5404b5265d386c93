//! Individual server updates.

use crate::ids::{MediaId, MessageId, PeerId};
use crate::message::Message;
use serde::{Deserialize, Serialize};

/// What a user is currently doing in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypingActivity {
    /// Typing text.
    Typing,
    /// Recording a voice message.
    RecordingVoice,
    /// Uploading a photo.
    UploadingPhoto,
    /// Choosing a sticker.
    ChoosingSticker,
}

/// A webpage preview that finished loading on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webpage {
    /// Media id of the preview.
    pub media_id: MediaId,
    /// Page URL.
    pub url: String,
    /// Page title, once resolved.
    pub title: Option<String>,
}

/// A peer reported by the geo "people nearby" feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNearby {
    /// The peer.
    pub peer_id: PeerId,
    /// Expiration date of the record.
    pub expires: i32,
    /// Distance in meters.
    pub distance: i32,
}

/// A change in the state of a phone call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUpdate {
    /// Server call id.
    pub call_id: i64,
    /// Other participant.
    pub peer_id: PeerId,
    /// Opaque state name (`requested`, `accepted`, `discarded`, ...).
    pub state: String,
}

/// A server-originated alert to show to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayAlert {
    /// Alert text.
    pub text: String,
    /// Whether the alert reports that the session was terminated.
    pub is_drop_auth: bool,
}

/// New terms of service the user must accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsOfServiceUpdate {
    /// Document id.
    pub id: String,
    /// Document text.
    pub text: String,
    /// Minimum age, if the terms impose one.
    pub min_age: Option<i32>,
}

/// Information about an available client update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUpdateInfo {
    /// Whether the update is mandatory.
    pub blocking: bool,
    /// Version string.
    pub version: String,
    /// Release notes.
    pub text: String,
}

/// A cached resource delivered inline with a precomputed final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResource {
    /// Resource key.
    pub id: String,
    /// Resource bytes.
    pub data: Vec<u8>,
}

/// The counter an update advances, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequencing {
    /// Advances pts by `count`, ending at `pts`.
    Pts {
        /// pts after the update.
        pts: i32,
        /// Number of pts events the update covers.
        count: i32,
    },
    /// Advances qts to `qts`.
    Qts(i32),
    /// Ordered only by its container.
    Unsequenced,
}

/// A single server update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Update {
    /// A message was added to a chat.
    NewMessage {
        /// The message.
        message: Message,
        /// pts after the update.
        pts: i32,
        /// pts events covered.
        pts_count: i32,
    },
    /// A secret-chat message arrived.
    NewEncryptedMessage {
        /// The decrypted message.
        message: Message,
        /// qts after the update.
        qts: i32,
    },
    /// Messages were deleted.
    DeleteMessages {
        /// Deleted ids.
        ids: Vec<MessageId>,
        /// pts after the update.
        pts: i32,
        /// pts events covered.
        pts_count: i32,
    },
    /// Incoming messages up to `max_id` were read on another device.
    ReadInbox {
        /// The chat.
        peer_id: PeerId,
        /// Highest read id.
        max_id: i32,
        /// pts after the update.
        pts: i32,
        /// pts events covered.
        pts_count: i32,
    },
    /// Our outgoing messages up to `max_id` were read by the other side.
    ReadOutbox {
        /// The chat.
        peer_id: PeerId,
        /// Highest read id.
        max_id: i32,
        /// pts after the update.
        pts: i32,
        /// pts events covered.
        pts_count: i32,
    },
    /// A webpage preview was resolved.
    WebpageUpdated {
        /// The preview.
        webpage: Webpage,
        /// pts after the update.
        pts: i32,
        /// pts events covered.
        pts_count: i32,
    },
    /// A user started or stopped an activity in a chat.
    UserTyping {
        /// The chat.
        chat_id: PeerId,
        /// The acting user.
        user_id: PeerId,
        /// `None` cancels the activity.
        activity: Option<TypingActivity>,
    },
    /// The people-nearby list changed.
    PeersNearby(Vec<PeerNearby>),
    /// A phone call changed state.
    PhoneCall(CallUpdate),
    /// A peer was added to or removed from contacts.
    ContactFlag {
        /// The peer.
        peer_id: PeerId,
        /// Whether the peer is now a contact.
        is_contact: bool,
    },
    /// The server asks to display an alert.
    ServiceNotification(DisplayAlert),
    /// Peer data changed and must be refetched.
    PeerUpdated(PeerId),
    /// Notifications should be held back until the given date.
    DelayNotifications {
        /// Server date until which notifications are delayed.
        until: i32,
    },
    /// New terms of service are available.
    TermsOfService(TermsOfServiceUpdate),
    /// A client update is available.
    AppUpdate(AppUpdateInfo),
}

impl Update {
    /// The counter this update advances.
    pub fn sequencing(&self) -> Sequencing {
        match self {
            Update::NewMessage { pts, pts_count, .. }
            | Update::DeleteMessages { pts, pts_count, .. }
            | Update::ReadInbox { pts, pts_count, .. }
            | Update::ReadOutbox { pts, pts_count, .. }
            | Update::WebpageUpdated { pts, pts_count, .. } => Sequencing::Pts {
                pts: *pts,
                count: *pts_count,
            },
            Update::NewEncryptedMessage { qts, .. } => Sequencing::Qts(*qts),
            _ => Sequencing::Unsequenced,
        }
    }
}
