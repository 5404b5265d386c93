//! Observable effects of a replay.

use acctsync_protocol::{
    AppUpdateInfo, CallUpdate, DisplayAlert, MediaId, MessageId, PeerId, PeerNearby,
    TermsOfServiceUpdate, TypingActivity, Webpage,
};
use std::collections::BTreeMap;

/// Typing activities keyed by chat, then by acting user.
///
/// A `None` activity clears whatever the user was doing in that chat.
pub type TypingDeltas = BTreeMap<PeerId, BTreeMap<PeerId, Option<TypingActivity>>>;

/// Everything a replay produced that subscribers outside storage care about.
///
/// Consecutive partial results (difference slices, retried batches) are
/// combined with [`merge`](Self::merge): lists concatenate without dedup,
/// maps take the union with later entries winning, the two "max" fields keep
/// the larger value and remaining scalars are last-write-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFinalStateEvents {
    /// Incoming messages stored for the first time.
    pub added_incoming_message_ids: Vec<MessageId>,
    /// Typing activity changes.
    pub updated_typing_activities: TypingDeltas,
    /// Resolved webpage previews.
    pub updated_webpages: BTreeMap<MediaId, Webpage>,
    /// Latest people-nearby list.
    pub updated_peers_nearby: Option<Vec<PeerNearby>>,
    /// Call state changes, in arrival order.
    pub updated_calls: Vec<CallUpdate>,
    /// Contact flag changes.
    pub is_contact_updates: Vec<(PeerId, bool)>,
    /// Highest inbox read id seen.
    pub updated_max_read_message_id: Option<i32>,
    /// Highest qts applied.
    pub updated_qts: Option<i32>,
    /// Alerts to display.
    pub display_alerts: Vec<DisplayAlert>,
    /// Peers whose data changed outside the update stream.
    pub externally_updated_peer_ids: Vec<PeerId>,
    /// Outgoing read acknowledgements (chat, max read id).
    pub read_acknowledgements: Vec<(PeerId, i32)>,
    /// Hold notifications until this date.
    pub delay_notifications_until: Option<i32>,
    /// New terms of service.
    pub terms_of_service_update: Option<TermsOfServiceUpdate>,
    /// Available client update.
    pub app_update_info: Option<AppUpdateInfo>,
}

impl AccountFinalStateEvents {
    /// Creates an empty event set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an event set carrying only display alerts.
    pub fn with_display_alerts(display_alerts: Vec<DisplayAlert>) -> Self {
        Self {
            display_alerts,
            ..Self::default()
        }
    }

    /// Returns true if nothing would be dispatched.
    pub fn is_empty(&self) -> bool {
        self.added_incoming_message_ids.is_empty()
            && self.updated_typing_activities.is_empty()
            && self.updated_webpages.is_empty()
            && self.updated_peers_nearby.is_none()
            && self.updated_calls.is_empty()
            && self.is_contact_updates.is_empty()
            && self.updated_max_read_message_id.is_none()
            && self.updated_qts.is_none()
            && self.display_alerts.is_empty()
            && self.externally_updated_peer_ids.is_empty()
            && self.read_acknowledgements.is_empty()
            && self.delay_notifications_until.is_none()
            && self.terms_of_service_update.is_none()
            && self.app_update_info.is_none()
    }

    /// Combines `other` into `self`, `other` being the later result.
    pub fn merge(&mut self, other: AccountFinalStateEvents) {
        self.added_incoming_message_ids
            .extend(other.added_incoming_message_ids);
        for (chat, activities) in other.updated_typing_activities {
            self.updated_typing_activities
                .entry(chat)
                .or_default()
                .extend(activities);
        }
        self.updated_webpages.extend(other.updated_webpages);
        if other.updated_peers_nearby.is_some() {
            self.updated_peers_nearby = other.updated_peers_nearby;
        }
        self.updated_calls.extend(other.updated_calls);
        self.is_contact_updates.extend(other.is_contact_updates);
        self.updated_max_read_message_id =
            max_option(self.updated_max_read_message_id, other.updated_max_read_message_id);
        self.updated_qts = max_option(self.updated_qts, other.updated_qts);
        self.display_alerts.extend(other.display_alerts);
        self.externally_updated_peer_ids
            .extend(other.externally_updated_peer_ids);
        self.read_acknowledgements.extend(other.read_acknowledgements);
        if other.delay_notifications_until.is_some() {
            self.delay_notifications_until = other.delay_notifications_until;
        }
        if other.terms_of_service_update.is_some() {
            self.terms_of_service_update = other.terms_of_service_update;
        }
        if other.app_update_info.is_some() {
            self.app_update_info = other.app_update_info;
        }
    }

    /// Returns the merge of `self` and `other`.
    pub fn merged(mut self, other: AccountFinalStateEvents) -> Self {
        self.merge(other);
        self
    }

    pub(crate) fn set_typing(&mut self, chat: PeerId, user: PeerId, activity: Option<TypingActivity>) {
        self.updated_typing_activities
            .entry(chat)
            .or_default()
            .insert(user, activity);
    }
}

fn max_option(a: Option<i32>, b: Option<i32>) -> Option<i32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
