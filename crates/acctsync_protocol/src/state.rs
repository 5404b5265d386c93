//! Sequencing state and difference requests.

use serde::{Deserialize, Serialize};

/// The persisted sequencing tuple.
///
/// `pts` orders common-box updates, `qts` orders secret-chat updates and
/// `seq` orders update containers. `date` is the server time of the last
/// applied update. All counters are monotonic on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceState {
    /// Common message box counter.
    pub pts: i32,
    /// Secret chat counter.
    pub qts: i32,
    /// Server date of the last applied update.
    pub date: i32,
    /// Container sequence number.
    pub seq: i32,
}

impl SequenceState {
    /// Creates a sequencing state.
    pub fn new(pts: i32, qts: i32, date: i32, seq: i32) -> Self {
        Self { pts, qts, date, seq }
    }
}

/// Request for the updates needed to catch up from a known state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceRequest {
    /// The state the request was issued from.
    ///
    /// A response is only applied while the persisted state still equals
    /// this value.
    pub from: SequenceState,
    /// Optional cap on the number of pts events the server returns.
    pub pts_total_limit: Option<i32>,
}

impl DifferenceRequest {
    /// Creates a request issued from `from`.
    pub fn new(from: SequenceState) -> Self {
        Self {
            from,
            pts_total_limit: None,
        }
    }

    /// Sets the pts limit.
    pub fn with_pts_total_limit(mut self, limit: Option<i32>) -> Self {
        self.pts_total_limit = limit;
        self
    }
}
