//! # Account Sync Protocol
//!
//! Value types exchanged between the account sync engine, the server and
//! local storage.
//!
//! This crate provides:
//! - `SequenceState` (pts, qts, date, seq) and difference requests
//! - Identifiers for peers, messages and media
//! - `Update` and the payloads it carries
//! - Raw pushed containers and their split into `UpdateGroup`s
//! - `Difference` responses (empty, full, slice, too long)
//!
//! This is a pure protocol crate with no I/O operations. Wire encoding is
//! left to the transport.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod difference;
mod group;
mod ids;
mod message;
mod state;
mod update;

pub use difference::Difference;
pub use group::{group_updates, RawUpdates, UpdateGroup};
pub use ids::{MediaId, MessageId, PeerId};
pub use message::Message;
pub use state::{DifferenceRequest, SequenceState};
pub use update::{
    AppUpdateInfo, CachedResource, CallUpdate, DisplayAlert, PeerNearby, Sequencing,
    TermsOfServiceUpdate, TypingActivity, Update, Webpage,
};
