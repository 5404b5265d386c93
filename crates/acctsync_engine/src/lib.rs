//! # Account Sync Engine
//!
//! Keeps a client's persisted account state consistent with a messaging
//! server that both pushes incremental updates and serves a catch-up
//! difference.
//!
//! This crate provides:
//! - The operation queue actor (`AccountStateManager`)
//! - Debounced collection and transactional replay of pushed update groups
//! - Difference polling across multi-slice responses
//! - Event dispatch to subscribers and last-value cells
//! - Completion polls that report processed message ids
//! - Storage, network and event-sink traits with in-memory and mock
//!   implementations
//!
//! ## Architecture
//!
//! A single worker task owns the queue. Callers enqueue commands; network
//! requests and storage transactions run on other tasks and report back to
//! the worker, which is the only place queue state changes.
//!
//! ## Key Invariants
//!
//! - At most one operation runs at a time
//! - Updates are applied only on top of the exact state they were prepared for
//! - A state mismatch applies nothing and is retried, never surfaced
//! - At most one completion poll exists; new waiters join it
//! - Events accumulated over difference slices survive queue restructuring

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bag;
mod config;
mod error;
mod events;
mod manager;
mod memory;
mod notifications;
mod poller;
mod queue;
mod replay;
mod stats;
mod storage;
mod transport;
mod worker;

pub use config::EngineConfig;
pub use error::{SyncError, SyncResult};
pub use events::{AccountFinalStateEvents, TypingDeltas};
pub use manager::{AccountStateManager, CompletionPoll, Subscription};
pub use memory::{MemoryStorage, MemoryTransaction};
pub use notifications::{resolve_notifications, MessageNotification, NotificationBatch};
pub use queue::{OperationId, OperationKind, OperationSnapshot, PrecomputedFinalState};
pub use stats::EngineStats;
pub use storage::{
    AccountEventSink, AccountStorage, AccountTransaction, NoopEventSink, NotificationSettings,
};
pub use transport::{AccountNetwork, MockNetwork};
