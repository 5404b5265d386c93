//! The ordered list of pending and running operations.
//!
//! The queue is plain data owned by the engine worker. It knows how to
//! insert, coalesce and restructure operations; starting them is the
//! worker's job.
//!
//! # Invariants
//!
//! - At most one operation is running, and it is always the head
//! - A running head is never displaced or reordered
//! - Restructuring keeps update batches, completion polls, event sets and
//!   precomputed replays, in their relative order

use crate::events::AccountFinalStateEvents;
use acctsync_protocol::{CachedResource, MessageId, UpdateGroup};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::oneshot;

/// Caller-supplied work run as a queue operation.
pub(crate) type BoxedWork = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifier of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Where a new operation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    /// Right at the front, or right behind a running head.
    First,
    /// At the tail.
    Last,
}

/// A final state built outside the engine, replayed in queue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecomputedFinalState {
    /// Update groups to replay.
    pub groups: Vec<UpdateGroup>,
    /// Resources written to the cache before the replay.
    pub resources: Vec<CachedResource>,
}

/// A completion-poll caller waiting for message ids.
pub(crate) struct CompletionSubscriber {
    pub id: u64,
    pub sender: oneshot::Sender<Vec<MessageId>>,
}

impl fmt::Debug for CompletionSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSubscriber")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// What an operation does when started.
pub(crate) enum OperationContent {
    /// Fetch and replay the server difference, carrying events from earlier slices.
    PollDifference { events: AccountFinalStateEvents },
    /// Debounce pushed groups before processing them.
    CollectUpdateGroups {
        groups: Vec<UpdateGroup>,
        timeout: Duration,
    },
    /// Validate and replay pushed groups.
    ProcessUpdateGroups { groups: Vec<UpdateGroup> },
    /// Run caller-supplied work.
    Custom { work: Option<BoxedWork> },
    /// Report processed incoming message ids once the queue drains.
    PollCompletion {
        message_ids: Vec<MessageId>,
        subscribers: Vec<CompletionSubscriber>,
    },
    /// Dispatch replay effects.
    ProcessEvents { events: AccountFinalStateEvents },
    /// Replay a final state built elsewhere.
    ReplayPrecomputedFinalState {
        state: Option<PrecomputedFinalState>,
        completion: Option<oneshot::Sender<bool>>,
    },
}

impl OperationContent {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            OperationContent::PollDifference { .. } => OperationKind::PollDifference,
            OperationContent::CollectUpdateGroups { .. } => OperationKind::CollectUpdateGroups,
            OperationContent::ProcessUpdateGroups { .. } => OperationKind::ProcessUpdateGroups,
            OperationContent::Custom { .. } => OperationKind::Custom,
            OperationContent::PollCompletion { .. } => OperationKind::PollCompletion,
            OperationContent::ProcessEvents { .. } => OperationKind::ProcessEvents,
            OperationContent::ReplayPrecomputedFinalState { .. } => {
                OperationKind::ReplayPrecomputedFinalState
            }
        }
    }
}

impl fmt::Debug for OperationContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationContent::CollectUpdateGroups { groups, timeout } => f
                .debug_struct("CollectUpdateGroups")
                .field("groups", &groups.len())
                .field("timeout", timeout)
                .finish(),
            OperationContent::ProcessUpdateGroups { groups } => f
                .debug_struct("ProcessUpdateGroups")
                .field("groups", &groups.len())
                .finish(),
            OperationContent::PollCompletion {
                message_ids,
                subscribers,
            } => f
                .debug_struct("PollCompletion")
                .field("message_ids", &message_ids.len())
                .field("subscribers", &subscribers.len())
                .finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// Kind of a queued operation, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Difference poll.
    PollDifference,
    /// Debounced pushed groups.
    CollectUpdateGroups,
    /// Pushed groups being replayed.
    ProcessUpdateGroups,
    /// Caller-supplied work.
    Custom,
    /// Completion barrier.
    PollCompletion,
    /// Event dispatch.
    ProcessEvents,
    /// Externally built final state.
    ReplayPrecomputedFinalState,
}

/// Point-in-time view of one queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Operation id.
    pub id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Whether it is the running head.
    pub running: bool,
}

/// A queued operation.
#[derive(Debug)]
pub(crate) struct Operation {
    pub id: OperationId,
    pub content: OperationContent,
    pub running: bool,
}

/// Ordered operations with single-flight execution.
#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    operations: VecDeque<Operation>,
    next_id: u64,
}

impl OperationQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn make(&mut self, content: OperationContent) -> Operation {
        self.next_id += 1;
        Operation {
            id: OperationId(self.next_id),
            content,
            running: false,
        }
    }

    /// Inserts an operation. Never displaces a running head.
    pub(crate) fn insert(&mut self, content: OperationContent, position: Position) -> OperationId {
        let operation = self.make(content);
        let id = operation.id;
        match position {
            Position::First => {
                if self.operations.front().map_or(false, |head| head.running) {
                    self.operations.insert(1, operation);
                } else {
                    self.operations.push_front(operation);
                }
            }
            Position::Last => self.operations.push_back(operation),
        }
        id
    }

    /// Rebuilds the queue around `content`.
    ///
    /// Keeps the running head, then pending update batches, then `content`,
    /// then a single completion poll merging every pending one, then pending
    /// event sets and precomputed replays in their original order. Everything
    /// else is dropped.
    pub(crate) fn replace_with(&mut self, content: OperationContent) -> OperationId {
        let mut kept = VecDeque::new();
        let mut update_batches = Vec::new();
        let mut message_ids = Vec::new();
        let mut subscribers = Vec::new();
        let mut has_completion = false;
        let mut trailing = Vec::new();

        for operation in self.operations.drain(..) {
            if operation.running {
                kept.push_back(operation);
                continue;
            }
            match operation.content {
                OperationContent::ProcessUpdateGroups { .. } => update_batches.push(operation),
                OperationContent::PollCompletion {
                    message_ids: ids,
                    subscribers: subs,
                } => {
                    has_completion = true;
                    message_ids.extend(ids);
                    subscribers.extend(subs);
                }
                OperationContent::ProcessEvents { .. }
                | OperationContent::ReplayPrecomputedFinalState { .. } => trailing.push(operation),
                _ => {}
            }
        }

        kept.extend(update_batches);
        self.operations = kept;
        let id = self.insert(content, Position::Last);
        if has_completion {
            self.insert(
                OperationContent::PollCompletion {
                    message_ids,
                    subscribers,
                },
                Position::Last,
            );
        }
        self.operations.extend(trailing);
        id
    }

    /// Appends `groups` to a collect operation at the tail.
    ///
    /// A running collect only takes more groups while it is a push debounce
    /// (zero timeout); its groups are read when the timer fires. A running
    /// stall debounce is left alone. Returns the groups back otherwise.
    pub(crate) fn extend_pending_collect(
        &mut self,
        groups: Vec<UpdateGroup>,
    ) -> Result<(), Vec<UpdateGroup>> {
        match self.operations.back_mut() {
            Some(Operation {
                content:
                    OperationContent::CollectUpdateGroups {
                        groups: pending,
                        timeout,
                    },
                running,
                ..
            }) if !*running || timeout.is_zero() => {
                pending.extend(groups);
                Ok(())
            }
            _ => Err(groups),
        }
    }

    /// Adds a subscriber to the existing completion poll, if there is one.
    pub(crate) fn join_completion(
        &mut self,
        subscriber: CompletionSubscriber,
    ) -> Result<(), CompletionSubscriber> {
        match self.completion_subscribers_mut() {
            Some((_, subscribers)) => {
                subscribers.push(subscriber);
                Ok(())
            }
            None => Err(subscriber),
        }
    }

    /// Message ids and subscribers of the live completion poll.
    pub(crate) fn completion_subscribers_mut(
        &mut self,
    ) -> Option<(&mut Vec<MessageId>, &mut Vec<CompletionSubscriber>)> {
        debug_assert!(self.completion_count() <= 1);
        self.operations
            .iter_mut()
            .find_map(|operation| match &mut operation.content {
                OperationContent::PollCompletion {
                    message_ids,
                    subscribers,
                } => Some((message_ids, subscribers)),
                _ => None,
            })
    }

    fn completion_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op.content, OperationContent::PollCompletion { .. }))
            .count()
    }

    pub(crate) fn head_mut(&mut self) -> Option<&mut Operation> {
        self.operations.front_mut()
    }

    /// Removes the head if it is operation `id`.
    pub(crate) fn pop_head(&mut self, id: OperationId) -> Option<Operation> {
        if self.operations.front().map(|head| head.id) == Some(id) {
            self.operations.pop_front()
        } else {
            None
        }
    }

    /// Returns true if `id` is the running head.
    pub(crate) fn is_running_head(&self, id: OperationId) -> bool {
        self.operations
            .front()
            .map_or(false, |head| head.id == id && head.running)
    }

    /// Returns true while a difference poll is queued or a stall debounce runs.
    pub(crate) fn is_updating(&self) -> bool {
        self.operations.iter().any(|operation| match &operation.content {
            OperationContent::PollDifference { .. } => true,
            OperationContent::CollectUpdateGroups { timeout, .. } => {
                operation.running && !timeout.is_zero()
            }
            _ => false,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<OperationSnapshot> {
        self.operations
            .iter()
            .map(|operation| OperationSnapshot {
                id: operation.id,
                kind: operation.content.kind(),
                running: operation.running,
            })
            .collect()
    }
}
