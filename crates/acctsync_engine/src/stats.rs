//! Engine counters.

use parking_lot::RwLock;
use std::sync::Arc;

/// Counters describing what the engine has done so far.
///
/// Silent retry paths bump a counter here so a loop of repeated failures
/// shows up even though nothing is surfaced to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Difference requests sent.
    pub differences_polled: u64,
    /// Partial difference responses applied.
    pub slices_applied: u64,
    /// Pushed update batches replayed.
    pub batches_replayed: u64,
    /// Replays skipped because storage moved underneath them.
    pub state_mismatches: u64,
    /// Replays or requests that failed and were retried later.
    pub replay_failures: u64,
    /// Completion fences sent.
    pub fences_issued: u64,
    /// Completion fences that failed.
    pub fence_failures: u64,
    /// Custom operations run to completion.
    pub custom_operations: u64,
    /// Replays slower than the configured threshold.
    pub slow_replays: u64,
    /// Last error seen.
    pub last_error: Option<String>,
}

/// Stats shared between the worker and handles.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStats(Arc<RwLock<EngineStats>>);

impl SharedStats {
    pub(crate) fn snapshot(&self) -> EngineStats {
        self.0.read().clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut EngineStats)) {
        f(&mut self.0.write());
    }

    pub(crate) fn record_error(&self, error: &impl ToString) {
        self.0.write().last_error = Some(error.to_string());
    }
}
