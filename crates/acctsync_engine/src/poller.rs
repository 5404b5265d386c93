//! One iteration of the difference poll.
//!
//! Runs off the engine worker. The worker turns the returned outcome into
//! queue changes.

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::events::AccountFinalStateEvents;
use crate::replay::{replay_difference, DifferenceReplay};
use crate::stats::SharedStats;
use crate::storage::{run_transaction, AccountStorage, AccountTransaction};
use crate::transport::AccountNetwork;
use acctsync_protocol::{Difference, DifferenceRequest, SequenceState};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What one poll iteration did.
#[derive(Debug)]
pub(crate) enum DifferenceOutcome {
    /// There was no persisted state; the server state was stored as is.
    StateInitialized { state: SequenceState },
    /// A difference was applied. `events` holds everything accumulated so far.
    Applied {
        events: AccountFinalStateEvents,
        more: bool,
    },
    /// Storage moved away from the requested state. Nothing was applied.
    Mismatch { events: AccountFinalStateEvents },
    /// The server cannot serve a difference from the persisted state.
    TooLong {
        pts: i32,
        events: AccountFinalStateEvents,
    },
    /// A request failed after the network layer gave up.
    Failed {
        events: AccountFinalStateEvents,
        error: SyncError,
    },
    /// Applying the difference failed.
    ReplayFailed { error: SyncError },
}

/// Runs one iteration of the difference poll.
pub(crate) async fn poll_difference<S, N>(
    storage: Arc<S>,
    network: Arc<N>,
    config: EngineConfig,
    stats: SharedStats,
    events: AccountFinalStateEvents,
) -> DifferenceOutcome
where
    S: AccountStorage,
    N: AccountNetwork,
{
    let persisted = match run_transaction(Arc::clone(&storage), |txn| Ok(txn.state())).await {
        Ok(state) => state,
        Err(error) => return DifferenceOutcome::Failed { events, error },
    };

    let Some(from) = persisted else {
        return initialize_state(storage, network, events).await;
    };

    let request = DifferenceRequest::new(from).with_pts_total_limit(config.difference_pts_limit);
    stats.update(|s| s.differences_polled += 1);
    debug!(pts = from.pts, qts = from.qts, date = from.date, "requesting difference");

    let difference = match network.difference(request).await {
        Ok(difference) => difference,
        Err(SyncError::DuplicateSession) => {
            debug!("difference served to a duplicate session, treating as empty");
            return DifferenceOutcome::Applied {
                events,
                more: false,
            };
        }
        Err(error) => return DifferenceOutcome::Failed { events, error },
    };

    if let Difference::TooLong { pts } = difference {
        return DifferenceOutcome::TooLong { pts, events };
    }

    let started = Instant::now();
    let replay = run_transaction(storage, move |txn| replay_difference(txn, from, difference)).await;
    let elapsed = started.elapsed();
    if elapsed > config.slow_replay_threshold {
        stats.update(|s| s.slow_replays += 1);
        warn!(elapsed_ms = elapsed.as_millis() as u64, "slow difference replay");
    }

    match replay {
        Ok(DifferenceReplay::Applied {
            state,
            events: applied,
            more,
        }) => {
            debug!(pts = state.pts, more, "difference applied");
            if more {
                stats.update(|s| s.slices_applied += 1);
            }
            DifferenceOutcome::Applied {
                events: events.merged(applied),
                more,
            }
        }
        Ok(DifferenceReplay::Mismatch { found }) => {
            debug!(?found, expected = ?from, "state moved during difference poll");
            DifferenceOutcome::Mismatch { events }
        }
        Err(SyncError::DifferenceTooLong { pts }) => DifferenceOutcome::TooLong { pts, events },
        Err(error) => DifferenceOutcome::ReplayFailed { error },
    }
}

async fn initialize_state<S, N>(
    storage: Arc<S>,
    network: Arc<N>,
    events: AccountFinalStateEvents,
) -> DifferenceOutcome
where
    S: AccountStorage,
    N: AccountNetwork,
{
    let state = match network.current_state().await {
        Ok(state) => state,
        Err(error) => return DifferenceOutcome::Failed { events, error },
    };

    let stored = run_transaction(storage, move |txn| {
        if txn.state().is_some() {
            return Ok(false);
        }
        txn.set_state(state)?;
        Ok(true)
    })
    .await;

    match stored {
        Ok(true) => {
            info!(pts = state.pts, qts = state.qts, seq = state.seq, "initialized sequencing state");
            DifferenceOutcome::StateInitialized { state }
        }
        Ok(false) => DifferenceOutcome::Mismatch { events },
        Err(error) => DifferenceOutcome::Failed { events, error },
    }
}
