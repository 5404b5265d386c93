//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for the account state engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an incomplete update batch waits for the missing updates
    /// before the engine falls back to fetching the difference.
    pub incomplete_retry_delay: Duration,
    /// Replays slower than this are logged.
    pub slow_replay_threshold: Duration,
    /// Cap on pts events per difference request.
    pub difference_pts_limit: Option<i32>,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            incomplete_retry_delay: Duration::from_secs(2),
            slow_replay_threshold: Duration::from_secs(1),
            difference_pts_limit: None,
        }
    }

    /// Sets the incomplete-batch retry delay.
    pub fn with_incomplete_retry_delay(mut self, delay: Duration) -> Self {
        self.incomplete_retry_delay = delay;
        self
    }

    /// Sets the slow replay threshold.
    pub fn with_slow_replay_threshold(mut self, threshold: Duration) -> Self {
        self.slow_replay_threshold = threshold;
        self
    }

    /// Sets the difference pts limit.
    pub fn with_difference_pts_limit(mut self, limit: i32) -> Self {
        self.difference_pts_limit = Some(limit);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
