//! Idle backoff between empty discovery polls.
//!
//! The curve has three phases: a number of busy polls, a number of yields,
//! and then parking with a time that starts at `min_park` and doubles on
//! every attempt up to `max_park`. Busy polls and yields both map to a zero
//! wait here; on an async runtime a zero sleep is already a yield.

use std::time::Duration;

use crate::error::ClusterError;

/// Shape of the idle backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Attempts that poll again without waiting.
    pub max_spins: u32,
    /// Further attempts that only yield.
    pub max_yields: u32,
    /// First park duration.
    pub min_park: Duration,
    /// Park duration ceiling.
    pub max_park: Duration,
}

impl BackoffConfig {
    /// Create a config suitable for fast test execution.
    pub fn test_config() -> Self {
        Self {
            max_spins: 0,
            max_yields: 0,
            min_park: Duration::from_millis(1),
            max_park: Duration::from_millis(20),
        }
    }

    /// Create a default config for production use.
    pub fn default_config() -> Self {
        Self {
            max_spins: 0,
            max_yields: 0,
            min_park: Duration::from_millis(10),
            max_park: Duration::from_millis(500),
        }
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.min_park > self.max_park {
            return Err(ClusterError::InvalidConfig(format!(
                "backoff min_park ({:?}) exceeds max_park ({:?})",
                self.min_park, self.max_park
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Maps an attempt count to a wait duration.
///
/// Deterministic and monotonically non-decreasing in the attempt count.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleBackoff {
    config: BackoffConfig,
}

impl IdleBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// How long to idle before attempt `attempts + 1`.
    pub fn wait_duration(&self, attempts: u32) -> Duration {
        let BackoffConfig {
            max_spins,
            max_yields,
            min_park,
            max_park,
        } = self.config;

        let park_start = max_spins.saturating_add(max_yields);
        if attempts < park_start {
            return Duration::ZERO;
        }

        let doublings = attempts - park_start;
        if doublings >= u32::BITS - 1 {
            return max_park;
        }
        min_park
            .checked_mul(1 << doublings)
            .map_or(max_park, |park| park.min(max_park))
    }
}

/// Consecutive empty discovery results within one join attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    empty_attempts: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more empty result, returning the count before it.
    pub fn record_empty(&mut self) -> u32 {
        let attempt = self.empty_attempts;
        self.empty_attempts = self.empty_attempts.saturating_add(1);
        attempt
    }

    /// A non-empty result resets the counter.
    pub fn reset(&mut self) {
        self.empty_attempts = 0;
    }

    pub fn empty_attempts(&self) -> u32 {
        self.empty_attempts
    }
}
