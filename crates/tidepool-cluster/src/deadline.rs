//! Wall-clock bound on a join attempt.

use std::time::Duration;

use tokio::time::Instant;

/// Fixed deadline measured from the start of a join attempt.
///
/// Uses tokio's clock, so a paused test runtime controls it. Never reset;
/// a new attempt starts a new deadline.
#[derive(Debug, Clone, Copy)]
pub struct JoinDeadline {
    started: Instant,
    max_wait: Duration,
    /// `None` when `started + max_wait` is not representable.
    expires_at: Option<Instant>,
}

impl JoinDeadline {
    /// Start the clock now.
    pub fn start(max_wait: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            max_wait,
            expires_at: started.checked_add(max_wait),
        }
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        match self.expires_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Shorten `timeout` so it ends no later than the deadline.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }
}
