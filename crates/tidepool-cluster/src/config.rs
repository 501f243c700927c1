//! Join attempt configuration.

use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::ClusterError;

/// Default upper bound on waiting for the first candidates.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "dev";

/// Configuration for a [`JoinCoordinator`](crate::JoinCoordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinConfig {
    /// Total wall-clock budget of one join attempt.
    pub max_wait: Duration,
    /// Use the public rather than the private address of discovered peers.
    pub use_public_address: bool,
    /// Bound on opening a connection to one candidate.
    pub connect_timeout: Duration,
    /// Bound on waiting for one candidate's answer.
    pub response_timeout: Duration,
    /// Idle curve between empty discovery polls.
    pub backoff: BackoffConfig,
    /// Members only admit joiners presenting the same name.
    pub cluster_name: String,
}

impl JoinConfig {
    /// Create a config suitable for fast test execution.
    pub fn test_config() -> Self {
        Self {
            max_wait: Duration::from_secs(1),
            use_public_address: false,
            connect_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_millis(200),
            backoff: BackoffConfig::test_config(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
        }
    }

    /// Create a default config for production use.
    pub fn default_config() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            use_public_address: false,
            connect_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_secs(2),
            backoff: BackoffConfig::default_config(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
        }
    }

    /// Reject values that would make a join attempt meaningless.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.max_wait.is_zero() {
            return Err(ClusterError::InvalidConfig("max_wait must be positive".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ClusterError::InvalidConfig(
                "connect_timeout must be positive".into(),
            ));
        }
        if self.response_timeout.is_zero() {
            return Err(ClusterError::InvalidConfig(
                "response_timeout must be positive".into(),
            ));
        }
        if self.response_timeout >= self.max_wait {
            return Err(ClusterError::InvalidConfig(format!(
                "response_timeout ({:?}) must be shorter than max_wait ({:?})",
                self.response_timeout, self.max_wait
            )));
        }
        if self.cluster_name.is_empty() {
            return Err(ClusterError::InvalidConfig(
                "cluster_name must not be empty".into(),
            ));
        }
        self.backoff.validate()
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
