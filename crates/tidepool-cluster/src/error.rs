//! Error types for the cluster crate.

/// Errors that end a join attempt or reject a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The discovery source broke its contract. Never retried.
    #[error("discovery contract violation: {0}")]
    ContractViolation(#[from] DiscoveryError),

    /// A configuration value was rejected before any I/O happened.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors reported by a [`DiscoveryPort`](crate::DiscoveryPort).
///
/// An empty peer list is not an error; these variants mean the source could
/// not produce a result at all.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The source has no result to give.
    #[error("discovery source produced no result: {0}")]
    NoResult(String),

    /// The source was configured with unusable parameters.
    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(String),
}
