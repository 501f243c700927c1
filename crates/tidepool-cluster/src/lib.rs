//! Peer discovery and cluster join.
//!
//! This crate decides, at startup, whether a node joins an existing cluster
//! or founds a new one:
//!
//! - [`DiscoveryPort`]: pluggable peer sources ([`StaticDiscovery`],
//!   [`DnsDiscovery`]).
//! - [`resolve`] / [`CandidateSet`]: public/private address selection,
//!   self-exclusion, deduplication.
//! - [`IdleBackoff`]: wait curve between empty discovery polls.
//! - [`JoinCoordinator`]: the deadline-bounded control loop.
//! - [`JoinHandshake`]: per-candidate request / redirect / reject handling.
//! - [`JoinResponder`] / [`ClusterState`]: the master side of the handshake.

mod abort;
mod backoff;
mod config;
mod coordinator;
mod deadline;
mod discovery;
mod error;
mod handshake;
mod identity;
mod resolver;
mod responder;
mod source;
mod state;


pub use abort::{AbortHandle, AbortSignal, abort_signal};
pub use backoff::{BackoffConfig, BackoffState, IdleBackoff};
pub use config::{DEFAULT_CLUSTER_NAME, DEFAULT_MAX_WAIT, JoinConfig};
pub use coordinator::{AbortReason, JoinCoordinator, JoinOutcome};
pub use deadline::JoinDeadline;
pub use discovery::{DEFAULT_DNS_LOOKUP_TIMEOUT, DiscoveryPort, DnsDiscovery, StaticDiscovery};
pub use error::{ClusterError, DiscoveryError};
pub use handshake::{HandshakeOutcome, JoinHandshake};
pub use identity::IdentityConfig;
pub use resolver::{CandidateSet, resolve};
pub use responder::JoinResponder;
pub use source::{AddressSource, DiscoveryAddressSource, StaticAddressSource};
pub use state::ClusterState;
