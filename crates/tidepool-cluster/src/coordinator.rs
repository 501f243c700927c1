//! The join control loop.
//!
//! [`JoinCoordinator::find_cluster_or_found`] polls its address source until
//! candidates show up, hands them to the [`JoinHandshake`], and gives up
//! once the [`JoinDeadline`] expires, in which case the node founds its own
//! cluster. Empty polls are paced by the idle backoff curve.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tidepool_types::{Address, MemberView};
use tracing::{debug, error, info, warn};

use crate::abort::AbortSignal;
use crate::backoff::{BackoffState, IdleBackoff};
use crate::config::JoinConfig;
use crate::deadline::JoinDeadline;
use crate::discovery::DiscoveryPort;
use crate::error::ClusterError;
use crate::handshake::{HandshakeOutcome, JoinHandshake};
use crate::source::{AddressSource, DiscoveryAddressSource};

/// Why a join attempt stopped without a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The abort signal fired.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of one join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A master admitted this node.
    Joined(MemberView),
    /// Nobody admitted this node before the deadline.
    BecomeFounder,
    /// The attempt was stopped from outside.
    Aborted(AbortReason),
}

/// Drives one join attempt per call.
pub struct JoinCoordinator {
    config: JoinConfig,
    source: Arc<dyn AddressSource>,
    handshake: JoinHandshake,
    backoff: IdleBackoff,
}

impl JoinCoordinator {
    /// Create a coordinator. Fails if `config` does not validate.
    pub fn new(
        config: JoinConfig,
        source: Arc<dyn AddressSource>,
        handshake: JoinHandshake,
    ) -> Result<Self, ClusterError> {
        config.validate()?;
        let backoff = IdleBackoff::new(config.backoff);
        Ok(Self {
            config,
            source,
            handshake,
            backoff,
        })
    }

    /// Create a coordinator whose candidates come from a discovery source,
    /// resolved with `config.use_public_address` against `local_address`.
    pub fn with_discovery(
        config: JoinConfig,
        discovery: Arc<dyn DiscoveryPort>,
        local_address: Address,
        handshake: JoinHandshake,
    ) -> Result<Self, ClusterError> {
        let source =
            DiscoveryAddressSource::new(discovery, local_address, config.use_public_address);
        Self::new(config, Arc::new(source), handshake)
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Find a cluster to join, or decide to found one.
    ///
    /// Each call is a fresh attempt with its own deadline, backoff counter,
    /// and exclusion list. A discovery contract violation is returned as
    /// [`ClusterError::ContractViolation`]; every other failure is retried
    /// within the deadline. When every candidate of a round is itself still
    /// bootstrapping and this node has the lowest address among them, it
    /// founds without waiting for the deadline.
    pub async fn find_cluster_or_found(
        &self,
        abort: &AbortSignal,
    ) -> Result<JoinOutcome, ClusterError> {
        let deadline = JoinDeadline::start(self.config.max_wait);
        let mut backoff = BackoffState::new();
        let mut excluded: HashSet<Address> = HashSet::new();
        let mut failed_rounds: u32 = 0;
        let mut polls: u64 = 0;
        let mut saw_candidates = false;

        info!(max_wait = ?self.config.max_wait, "looking for a cluster to join");

        loop {
            let polled = tokio::select! {
                _ = abort.aborted() => return Ok(self.aborted(polls)),
                polled = self.source.possible_addresses() => polled,
            };
            polls += 1;

            let mut candidates = match polled {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!(%e, polls, "address source failed");
                    return Err(e);
                }
            };
            candidates.retain(|addr| !excluded.contains(addr));

            if candidates.is_empty() {
                let attempt = backoff.record_empty();
                let wait = deadline.clamp(self.backoff.wait_duration(attempt));
                debug!(attempt, ?wait, "no candidates yet");
                if idle(wait, abort).await {
                    return Ok(self.aborted(polls));
                }
                if deadline.expired() {
                    break;
                }
                continue;
            }

            backoff.reset();
            saw_candidates = true;
            debug!(candidates = candidates.len(), polls, "trying candidates");

            match self
                .handshake
                .run(&mut candidates, &mut excluded, &deadline, abort)
                .await
            {
                HandshakeOutcome::Joined(view) => {
                    info!(
                        master = %view.master,
                        members = view.len(),
                        elapsed = ?deadline.elapsed(),
                        "joined cluster"
                    );
                    return Ok(JoinOutcome::Joined(view));
                }
                HandshakeOutcome::Cancelled => return Ok(self.aborted(polls)),
                HandshakeOutcome::Exhausted { bootstrapping } => {
                    if self.lowest_among(&bootstrapping) {
                        info!(
                            peers = bootstrapping.len(),
                            elapsed = ?deadline.elapsed(),
                            "lowest address among bootstrapping peers; founding a new cluster"
                        );
                        return Ok(JoinOutcome::BecomeFounder);
                    }
                    if deadline.expired() {
                        break;
                    }
                    let wait = deadline.clamp(self.backoff.wait_duration(failed_rounds));
                    failed_rounds = failed_rounds.saturating_add(1);
                    debug!(failed_rounds, ?wait, "no candidate admitted us; polling again");
                    if idle(wait, abort).await {
                        return Ok(self.aborted(polls));
                    }
                    if deadline.expired() {
                        break;
                    }
                }
            }
        }

        if saw_candidates {
            warn!(
                polls,
                excluded = excluded.len(),
                "no candidate admitted this node before the deadline; founding a new cluster"
            );
        } else {
            info!(polls, "no cluster found before the deadline; founding a new cluster");
        }
        Ok(JoinOutcome::BecomeFounder)
    }

    /// Whether this node breaks the tie among peers that are bootstrapping
    /// at the same time: the lowest advertised address founds, the others
    /// keep polling and join it.
    fn lowest_among(&self, bootstrapping: &[Address]) -> bool {
        let local = self.handshake.local_address();
        !bootstrapping.is_empty() && bootstrapping.iter().all(|peer| local < peer)
    }

    fn aborted(&self, polls: u64) -> JoinOutcome {
        info!(polls, "join attempt aborted");
        JoinOutcome::Aborted(AbortReason::Cancelled)
    }
}

/// Sleep for `wait` unless aborted first. Returns `true` on abort.
async fn idle(wait: Duration, abort: &AbortSignal) -> bool {
    tokio::select! {
        _ = abort.aborted() => true,
        _ = tokio::time::sleep(wait) => false,
    }
}
