//! Per-candidate join handshake.
//!
//! Candidates are tried one at a time, in order:
//!
//! ```text
//! NextCandidate ──► Connecting ──► AwaitingResponse ──► Joined
//!      ▲   │            │                │
//!      │   ▼            ▼                ▼
//!      │ Exhausted   (failure)    (redirect / reject / pending / failure)
//!      └────────────────┴────────────────┘
//! ```
//!
//! Any state may end in `Cancelled` when the abort signal fires. Connection
//! and response timeouts are shortened to what is left of the deadline, and
//! the deadline is checked before moving to the next candidate. A redirect
//! target is tried right after the candidate that named it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tidepool_net::{Channel, JoinMessage, JoinRequest, PROTOCOL_VERSION, Transport};
use tidepool_types::{Address, Member, MemberView};
use tracing::{debug, info};

use crate::abort::AbortSignal;
use crate::config::JoinConfig;
use crate::deadline::JoinDeadline;
use crate::resolver::CandidateSet;

/// How a handshake round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// A master admitted us.
    Joined(MemberView),
    /// No candidate admitted us (or the deadline ran out between candidates).
    Exhausted {
        /// Advertised addresses of candidates that answered `Pending`.
        bootstrapping: Vec<Address>,
    },
    /// The abort signal fired.
    Cancelled,
}

/// Progress through one candidate set.
#[derive(Default)]
struct Round {
    /// Index of the next candidate to try.
    cursor: usize,
    bootstrapping: Vec<Address>,
}

enum HandshakeState {
    Connecting(Address),
    AwaitingResponse(Address, Box<dyn Channel>),
    NextCandidate,
    Joined(MemberView),
    Exhausted,
    Cancelled,
}

/// Runs the join handshake against a candidate set.
pub struct JoinHandshake {
    local_address: Address,
    transport: Arc<dyn Transport>,
    request: JoinMessage,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl JoinHandshake {
    /// Build the handshake for `local`, attaching `identity` verbatim.
    pub fn new(
        config: &JoinConfig,
        transport: Arc<dyn Transport>,
        local: &Member,
        identity: Option<Bytes>,
    ) -> Self {
        let request = JoinMessage::Request(JoinRequest {
            node_id: local.node_id,
            address: local.address.clone(),
            generation: local.generation,
            protocol_version: PROTOCOL_VERSION,
            cluster_name: config.cluster_name.clone(),
            identity,
        });
        Self {
            local_address: local.address.clone(),
            transport,
            request,
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
        }
    }

    /// The address this node advertises in its join request.
    pub fn local_address(&self) -> &Address {
        &self.local_address
    }

    /// Try the candidates in order until one admits us.
    ///
    /// Redirect targets are moved up in `candidates` to be tried next.
    /// Rejecting addresses are added to `excluded` and skipped from then on.
    /// Candidates answering `Pending` are skipped for this round and
    /// reported back in [`HandshakeOutcome::Exhausted`].
    pub async fn run(
        &self,
        candidates: &mut CandidateSet,
        excluded: &mut HashSet<Address>,
        deadline: &JoinDeadline,
        abort: &AbortSignal,
    ) -> HandshakeOutcome {
        let mut round = Round::default();
        let mut state = HandshakeState::NextCandidate;

        loop {
            state = match state {
                HandshakeState::NextCandidate => {
                    if abort.is_aborted() {
                        HandshakeState::Cancelled
                    } else if deadline.expired() {
                        debug!("deadline expired between candidates");
                        HandshakeState::Exhausted
                    } else {
                        match next_candidate(candidates, excluded, &mut round.cursor) {
                            Some(addr) => HandshakeState::Connecting(addr),
                            None => HandshakeState::Exhausted,
                        }
                    }
                }
                HandshakeState::Connecting(addr) => self.connect(addr, deadline, abort).await,
                HandshakeState::AwaitingResponse(addr, channel) => {
                    let reply = self.await_response(channel, deadline, abort).await;
                    self.apply_reply(addr, reply, candidates, excluded, &mut round)
                }
                HandshakeState::Joined(view) => return HandshakeOutcome::Joined(view),
                HandshakeState::Exhausted => {
                    return HandshakeOutcome::Exhausted {
                        bootstrapping: round.bootstrapping,
                    };
                }
                HandshakeState::Cancelled => return HandshakeOutcome::Cancelled,
            };
        }
    }

    async fn connect(
        &self,
        addr: Address,
        deadline: &JoinDeadline,
        abort: &AbortSignal,
    ) -> HandshakeState {
        let timeout = deadline.clamp(self.connect_timeout);
        debug!(%addr, ?timeout, "connecting to candidate");

        let result = tokio::select! {
            _ = abort.aborted() => return HandshakeState::Cancelled,
            result = tokio::time::timeout(timeout, self.transport.connect(&addr)) => result,
        };

        match result {
            Ok(Ok(channel)) => HandshakeState::AwaitingResponse(addr, channel),
            Ok(Err(e)) => {
                debug!(%addr, %e, "candidate unreachable");
                HandshakeState::NextCandidate
            }
            Err(_) => {
                debug!(%addr, ?timeout, "connect timed out");
                HandshakeState::NextCandidate
            }
        }
    }

    /// Send the join request and wait for the answer. `None` means the
    /// attempt was cancelled.
    async fn await_response(
        &self,
        mut channel: Box<dyn Channel>,
        deadline: &JoinDeadline,
        abort: &AbortSignal,
    ) -> Option<Result<JoinMessage, String>> {
        let timeout = deadline.clamp(self.response_timeout);

        let result = tokio::select! {
            _ = abort.aborted() => return None,
            result = tokio::time::timeout(timeout, channel.request(&self.request)) => result,
        };

        Some(match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no answer within {timeout:?}")),
        })
    }

    fn apply_reply(
        &self,
        addr: Address,
        reply: Option<Result<JoinMessage, String>>,
        candidates: &mut CandidateSet,
        excluded: &mut HashSet<Address>,
        round: &mut Round,
    ) -> HandshakeState {
        let reply = match reply {
            None => return HandshakeState::Cancelled,
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                debug!(%addr, %e, "join request failed");
                return HandshakeState::NextCandidate;
            }
        };

        match reply {
            JoinMessage::Accept(view) => {
                info!(
                    %addr,
                    master = %view.master,
                    members = view.len(),
                    "join accepted"
                );
                HandshakeState::Joined(view)
            }
            JoinMessage::Redirect { master } => {
                if excluded.contains(&master) {
                    debug!(%addr, %master, "redirected to an excluded address");
                } else if candidates.promote(round.cursor, master.clone()) {
                    debug!(%addr, %master, "redirected to master; trying it next");
                } else {
                    debug!(%addr, %master, "redirect target already tried or local");
                }
                HandshakeState::NextCandidate
            }
            JoinMessage::Reject { reason } => {
                info!(%addr, %reason, "join rejected; excluding candidate");
                excluded.insert(addr);
                HandshakeState::NextCandidate
            }
            JoinMessage::Pending { address } => {
                debug!(%addr, advertised = %address, "candidate is still bootstrapping");
                if !round.bootstrapping.contains(&address) {
                    round.bootstrapping.push(address);
                }
                HandshakeState::NextCandidate
            }
            other => {
                debug!(%addr, kind = other.kind(), "unexpected reply to join request");
                HandshakeState::NextCandidate
            }
        }
    }
}

fn next_candidate(
    candidates: &CandidateSet,
    excluded: &HashSet<Address>,
    cursor: &mut usize,
) -> Option<Address> {
    while let Some(addr) = candidates.get(*cursor) {
        *cursor += 1;
        if !excluded.contains(addr) {
            return Some(addr.clone());
        }
    }
    None
}
