//! The master side of the join handshake.

use std::sync::Arc;

use tidepool_net::{JoinMessage, JoinRequest, PROTOCOL_VERSION};
use tidepool_types::Member;
use tracing::{debug, info};

use crate::state::ClusterState;

/// Answers join requests from the node's [`ClusterState`].
#[derive(Debug, Clone)]
pub struct JoinResponder {
    state: Arc<ClusterState>,
    cluster_name: String,
}

impl JoinResponder {
    pub fn new(state: Arc<ClusterState>, cluster_name: impl Into<String>) -> Self {
        Self {
            state,
            cluster_name: cluster_name.into(),
        }
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// Answer one incoming message. Only join requests get a reply.
    pub async fn handle(&self, message: JoinMessage) -> Option<JoinMessage> {
        match message {
            JoinMessage::Request(request) => Some(self.handle_join_request(request).await),
            other => {
                debug!(kind = other.kind(), "ignoring message that is not a join request");
                None
            }
        }
    }

    /// Admit, redirect, or reject a joining node.
    ///
    /// Any node rejects a foreign protocol version or cluster name. A node
    /// without a view then answers `Pending` so the joiner can retry it
    /// later, and a non-master points the joiner at its master. The master
    /// rejects identity clashes, then admits the joiner and replies with the
    /// updated view.
    pub async fn handle_join_request(&self, request: JoinRequest) -> JoinMessage {
        let local = self.state.local_member();

        if request.protocol_version != PROTOCOL_VERSION {
            return reject(
                &request,
                &format!(
                    "protocol version {} is not supported (expected {PROTOCOL_VERSION})",
                    request.protocol_version
                ),
            );
        }
        if request.cluster_name != self.cluster_name {
            return reject(
                &request,
                &format!(
                    "cluster name {:?} does not match {:?}",
                    request.cluster_name, self.cluster_name
                ),
            );
        }
        let Some(master) = self.state.master().await else {
            debug!(joiner = %request.address, "still bootstrapping; asking joiner to retry");
            return JoinMessage::Pending {
                address: local.address.clone(),
            };
        };
        if master != local.address {
            debug!(joiner = %request.address, %master, "redirecting joiner to master");
            return JoinMessage::Redirect { master };
        }
        if request.node_id == local.node_id {
            return reject(&request, "node id is already used by the master");
        }
        if request.address == local.address {
            return reject(&request, "address is already used by the master");
        }

        let member = Member {
            node_id: request.node_id,
            address: request.address,
            generation: request.generation,
        };
        match self.state.admit(member).await {
            Some(view) => JoinMessage::Accept(view),
            None => JoinMessage::Reject {
                reason: "membership view unavailable".into(),
            },
        }
    }
}

fn reject(request: &JoinRequest, reason: &str) -> JoinMessage {
    info!(joiner = %request.address, node_id = %request.node_id, reason, "rejecting join request");
    JoinMessage::Reject {
        reason: reason.to_string(),
    }
}
