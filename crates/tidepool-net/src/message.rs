//! Join protocol messages.
//!
//! Every message shares the initial-frame header from [`crate::codec`]
//! (type, correlation id, partition id `-1`). Responses echo the correlation
//! id of the request they answer.

use bytes::Bytes;
use tidepool_types::{Address, MemberView, NodeId};

use crate::codec::*;
use crate::error::NetError;
use crate::frame::FrameMessage;

/// Version of the join protocol spoken by this build.
pub const PROTOCOL_VERSION: u8 = 1;

//hex: 0x000100
pub const JOIN_REQUEST_MESSAGE_TYPE: i32 = 0x000100;
//hex: 0x000101
pub const JOIN_ACCEPT_MESSAGE_TYPE: i32 = 0x000101;
//hex: 0x000102
pub const JOIN_REDIRECT_MESSAGE_TYPE: i32 = 0x000102;
//hex: 0x000103
pub const JOIN_REJECT_MESSAGE_TYPE: i32 = 0x000103;
//hex: 0x000104
pub const JOIN_PENDING_MESSAGE_TYPE: i32 = 0x000104;

const REQUEST_PROTOCOL_VERSION_FIELD_OFFSET: usize = INITIAL_FRAME_HEADER_SIZE;
const REQUEST_NODE_ID_FIELD_OFFSET: usize = REQUEST_PROTOCOL_VERSION_FIELD_OFFSET + BYTE_SIZE_IN_BYTES;
const REQUEST_GENERATION_FIELD_OFFSET: usize = REQUEST_NODE_ID_FIELD_OFFSET + NODE_ID_SIZE_IN_BYTES;
const REQUEST_INITIAL_FRAME_SIZE: usize = REQUEST_GENERATION_FIELD_OFFSET + LONG_SIZE_IN_BYTES;
const RESPONSE_INITIAL_FRAME_SIZE: usize = INITIAL_FRAME_HEADER_SIZE;

/// A node's request to be admitted into a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Identifier of the joining node.
    pub node_id: NodeId,
    /// Address the joining node will be reachable at.
    pub address: Address,
    /// Restart counter of the joining node.
    pub generation: u64,
    /// Join protocol version of the joining node.
    pub protocol_version: u8,
    /// Name of the cluster the node wants to join.
    pub cluster_name: String,
    /// Opaque credentials, attached verbatim.
    pub identity: Option<Bytes>,
}

/// Messages exchanged during a join handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinMessage {
    /// Joiner → candidate.
    Request(JoinRequest),
    /// The master admitted the joiner; carries the new membership view.
    Accept(MemberView),
    /// The candidate is not the master; try the named address instead.
    Redirect {
        /// Address of the current master.
        master: Address,
    },
    /// Explicit denial (e.g. incompatible protocol version).
    Reject {
        /// Human-readable reason.
        reason: String,
    },
    /// The candidate is still looking for a cluster itself. Not a denial:
    /// the joiner may ask again later.
    Pending {
        /// Address the bootstrapping candidate advertises.
        address: Address,
    },
}

impl JoinMessage {
    /// Wire message type code.
    pub fn message_type(&self) -> i32 {
        match self {
            JoinMessage::Request(_) => JOIN_REQUEST_MESSAGE_TYPE,
            JoinMessage::Accept(_) => JOIN_ACCEPT_MESSAGE_TYPE,
            JoinMessage::Redirect { .. } => JOIN_REDIRECT_MESSAGE_TYPE,
            JoinMessage::Reject { .. } => JOIN_REJECT_MESSAGE_TYPE,
            JoinMessage::Pending { .. } => JOIN_PENDING_MESSAGE_TYPE,
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            JoinMessage::Request(_) => "JoinRequest",
            JoinMessage::Accept(_) => "JoinAccept",
            JoinMessage::Redirect { .. } => "JoinRedirect",
            JoinMessage::Reject { .. } => "JoinReject",
            JoinMessage::Pending { .. } => "JoinPending",
        }
    }

    /// Encode into frames under the given correlation id.
    pub fn encode(&self, correlation_id: i64) -> FrameMessage {
        let mut msg = FrameMessage::new();
        match self {
            JoinMessage::Request(request) => {
                let mut initial =
                    initial_frame(self.message_type(), correlation_id, REQUEST_INITIAL_FRAME_SIZE);
                encode_u8(
                    &mut initial,
                    REQUEST_PROTOCOL_VERSION_FIELD_OFFSET,
                    request.protocol_version,
                );
                encode_node_id(&mut initial, REQUEST_NODE_ID_FIELD_OFFSET, &request.node_id);
                encode_i64(
                    &mut initial,
                    REQUEST_GENERATION_FIELD_OFFSET,
                    request.generation as i64,
                );
                msg.push(finish_initial_frame(initial));
                encode_address(&mut msg, &request.address);
                encode_string(&mut msg, &request.cluster_name);
                encode_nullable(&mut msg, request.identity.as_ref(), encode_bytes);
            }
            JoinMessage::Accept(view) => {
                let initial =
                    initial_frame(self.message_type(), correlation_id, RESPONSE_INITIAL_FRAME_SIZE);
                msg.push(finish_initial_frame(initial));
                encode_member_view(&mut msg, view);
            }
            JoinMessage::Redirect { master: address } | JoinMessage::Pending { address } => {
                let initial =
                    initial_frame(self.message_type(), correlation_id, RESPONSE_INITIAL_FRAME_SIZE);
                msg.push(finish_initial_frame(initial));
                encode_address(&mut msg, address);
            }
            JoinMessage::Reject { reason } => {
                let initial =
                    initial_frame(self.message_type(), correlation_id, RESPONSE_INITIAL_FRAME_SIZE);
                msg.push(finish_initial_frame(initial));
                encode_string(&mut msg, reason);
            }
        }
        msg
    }

    /// Decode a message, returning its correlation id alongside it.
    pub fn decode(msg: &FrameMessage) -> Result<(i64, JoinMessage), NetError> {
        let mut iter = msg.iter();
        let initial = iter.next_frame()?;
        let content = &initial.content;
        let message_type = decode_i32(content, TYPE_FIELD_OFFSET)?;
        let correlation_id = decode_i64(content, CORRELATION_ID_FIELD_OFFSET)?;

        let message = match message_type {
            JOIN_REQUEST_MESSAGE_TYPE => {
                let protocol_version = decode_u8(content, REQUEST_PROTOCOL_VERSION_FIELD_OFFSET)?;
                let node_id = decode_node_id(content, REQUEST_NODE_ID_FIELD_OFFSET)?;
                let generation = decode_i64(content, REQUEST_GENERATION_FIELD_OFFSET)? as u64;
                let address = decode_address(&mut iter)?;
                let cluster_name = decode_string(&mut iter)?;
                let identity = decode_nullable(&mut iter, decode_bytes)?;
                JoinMessage::Request(JoinRequest {
                    node_id,
                    address,
                    generation,
                    protocol_version,
                    cluster_name,
                    identity,
                })
            }
            JOIN_ACCEPT_MESSAGE_TYPE => JoinMessage::Accept(decode_member_view(&mut iter)?),
            JOIN_REDIRECT_MESSAGE_TYPE => JoinMessage::Redirect {
                master: decode_address(&mut iter)?,
            },
            JOIN_REJECT_MESSAGE_TYPE => JoinMessage::Reject {
                reason: decode_string(&mut iter)?,
            },
            JOIN_PENDING_MESSAGE_TYPE => JoinMessage::Pending {
                address: decode_address(&mut iter)?,
            },
            other => {
                return Err(NetError::UnexpectedMessage(format!(
                    "unknown message type {other:#08x}"
                )));
            }
        };

        Ok((correlation_id, message))
    }
}
