//! Credentials attached to a join request.
//!
//! The join path never looks inside the payload; it is produced here from
//! configuration and carried verbatim as the nullable identity field of
//! [`JoinRequest`](tidepool_net::JoinRequest).

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// One of the supported identity kinds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityConfig {
    /// Name and password.
    UsernamePassword { username: String, password: String },
    /// A bearer token.
    Token { token: String },
    /// Pre-built credentials from an external provider.
    Credentials { principal: String, data: Vec<u8> },
}

impl IdentityConfig {
    /// Serialize into the opaque payload sent on the wire.
    pub fn to_payload(&self) -> Result<Bytes, ClusterError> {
        postcard::to_allocvec(self)
            .map(Bytes::from)
            .map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    /// Parse a payload produced by [`to_payload`](Self::to_payload).
    pub fn from_payload(payload: &[u8]) -> Result<Self, ClusterError> {
        postcard::from_bytes(payload).map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    /// Short name of the identity kind.
    pub fn kind(&self) -> &'static str {
        match self {
            IdentityConfig::UsernamePassword { .. } => "username-password",
            IdentityConfig::Token { .. } => "token",
            IdentityConfig::Credentials { .. } => "credentials",
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityConfig::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            IdentityConfig::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .finish(),
            IdentityConfig::Credentials { principal, data } => f
                .debug_struct("Credentials")
                .field("principal", principal)
                .field("data", &format_args!("<{} bytes>", data.len()))
                .finish(),
        }
    }
}
