//! Shared types and identifiers for Tidepool.
//!
//! This crate defines the value types exchanged between the discovery,
//! join and wire layers:
//! network addresses ([`Address`], [`DiscoveredPeer`]),
//! identifiers ([`NodeId`]),
//! and membership ([`Member`], [`MemberView`]).
//!
//! Everything here is immutable once built and compares by value.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Short hex prefix for log lines.
            pub fn short(&self) -> String {
                self.to_string()[..8].to_string()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }
    };
}

define_id!(
    /// Identifier for a cluster member, derived from per-process seed data.
    NodeId
);

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// A network endpoint: host plus port.
///
/// Two addresses are the same endpoint iff host and port are equal. No name
/// resolution happens here, so `localhost:5701` and `127.0.0.1:5701` are
/// different endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Create an address. IPv6 literals are stored without brackets.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        Self { host, port }
    }

    /// Host part (name or IP literal).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the socket address if the host is an IP literal.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Error returned when parsing an [`Address`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// The text has no `:port` suffix.
    #[error("missing port in address {0:?}")]
    MissingPort(String),

    /// The port is not a valid `u16`.
    #[error("invalid port in address {0:?}")]
    InvalidPort(String),

    /// The host part is empty.
    #[error("empty host in address {0:?}")]
    EmptyHost(String),
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parse `host:port` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;

        // A bare IPv6 literal without brackets has no unambiguous port.
        if host.contains(':') && !host.starts_with('[') {
            return Err(AddressParseError::MissingPort(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
        let address = Address::new(host, port);
        if address.host.is_empty() {
            return Err(AddressParseError::EmptyHost(s.to_string()));
        }
        Ok(address)
    }
}

/// A peer record produced by a discovery source.
///
/// Sources are unreliable and may hand back partial records, so both
/// addresses are optional. A record is never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    /// Address reachable from outside the peer's network.
    pub public_address: Option<Address>,
    /// Address reachable inside the peer's network.
    pub private_address: Option<Address>,
}

impl DiscoveredPeer {
    /// A record with both addresses present.
    pub fn new(public_address: Address, private_address: Address) -> Self {
        Self {
            public_address: Some(public_address),
            private_address: Some(private_address),
        }
    }

    /// A record whose public and private address are the same endpoint.
    pub fn single(address: Address) -> Self {
        Self::new(address.clone(), address)
    }

    /// The address selected by the public/private policy, if present.
    pub fn select(&self, use_public: bool) -> Option<&Address> {
        if use_public {
            self.public_address.as_ref()
        } else {
            self.private_address.as_ref()
        }
    }
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// A member of a Tidepool cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Unique identifier for this member.
    pub node_id: NodeId,
    /// Address other members use to reach it.
    pub address: Address,
    /// Incarnation number, incremented on each restart.
    pub generation: u64,
}

/// The membership view a master hands to a newly admitted member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    /// Monotonic view version, bumped on every admission.
    pub version: u32,
    /// Address of the member authoritative for admissions.
    pub master: Address,
    /// All members, master included, in admission order.
    pub members: Vec<Member>,
}

impl MemberView {
    /// The initial view of a founding member: itself, as master, alone.
    pub fn founding(member: Member) -> Self {
        Self {
            version: 1,
            master: member.address.clone(),
            members: vec![member],
        }
    }

    /// Whether a member with the given address is part of the view.
    pub fn contains(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.address == address)
    }

    /// Number of members in the view.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the view has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
