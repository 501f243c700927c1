//! Discovery sources.
//!
//! A [`DiscoveryPort`] reports the peers it currently knows about. Results
//! may be empty and may change between calls; an empty list is a normal
//! steady state while peers are still starting. Returning an error means the
//! source broke its contract, and the join attempt fails.

use std::time::Duration;

use async_trait::async_trait;
use tidepool_types::{Address, DiscoveredPeer};
use tracing::debug;

use crate::error::DiscoveryError;

/// Pluggable source of peer records.
///
/// Implementations must return within a bounded time.
#[async_trait]
pub trait DiscoveryPort: Send + Sync {
    async fn discover_peers(&self) -> Result<Vec<DiscoveredPeer>, DiscoveryError>;
}

/// A fixed list of peer records.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    peers: Vec<DiscoveredPeer>,
}

impl StaticDiscovery {
    pub fn new(peers: Vec<DiscoveredPeer>) -> Self {
        Self { peers }
    }

    /// One record per address, used as both public and private address.
    pub fn from_addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self::new(addresses.into_iter().map(DiscoveredPeer::single).collect())
    }
}

#[async_trait]
impl DiscoveryPort for StaticDiscovery {
    async fn discover_peers(&self) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        Ok(self.peers.clone())
    }
}

/// How long a single DNS lookup may take before it counts as empty.
pub const DEFAULT_DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Peers behind a DNS name (a headless service, a round-robin record).
///
/// Every resolved socket address becomes one peer whose public and private
/// address are the same. Lookup failures are transient: they produce an
/// empty result and the caller polls again.
#[derive(Debug, Clone)]
pub struct DnsDiscovery {
    host: String,
    port: u16,
    lookup_timeout: Duration,
}

impl DnsDiscovery {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, DiscoveryError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "dns discovery needs a host name".into(),
            ));
        }
        Ok(Self {
            host,
            port,
            lookup_timeout: DEFAULT_DNS_LOOKUP_TIMEOUT,
        })
    }

    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl DiscoveryPort for DnsDiscovery {
    async fn discover_peers(&self) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        let lookup = tokio::net::lookup_host((self.host.as_str(), self.port));
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(addrs)) => {
                let peers: Vec<DiscoveredPeer> = addrs
                    .map(|addr| DiscoveredPeer::single(Address::from(addr)))
                    .collect();
                debug!(host = %self.host, count = peers.len(), "dns lookup finished");
                Ok(peers)
            }
            Ok(Err(e)) => {
                debug!(host = %self.host, %e, "dns lookup failed");
                Ok(Vec::new())
            }
            Err(_) => {
                debug!(host = %self.host, timeout = ?self.lookup_timeout, "dns lookup timed out");
                Ok(Vec::new())
            }
        }
    }
}
