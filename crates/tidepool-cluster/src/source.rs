//! Where the coordinator gets its candidates from.

use std::sync::Arc;

use async_trait::async_trait;
use tidepool_types::Address;

use crate::discovery::DiscoveryPort;
use crate::error::ClusterError;
use crate::resolver::{CandidateSet, resolve};

/// Produces the candidate set for one polling round.
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn possible_addresses(&self) -> Result<CandidateSet, ClusterError>;
}

/// Candidates from a discovery source, resolved with the address policy.
pub struct DiscoveryAddressSource {
    discovery: Arc<dyn DiscoveryPort>,
    local_address: Address,
    use_public: bool,
}

impl DiscoveryAddressSource {
    pub fn new(discovery: Arc<dyn DiscoveryPort>, local_address: Address, use_public: bool) -> Self {
        Self {
            discovery,
            local_address,
            use_public,
        }
    }
}

#[async_trait]
impl AddressSource for DiscoveryAddressSource {
    async fn possible_addresses(&self) -> Result<CandidateSet, ClusterError> {
        let peers = self.discovery.discover_peers().await?;
        Ok(resolve(&peers, &self.local_address, self.use_public))
    }
}

/// A configured member list, tried as-is every round.
#[derive(Debug, Clone)]
pub struct StaticAddressSource {
    local_address: Address,
    members: Vec<Address>,
}

impl StaticAddressSource {
    pub fn new(local_address: Address, members: Vec<Address>) -> Self {
        Self {
            local_address,
            members,
        }
    }
}

#[async_trait]
impl AddressSource for StaticAddressSource {
    async fn possible_addresses(&self) -> Result<CandidateSet, ClusterError> {
        let mut candidates = CandidateSet::new(self.local_address.clone());
        for member in &self.members {
            candidates.push(member.clone());
        }
        Ok(candidates)
    }
}
