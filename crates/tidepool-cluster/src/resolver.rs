//! Turning raw discovery records into join candidates.

use tidepool_types::{Address, DiscoveredPeer};
use tracing::debug;

/// Ordered, deduplicated join candidates.
///
/// Insertion order is discovery order. The set knows the local address and
/// refuses to hold it, so a node can never try to join itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    local: Address,
    addresses: Vec<Address>,
}

impl CandidateSet {
    /// An empty set for the node listening on `local`.
    pub fn new(local: Address) -> Self {
        Self {
            local,
            addresses: Vec::new(),
        }
    }

    /// Append an address.
    ///
    /// Returns `false` (and leaves the set unchanged) for the local address
    /// or an endpoint already present.
    pub fn push(&mut self, address: Address) -> bool {
        if address == self.local || self.addresses.contains(&address) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Place `address` at `index`, moving it there if it sits further back
    /// or inserting it if absent.
    ///
    /// Returns `false` (and leaves the set unchanged) for the local address,
    /// an address already present before `index`, or an index past the end.
    pub fn promote(&mut self, index: usize, address: Address) -> bool {
        if address == self.local || index > self.addresses.len() {
            return false;
        }
        match self.addresses.iter().position(|a| *a == address) {
            Some(pos) if pos < index => false,
            Some(pos) => {
                let address = self.addresses.remove(pos);
                self.addresses.insert(index, address);
                true
            }
            None => {
                self.addresses.insert(index, address);
                true
            }
        }
    }

    /// Keep only the addresses for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&Address) -> bool) {
        self.addresses.retain(keep);
    }

    pub fn get(&self, index: usize) -> Option<&Address> {
        self.addresses.get(index)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// The address the set refuses.
    pub fn local(&self) -> &Address {
        &self.local
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.addresses.iter()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.addresses
    }
}

impl<'a> IntoIterator for &'a CandidateSet {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Build the candidate set from one discovery result.
///
/// Picks the public or private address of every record, drops the local
/// address and duplicates, and keeps first-seen order. Records missing the
/// selected address are skipped.
pub fn resolve(peers: &[DiscoveredPeer], local_address: &Address, use_public: bool) -> CandidateSet {
    let mut candidates = CandidateSet::new(local_address.clone());
    for peer in peers {
        match peer.select(use_public) {
            Some(address) => {
                candidates.push(address.clone());
            }
            None => debug!(
                ?peer,
                use_public, "discovered peer has no address of the selected kind"
            ),
        }
    }
    candidates
}
