//! Peer and quorum descriptors.

use std::fmt;
use std::sync::Arc;

use crate::types::{PeerRank, QuorumId};

/// Network address of a peer, in `host:port` form.
///
/// Backed by a shared string so clones are cheap; addresses are used as
/// map keys throughout the engine.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(Arc<str>);

impl PeerAddress {
    /// Creates an address from a `host:port` string.
    #[must_use]
    pub fn new(addr: impl AsRef<str>) -> Self {
        Self(Arc::from(addr.as_ref()))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer({})", self.0)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One peer in a quorum: its address and election rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Network address of the peer.
    pub address: PeerAddress,
    /// Election priority; higher ranks are preferred leaders.
    pub rank: PeerRank,
}

impl PeerInfo {
    /// Creates a new peer descriptor.
    #[must_use]
    pub const fn new(address: PeerAddress, rank: PeerRank) -> Self {
        Self { address, rank }
    }
}

/// A named quorum: the ordered set of peers replicating one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumInfo {
    /// Identifier of the partition this quorum replicates.
    pub id: QuorumId,
    /// Member peers, ordered by configuration.
    pub peers: Vec<PeerInfo>,
}

impl QuorumInfo {
    /// Creates a new quorum descriptor.
    #[must_use]
    pub fn new(id: QuorumId, peers: Vec<PeerInfo>) -> Self {
        Self { id, peers }
    }

    /// Number of peers in this configuration.
    #[must_use]
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Majority threshold for this configuration: `floor(N/2) + 1`.
    #[must_use]
    pub fn majority_count(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Looks up a member by address.
    #[must_use]
    pub fn peer(&self, address: &PeerAddress) -> Option<&PeerInfo> {
        self.peers.iter().find(|p| &p.address == address)
    }

    /// True if the address belongs to this configuration.
    #[must_use]
    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peer(address).is_some()
    }

    /// The highest rank configured in this quorum, or 0 if empty.
    #[must_use]
    pub fn max_rank(&self) -> PeerRank {
        self.peers
            .iter()
            .map(|p| p.rank)
            .max()
            .unwrap_or_default()
    }
}
