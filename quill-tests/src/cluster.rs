//! Deterministic in-memory cluster harness.
//!
//! Wires one [`RaftContext`] per peer to a synchronous in-memory network.
//! Timer actions are not simulated; tests fire `ProgressTimeout` /
//! `HeartbeatTimeout` explicitly, which makes every scenario a
//! deterministic sequence of deliveries. Packet drop is controlled per
//! peer and applies to both directions, matching a network partition.

use std::collections::{BTreeMap, HashSet, VecDeque};

use bytes::Bytes;
use quill_core::{EditId, PeerAddress, PeerInfo, PeerRank, QuorumId, QuorumInfo};
use quill_raft::{
    ConsensusMetrics, LogStore, MemoryLogStore, MemoryVoteStore, RaftAction, RaftContext,
    RaftEvent, RaftRole,
};

use crate::properties::PropertyChecker;

type TestContext = RaftContext<MemoryVoteStore, MemoryLogStore>;

struct Envelope {
    from: PeerAddress,
    to: PeerAddress,
    event: RaftEvent,
}

/// An in-memory quorum with controllable packet loss.
pub struct TestCluster {
    config: QuorumInfo,
    nodes: BTreeMap<PeerAddress, TestContext>,
    dropped: HashSet<PeerAddress>,
    queue: VecDeque<Envelope>,
    commits: BTreeMap<PeerAddress, Vec<(EditId, Bytes)>>,
    /// Safety-property observations, recorded after every delivery.
    pub checker: PropertyChecker,
}

impl TestCluster {
    /// Builds a cluster of `ranks.len()` peers; peer `i` is `n{i+1}:1`
    /// with rank `ranks[i]`.
    ///
    /// # Panics
    /// Panics if a context cannot be constructed.
    #[must_use]
    pub fn new(ranks: &[u64]) -> Self {
        let peers: Vec<PeerInfo> = ranks
            .iter()
            .enumerate()
            .map(|(i, &rank)| {
                PeerInfo::new(PeerAddress::new(format!("n{}:1", i + 1)), PeerRank::new(rank))
            })
            .collect();
        let config = QuorumInfo::new(QuorumId::new(1), peers.clone());

        let mut nodes = BTreeMap::new();
        for peer in peers {
            let ctx = RaftContext::new(
                config.clone(),
                peer.address.clone(),
                MemoryVoteStore::new(),
                MemoryLogStore::new(),
                ConsensusMetrics::handle(),
            )
            .expect("valid test configuration");
            nodes.insert(peer.address, ctx);
        }

        Self {
            config,
            nodes,
            dropped: HashSet::new(),
            queue: VecDeque::new(),
            commits: BTreeMap::new(),
            checker: PropertyChecker::new(),
        }
    }

    /// The cluster's configuration.
    #[must_use]
    pub const fn config(&self) -> &QuorumInfo {
        &self.config
    }

    fn addr(name: &str) -> PeerAddress {
        PeerAddress::new(name)
    }

    /// Starts or stops dropping all packets to and from `name`.
    pub fn set_dropped(&mut self, name: &str, dropped: bool) {
        if dropped {
            self.dropped.insert(Self::addr(name));
        } else {
            self.dropped.remove(&Self::addr(name));
        }
    }

    /// Fires the progress (election) timer of `name` and settles the
    /// resulting traffic.
    pub fn timeout(&mut self, name: &str) {
        self.inject(name, RaftEvent::ProgressTimeout);
    }

    /// Fires the heartbeat timer of `name` and settles the traffic.
    pub fn heartbeat(&mut self, name: &str) {
        self.inject(name, RaftEvent::HeartbeatTimeout);
    }

    /// Asks `name` to replicate a payload and settles the traffic.
    pub fn replicate(&mut self, name: &str, payload: &str) {
        self.inject(
            name,
            RaftEvent::ReplicateEntries(Bytes::from(payload.to_string())),
        );
    }

    /// Requests a membership change through `name`.
    pub fn request_membership_change(&mut self, name: &str, new_config: QuorumInfo) {
        self.inject(name, RaftEvent::MembershipChangeRequested(new_config));
    }

    /// Delivers one event locally (timers fire even inside a partition)
    /// and drains all resulting network traffic.
    pub fn inject(&mut self, name: &str, event: RaftEvent) {
        let to = Self::addr(name);
        let actions = self
            .nodes
            .get_mut(&to)
            .expect("unknown node")
            .on_event(event);
        self.absorb(&to, actions);
        self.drain();
    }

    fn absorb(&mut self, from: &PeerAddress, actions: Vec<RaftAction>) {
        for action in actions {
            let (to, event) = match action {
                RaftAction::SendVoteRequest { to, request } => {
                    (to, RaftEvent::VoteRequestReceived(request))
                }
                RaftAction::SendVoteResponse { to, response } => {
                    (to, RaftEvent::VoteResponseReceived(response))
                }
                RaftAction::SendAppendRequest { to, request } => {
                    (to, RaftEvent::AppendRequestReceived(request))
                }
                RaftAction::SendAppendResponse { to, response } => {
                    (to, RaftEvent::AppendResponseReceived(response))
                }
                RaftAction::CommitEntry { edit, payload } => {
                    self.commits
                        .entry(from.clone())
                        .or_default()
                        .push((edit, payload));
                    continue;
                }
                // Timers are driven explicitly by the scenario.
                _ => continue,
            };
            self.queue.push_back(Envelope {
                from: from.clone(),
                to,
                event,
            });
        }
        self.observe();
    }

    fn drain(&mut self) {
        let mut delivered = 0u32;
        while let Some(envelope) = self.queue.pop_front() {
            delivered += 1;
            assert!(delivered < 100_000, "message storm: scenario does not settle");

            if self.dropped.contains(&envelope.from) || self.dropped.contains(&envelope.to) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&envelope.to) else {
                continue;
            };
            let actions = node.on_event(envelope.event);
            let to = envelope.to;
            self.absorb(&to, actions);
        }
    }

    fn observe(&mut self) {
        for (addr, node) in &self.nodes {
            self.checker.record(
                addr.as_str(),
                node.role() == RaftRole::Leader,
                node.current_term().get(),
            );
        }
    }

    /// Role of `name`.
    #[must_use]
    pub fn role(&self, name: &str) -> RaftRole {
        self.nodes[&Self::addr(name)].role()
    }

    /// Current term of `name`.
    #[must_use]
    pub fn term(&self, name: &str) -> u64 {
        self.nodes[&Self::addr(name)].current_term().get()
    }

    /// Committed index of `name`.
    #[must_use]
    pub fn committed_index(&self, name: &str) -> u64 {
        self.nodes[&Self::addr(name)].committed_edit().index
    }

    /// Last edit in `name`'s log.
    #[must_use]
    pub fn last_edit(&self, name: &str) -> EditId {
        self.nodes[&Self::addr(name)].log().last_edit()
    }

    /// Addresses of all current leaders (should never exceed one).
    #[must_use]
    pub fn leaders(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.role() == RaftRole::Leader)
            .map(|(addr, _)| addr.as_str().to_string())
            .collect()
    }

    /// Full log contents of every node, for log-matching checks.
    ///
    /// # Panics
    /// Panics if a memory log read fails (it cannot).
    #[must_use]
    pub fn logs(&self) -> Vec<(String, Vec<(EditId, Bytes)>)> {
        self.nodes
            .iter()
            .map(|(addr, node)| {
                let entries = node
                    .log()
                    .entries_from(1, usize::MAX)
                    .expect("memory log read");
                (addr.as_str().to_string(), entries)
            })
            .collect()
    }

    /// Commits delivered to `name`'s data-store surface so far.
    #[must_use]
    pub fn commits_of(&self, name: &str) -> Vec<(EditId, Bytes)> {
        self.commits
            .get(&Self::addr(name))
            .cloned()
            .unwrap_or_default()
    }
}
