//! Majority acknowledgment tracking for vote and append rounds.

use std::collections::HashSet;

use quill_core::{EditId, PeerAddress, QuorumInfo};

/// What kind of round a session tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// A leader election round.
    Vote,
    /// An entry replication round.
    Append,
}

/// Tracks acknowledgments for one consensus round.
///
/// A session is created when the round starts and mutated only from the
/// owning quorum's event loop. Acks carrying a different edit id belong to
/// a superseded round and are ignored, as are duplicate acks from one
/// peer. Completion latches exactly once, when every configured majority
/// is reached; during a joint membership change that means a majority of
/// the old config AND a majority of the new config, independently.
#[derive(Debug)]
pub struct ConsensusSession {
    kind: SessionKind,
    edit: EditId,
    old_members: HashSet<PeerAddress>,
    old_required: usize,
    old_acks: HashSet<PeerAddress>,
    new_members: Option<HashSet<PeerAddress>>,
    new_required: usize,
    new_acks: HashSet<PeerAddress>,
    complete: bool,
}

impl ConsensusSession {
    /// Creates a session over one configuration.
    #[must_use]
    pub fn new(kind: SessionKind, edit: EditId, config: &QuorumInfo) -> Self {
        Self {
            kind,
            edit,
            old_members: config.peers.iter().map(|p| p.address.clone()).collect(),
            old_required: config.majority_count(),
            old_acks: HashSet::new(),
            new_members: None,
            new_required: 0,
            new_acks: HashSet::new(),
            complete: false,
        }
    }

    /// Creates a session over a joint (old + new) configuration.
    #[must_use]
    pub fn joint(
        kind: SessionKind,
        edit: EditId,
        old_config: &QuorumInfo,
        new_config: &QuorumInfo,
    ) -> Self {
        Self {
            kind,
            edit,
            old_members: old_config.peers.iter().map(|p| p.address.clone()).collect(),
            old_required: old_config.majority_count(),
            old_acks: HashSet::new(),
            new_members: Some(new_config.peers.iter().map(|p| p.address.clone()).collect()),
            new_required: new_config.majority_count(),
            new_acks: HashSet::new(),
            complete: false,
        }
    }

    /// The round's edit id.
    #[must_use]
    pub const fn edit(&self) -> EditId {
        self.edit
    }

    /// The round kind.
    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        self.kind
    }

    /// True once every configured majority has been reached.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of distinct peers that have acked (either config).
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.old_acks.union(&self.new_acks).count()
    }

    /// Records one acknowledgment.
    ///
    /// Returns `true` exactly when this ack completes the session. Acks
    /// for a different edit id, from unknown peers, or from peers that
    /// already acked are ignored; acks past completion are also ignored.
    pub fn increment_ack(&mut self, edit: EditId, peer: &PeerAddress) -> bool {
        if edit != self.edit || self.complete {
            return false;
        }

        if self.old_members.contains(peer) {
            self.old_acks.insert(peer.clone());
        }
        if let Some(new_members) = &self.new_members {
            if new_members.contains(peer) {
                self.new_acks.insert(peer.clone());
            }
        }

        let old_satisfied = self.old_acks.len() >= self.old_required;
        let new_satisfied =
            self.new_members.is_none() || self.new_acks.len() >= self.new_required;

        if old_satisfied && new_satisfied {
            self.complete = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{PeerInfo, PeerRank, QuorumId, Term};

    fn config(addrs: &[&str]) -> QuorumInfo {
        let peers = addrs
            .iter()
            .enumerate()
            .map(|(i, a)| PeerInfo::new(PeerAddress::new(*a), PeerRank::new(i as u64 + 1)))
            .collect();
        QuorumInfo::new(QuorumId::new(1), peers)
    }

    fn edit(term: u64, index: u64) -> EditId {
        EditId::new(Term::new(term), index)
    }

    #[test]
    fn test_majority_completes_exactly_at_threshold() {
        let cfg = config(&["a:1", "b:1", "c:1", "d:1", "e:1"]);
        let mut session = ConsensusSession::new(SessionKind::Vote, edit(1, 0), &cfg);

        assert!(!session.increment_ack(edit(1, 0), &PeerAddress::new("a:1")));
        assert!(!session.increment_ack(edit(1, 0), &PeerAddress::new("b:1")));
        assert!(!session.is_complete());

        // Third ack of five crosses floor(5/2)+1 = 3.
        assert!(session.increment_ack(edit(1, 0), &PeerAddress::new("c:1")));
        assert!(session.is_complete());

        // Further acks are ignored and never "re-complete".
        assert!(!session.increment_ack(edit(1, 0), &PeerAddress::new("d:1")));
    }

    #[test]
    fn test_duplicate_acks_do_not_count() {
        let cfg = config(&["a:1", "b:1", "c:1"]);
        let mut session = ConsensusSession::new(SessionKind::Append, edit(2, 5), &cfg);

        let a = PeerAddress::new("a:1");
        assert!(!session.increment_ack(edit(2, 5), &a));
        assert!(!session.increment_ack(edit(2, 5), &a));
        assert!(!session.increment_ack(edit(2, 5), &a));
        assert_eq!(session.ack_count(), 1);
        assert!(!session.is_complete());
    }

    #[test]
    fn test_stale_edit_acks_ignored() {
        let cfg = config(&["a:1", "b:1", "c:1"]);
        let mut session = ConsensusSession::new(SessionKind::Vote, edit(3, 0), &cfg);

        assert!(!session.increment_ack(edit(2, 0), &PeerAddress::new("a:1")));
        assert!(!session.increment_ack(edit(2, 0), &PeerAddress::new("b:1")));
        assert_eq!(session.ack_count(), 0);
    }

    #[test]
    fn test_unknown_peer_ignored() {
        let cfg = config(&["a:1", "b:1", "c:1"]);
        let mut session = ConsensusSession::new(SessionKind::Vote, edit(1, 0), &cfg);

        assert!(!session.increment_ack(edit(1, 0), &PeerAddress::new("z:9")));
        assert_eq!(session.ack_count(), 0);
    }

    #[test]
    fn test_joint_requires_both_majorities() {
        let old = config(&["a:1", "b:1", "c:1"]);
        let new = config(&["c:1", "d:1", "e:1"]);
        let mut session = ConsensusSession::joint(SessionKind::Append, edit(4, 9), &old, &new);

        // Old-config majority alone is not enough.
        assert!(!session.increment_ack(edit(4, 9), &PeerAddress::new("a:1")));
        assert!(!session.increment_ack(edit(4, 9), &PeerAddress::new("b:1")));
        assert!(!session.is_complete());

        // "c" counts toward both configs; "d" completes the new side.
        assert!(!session.increment_ack(edit(4, 9), &PeerAddress::new("c:1")));
        assert!(session.increment_ack(edit(4, 9), &PeerAddress::new("d:1")));
        assert!(session.is_complete());
    }

    #[test]
    fn test_joint_new_majority_alone_insufficient() {
        let old = config(&["a:1", "b:1", "c:1"]);
        let new = config(&["d:1", "e:1", "f:1"]);
        let mut session = ConsensusSession::joint(SessionKind::Vote, edit(1, 0), &old, &new);

        for addr in ["d:1", "e:1", "f:1"] {
            session.increment_ack(edit(1, 0), &PeerAddress::new(addr));
        }
        assert!(!session.is_complete());

        session.increment_ack(edit(1, 0), &PeerAddress::new("a:1"));
        assert!(session.increment_ack(edit(1, 0), &PeerAddress::new("b:1")));
    }
}
