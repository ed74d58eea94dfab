//! Peer set management, including joint membership changes.

use quill_core::{EditId, PeerAddress, QuorumInfo};

use crate::session::{ConsensusSession, SessionKind};

/// Phase of an in-flight membership change.
///
/// The change is driven through the ordinary append-commit path: first the
/// joint (old + new) configuration entry must commit under both
/// majorities, then the new-only configuration entry commits under the new
/// majority, at which point the old configuration is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChangeState {
    /// The joint-config entry has been proposed and awaits commit.
    JointConfigCommitInProgress,
    /// The joint config committed; the new-only entry awaits commit.
    NewConfigCommitInProgress,
}

/// Owns the peer configuration(s) for one quorum.
///
/// Outside a membership change exactly one configuration is active. While
/// a change is in flight the manager carries both the old and the new
/// configuration, and every session it creates requires a majority in
/// each.
#[derive(Debug, Clone)]
pub struct PeerManager {
    old_config: QuorumInfo,
    new_config: Option<QuorumInfo>,
}

impl PeerManager {
    /// Creates a manager over a single configuration.
    #[must_use]
    pub const fn new(config: QuorumInfo) -> Self {
        Self {
            old_config: config,
            new_config: None,
        }
    }

    /// True while a joint configuration is active.
    #[must_use]
    pub const fn is_joint(&self) -> bool {
        self.new_config.is_some()
    }

    /// The active configuration(s): old first, then the optional new one.
    #[must_use]
    pub const fn configs(&self) -> (&QuorumInfo, Option<&QuorumInfo>) {
        (&self.old_config, self.new_config.as_ref())
    }

    /// Majority threshold of the old (primary) configuration.
    #[must_use]
    pub fn majority_count(&self) -> usize {
        self.old_config.majority_count()
    }

    /// True if `address` belongs to any active configuration.
    #[must_use]
    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.old_config.contains(address)
            || self
                .new_config
                .as_ref()
                .is_some_and(|c| c.contains(address))
    }

    /// All peer addresses across the active configuration(s), excluding
    /// `this`. Each peer appears once even if it is in both configs.
    #[must_use]
    pub fn broadcast_targets(&self, this: &PeerAddress) -> Vec<PeerAddress> {
        let mut targets: Vec<PeerAddress> = Vec::new();
        let mut push = |addr: &PeerAddress| {
            if addr != this && !targets.contains(addr) {
                targets.push(addr.clone());
            }
        };
        for peer in &self.old_config.peers {
            push(&peer.address);
        }
        if let Some(new_config) = &self.new_config {
            for peer in &new_config.peers {
                push(&peer.address);
            }
        }
        targets
    }

    /// Creates the acknowledgment session for a vote round.
    #[must_use]
    pub fn create_vote_session(&self, edit: EditId) -> ConsensusSession {
        self.create_session(SessionKind::Vote, edit)
    }

    /// Creates the acknowledgment session for an append round.
    #[must_use]
    pub fn create_append_session(&self, edit: EditId) -> ConsensusSession {
        self.create_session(SessionKind::Append, edit)
    }

    fn create_session(&self, kind: SessionKind, edit: EditId) -> ConsensusSession {
        match &self.new_config {
            Some(new_config) => {
                ConsensusSession::joint(kind, edit, &self.old_config, new_config)
            }
            None => ConsensusSession::new(kind, edit, &self.old_config),
        }
    }

    /// Enters the joint configuration with `new_config` alongside the
    /// current one. No-op if a change is already in flight.
    pub fn begin_joint(&mut self, new_config: QuorumInfo) {
        if self.new_config.is_none() {
            self.new_config = Some(new_config);
        }
    }

    /// Retires the old configuration, leaving only the new one active.
    ///
    /// Called when the new-only config entry commits. No-op outside a
    /// joint configuration.
    pub fn complete_joint(&mut self) {
        if let Some(new_config) = self.new_config.take() {
            self.old_config = new_config;
        }
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

    #[test]
    fn test_broadcast_targets_dedup_and_exclude_self() {
        let mut pm = PeerManager::new(config(&["a:1", "b:1", "c:1"]));
        pm.begin_joint(config(&["b:1", "c:1", "d:1"]));

        let this = PeerAddress::new("a:1");
        let targets = pm.broadcast_targets(&this);

        assert_eq!(targets.len(), 3);
        assert!(!targets.contains(&this));
        assert!(targets.contains(&PeerAddress::new("d:1")));
    }

    #[test]
    fn test_session_kind_tracks_configuration() {
        let mut pm = PeerManager::new(config(&["a:1", "b:1", "c:1"]));
        let edit = EditId::new(Term::new(1), 0);

        let single = pm.create_vote_session(edit);
        pm.begin_joint(config(&["c:1", "d:1", "e:1"]));
        let mut joint = pm.create_append_session(edit);

        // Single-config session completes at 2 of 3.
        let mut single = single;
        single.increment_ack(edit, &PeerAddress::new("a:1"));
        assert!(single.increment_ack(edit, &PeerAddress::new("b:1")));

        // Joint session needs both majorities.
        joint.increment_ack(edit, &PeerAddress::new("a:1"));
        joint.increment_ack(edit, &PeerAddress::new("b:1"));
        assert!(!joint.is_complete());
        joint.increment_ack(edit, &PeerAddress::new("d:1"));
        assert!(joint.increment_ack(edit, &PeerAddress::new("e:1")));
    }

    #[test]
    fn test_complete_joint_switches_config() {
        let mut pm = PeerManager::new(config(&["a:1", "b:1", "c:1"]));
        pm.begin_joint(config(&["c:1", "d:1", "e:1"]));
        assert!(pm.is_joint());
        assert!(pm.contains(&PeerAddress::new("a:1")));

        pm.complete_joint();
        assert!(!pm.is_joint());
        assert!(!pm.contains(&PeerAddress::new("a:1")));
        assert!(pm.contains(&PeerAddress::new("e:1")));
    }

    #[test]
    fn test_begin_joint_is_idempotent() {
        let mut pm = PeerManager::new(config(&["a:1", "b:1", "c:1"]));
        pm.begin_joint(config(&["d:1"]));
        pm.begin_joint(config(&["e:1"]));

        let (_, new_config) = pm.configs();
        assert!(new_config.unwrap().contains(&PeerAddress::new("d:1")));
    }
}
