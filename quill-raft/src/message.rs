//! Consensus RPC message types.

use bytes::Bytes;
use quill_core::{EditId, PeerAddress, QuorumId, Term};

/// Role of a peer within its quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaftRole {
    /// Passive; responds to vote and append requests.
    #[default]
    Follower,
    /// Actively seeking votes for leadership.
    Candidate,
    /// Replicating entries and dispatching heartbeats.
    Leader,
}

impl RaftRole {
    /// Stable numeric encoding for the wire and metrics.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Follower => 0,
            Self::Candidate => 1,
            Self::Leader => 2,
        }
    }

    /// Decodes a role from its numeric encoding.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Follower),
            1 => Some(Self::Candidate),
            2 => Some(Self::Leader),
            _ => None,
        }
    }
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Follower => "follower",
            Self::Candidate => "candidate",
            Self::Leader => "leader",
        };
        f.write_str(name)
    }
}

/// One replicated log entry on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Identity of the entry.
    pub edit: EditId,
    /// Framed payload (engine kind byte + application bytes).
    pub payload: Bytes,
}

impl LogEntry {
    /// Creates a new wire entry.
    #[must_use]
    pub const fn new(edit: EditId, payload: Bytes) -> Self {
        Self { edit, payload }
    }
}

/// Vote solicitation broadcast by a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    /// Quorum the election belongs to.
    pub quorum: QuorumId,
    /// The candidate's address.
    pub candidate: PeerAddress,
    /// The election edit id the candidacy runs under.
    pub edit: EditId,
    /// The candidate's last persisted edit, for up-to-date checks.
    pub prev_edit: EditId,
}

/// Reply to a [`VoteRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteResponse {
    /// Quorum the election belongs to.
    pub quorum: QuorumId,
    /// The responding peer.
    pub from: PeerAddress,
    /// The responder's current term, for candidate step-down.
    pub term: Term,
    /// Echo of the election edit id the vote applies to.
    pub edit: EditId,
    /// Whether the vote was granted.
    pub granted: bool,
}

/// Entry replication (or, with no entries, a heartbeat) from the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Quorum the entries belong to.
    pub quorum: QuorumId,
    /// The leader's address.
    pub leader: PeerAddress,
    /// The leader's current term.
    pub term: Term,
    /// Edit immediately preceding the first entry in `entries`.
    pub prev_edit: EditId,
    /// The leader's committed index, for follower commit advancement.
    pub committed_index: u64,
    /// Entries to store; empty for a heartbeat.
    pub entries: Vec<LogEntry>,
}

impl AppendRequest {
    /// The edit id this request's acknowledgment round is keyed by:
    /// the last entry shipped, or `prev_edit` for a heartbeat.
    #[must_use]
    pub fn round_edit(&self) -> EditId {
        self.entries.last().map_or(self.prev_edit, |e| e.edit)
    }

    /// True if this request carries no entries.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reply to an [`AppendRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResponse {
    /// Quorum the reply belongs to.
    pub quorum: QuorumId,
    /// The responding peer.
    pub from: PeerAddress,
    /// The responder's current term, for leader step-down.
    pub term: Term,
    /// Echo of the round's edit id.
    pub edit: EditId,
    /// Whether the entries were accepted.
    pub success: bool,
    /// On success, the responder's last index (matched index); on
    /// rejection, a hint for where the leader should resume replication.
    pub last_index: u64,
}

/// Diagnostic status of one peer, as returned to the status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    /// Quorum the status describes.
    pub quorum: QuorumId,
    /// Current role.
    pub role: RaftRole,
    /// Current term.
    pub term: Term,
    /// Highest committed index.
    pub committed_index: u64,
    /// Last persisted edit.
    pub last_edit: EditId,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} role={} term={} committed={} last={}",
            self.quorum,
            self.role,
            self.term.get(),
            self.committed_index,
            self.last_edit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [RaftRole::Follower, RaftRole::Candidate, RaftRole::Leader] {
            assert_eq!(RaftRole::from_u8(role.as_u8()), Some(role));
        }
        assert_eq!(RaftRole::from_u8(9), None);
    }

    #[test]
    fn test_round_edit() {
        let prev = EditId::new(Term::new(2), 10);
        let mut req = AppendRequest {
            quorum: QuorumId::new(1),
            leader: PeerAddress::new("a:1"),
            term: Term::new(2),
            prev_edit: prev,
            committed_index: 8,
            entries: Vec::new(),
        };
        assert!(req.is_heartbeat());
        assert_eq!(req.round_edit(), prev);

        req.entries.push(LogEntry::new(
            EditId::new(Term::new(2), 11),
            Bytes::from("x"),
        ));
        req.entries.push(LogEntry::new(
            EditId::new(Term::new(2), 12),
            Bytes::from("y"),
        ));
        assert!(!req.is_heartbeat());
        assert_eq!(req.round_edit(), EditId::new(Term::new(2), 12));
    }

    #[test]
    fn test_status_display() {
        let status = PeerStatus {
            quorum: QuorumId::new(3),
            role: RaftRole::Leader,
            term: Term::new(4),
            committed_index: 17,
            last_edit: EditId::new(Term::new(4), 19),
        };
        assert_eq!(
            format!("{status}"),
            "quorum-3 role=leader term=4 committed=17 last=4:19"
        );
    }
}
