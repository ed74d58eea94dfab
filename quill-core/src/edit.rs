//! Edit identity and leadership markers.
//!
//! An [`EditId`] names one position in the replicated log as a
//! `(term, index)` pair with a total order: compare terms first, indexes
//! second. A [`ConsensusHost`] records who is recognized as leader (or who
//! received a vote) at a given term; it is immutable once created.

use std::cmp::Ordering;
use std::fmt;

use crate::peer::PeerAddress;
use crate::types::{PeerRank, Term};

/// Identity of one edit in the replicated log.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EditId {
    /// Election epoch the edit was created in.
    pub term: Term,
    /// Position within the log.
    pub index: u64,
}

impl EditId {
    /// Creates a new edit id.
    #[must_use]
    pub const fn new(term: Term, index: u64) -> Self {
        Self { term, index }
    }

    /// The sentinel id preceding any real edit.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            term: Term::new(0),
            index: 0,
        }
    }

    /// Derives the edit id a candidacy is started under.
    ///
    /// The term advances by the candidate's rank (ranks start at 1), so
    /// simultaneous candidacies started from the same edit by peers of
    /// different ranks produce distinct ids that order by rank. The index
    /// carries forward unchanged; a retried election for an id that is
    /// still in flight must reuse the same id rather than derive a new one.
    #[must_use]
    pub fn election_id(prev: EditId, rank: PeerRank) -> Self {
        debug_assert!(rank.get() >= 1, "peer ranks start at 1");
        Self {
            term: Term::new(prev.term.get() + rank.get().max(1)),
            index: prev.index,
        }
    }

    /// Returns the id of the edit following this one in the same term.
    #[must_use]
    pub const fn next_index(self) -> Self {
        Self {
            term: self.term,
            index: self.index + 1,
        }
    }

    /// True if `self` names a position at least as recent as `other`.
    ///
    /// Used by voters to decide whether a candidate's log is up to date.
    #[must_use]
    pub fn is_up_to_date_with(self, other: EditId) -> bool {
        self >= other
    }
}

impl Ord for EditId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term
            .cmp(&other.term)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for EditId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edit({}:{})", self.term.get(), self.index)
    }
}

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.term.get(), self.index)
    }
}

/// Identifies who is recognized as leader (or voted for) at a given term.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConsensusHost {
    /// The term the recognition applies to.
    pub term: Term,
    /// Address of the recognized peer.
    pub address: PeerAddress,
}

impl ConsensusHost {
    /// Creates a new host marker.
    #[must_use]
    pub const fn new(term: Term, address: PeerAddress) -> Self {
        Self { term, address }
    }
}

impl fmt::Debug for ConsensusHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host({}@{})", self.address, self.term.get())
    }
}

impl fmt::Display for ConsensusHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.term.get())
    }
}
