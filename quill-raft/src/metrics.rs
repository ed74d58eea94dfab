//! Per-quorum consensus metrics.
//!
//! One handle per quorum, passed into the context at construction; there
//! is no global registry. Counters are plain atomics so the handle can be
//! shared with observers outside the event loop.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::message::RaftRole;

/// Counters and gauges for one quorum's consensus activity.
#[derive(Debug, Default)]
pub struct ConsensusMetrics {
    elections_started: AtomicU64,
    elections_won: AtomicU64,
    votes_granted: AtomicU64,
    appends_sent: AtomicU64,
    entries_committed: AtomicU64,
    step_downs: AtomicU64,
    role: AtomicU8,
}

/// A point-in-time copy of the metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Elections this node started.
    pub elections_started: u64,
    /// Elections this node won.
    pub elections_won: u64,
    /// Votes this node granted to others.
    pub votes_granted: u64,
    /// Append requests dispatched to peers.
    pub appends_sent: u64,
    /// Entries that reached commit.
    pub entries_committed: u64,
    /// Times this node abandoned leadership or candidacy.
    pub step_downs: u64,
    /// Current role.
    pub role: RaftRole,
}

impl ConsensusMetrics {
    /// Creates a fresh handle.
    #[must_use]
    pub fn handle() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the start of an election round.
    pub fn election_started(&self) {
        self.elections_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a won election.
    pub fn election_won(&self) {
        self.elections_won.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a vote granted to a peer.
    pub fn vote_granted(&self) {
        self.votes_granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` append requests dispatched.
    pub fn appends_sent(&self, count: u64) {
        self.appends_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Records `count` committed entries.
    pub fn entries_committed(&self, count: u64) {
        self.entries_committed.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a step-down.
    pub fn stepped_down(&self) {
        self.step_downs.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the role gauge.
    pub fn set_role(&self, role: RaftRole) {
        self.role.store(role.as_u8(), Ordering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elections_started: self.elections_started.load(Ordering::Relaxed),
            elections_won: self.elections_won.load(Ordering::Relaxed),
            votes_granted: self.votes_granted.load(Ordering::Relaxed),
            appends_sent: self.appends_sent.load(Ordering::Relaxed),
            entries_committed: self.entries_committed.load(Ordering::Relaxed),
            step_downs: self.step_downs.load(Ordering::Relaxed),
            role: RaftRole::from_u8(self.role.load(Ordering::Relaxed))
                .unwrap_or(RaftRole::Follower),
        }
    }
}
