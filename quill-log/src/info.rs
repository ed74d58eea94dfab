//! Segment advertisements for peer reconciliation.

use std::fmt;

use quill_core::Term;

/// Describes one on-disk segment as advertised to peers.
///
/// A peer repairing its log compares these against its own committed
/// position to decide which files to fetch and from whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// File name of the segment within its quorum's log directory.
    pub name: String,
    /// First index contained in the segment.
    pub first_index: u64,
    /// Last index contained in the segment (inclusive).
    pub last_index: u64,
    /// Term of every entry in the segment.
    pub term: Term,
}

impl LogFileInfo {
    /// Creates a new advertisement.
    #[must_use]
    pub const fn new(name: String, first_index: u64, last_index: u64, term: Term) -> Self {
        Self {
            name,
            first_index,
            last_index,
            term,
        }
    }

    /// Number of entries the segment contains.
    #[must_use]
    pub const fn entry_count(&self) -> u64 {
        self.last_index - self.first_index + 1
    }

    /// True if the segment contains the given index.
    #[must_use]
    pub const fn contains(&self, index: u64) -> bool {
        self.first_index <= index && index <= self.last_index
    }
}

impl fmt::Display for LogFileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}..={} @ term {}]",
            self.name,
            self.first_index,
            self.last_index,
            self.term.get()
        )
    }
}
