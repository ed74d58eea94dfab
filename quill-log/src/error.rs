//! Log storage error types.
//!
//! All errors are explicit and typed. No string errors.

use thiserror::Error;

/// Result type for log storage operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur during log storage operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Entry payload exceeds maximum size.
    #[error("entry too large: {size} bytes exceeds max {max} bytes")]
    EntryTooLarge {
        /// Actual size in bytes.
        size: u32,
        /// Maximum allowed size.
        max: u32,
    },

    /// CRC checksum mismatch indicates corruption.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// CRC32 recomputed from the data.
        expected: u32,
        /// CRC32 stored in the file.
        actual: u32,
    },

    /// File header is invalid or corrupted.
    #[error("invalid file header: {reason}")]
    InvalidHeader {
        /// Why the header is invalid.
        reason: &'static str,
    },

    /// Entry written out of sequence.
    #[error("non-sequential append: expected index {expected}, got {actual}")]
    NonSequentialAppend {
        /// The index the store expected next.
        expected: u64,
        /// The index that was offered.
        actual: u64,
    },

    /// Requested index is not present in the store.
    #[error("index {index} out of bounds (valid range: {first}..={last})")]
    IndexOutOfBounds {
        /// Requested index.
        index: u64,
        /// First valid index.
        first: u64,
        /// Last valid index (inclusive).
        last: u64,
    },

    /// Truncation offset does not correspond to an entry boundary.
    #[error("invalid truncate offset {offset}: {reason}")]
    InvalidTruncateOffset {
        /// The offending offset.
        offset: u64,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Torn write detected at the end of a file.
    #[error("truncated entry at offset {offset}: expected {expected} bytes, found {found} bytes")]
    TruncatedEntry {
        /// Offset of the truncated entry.
        offset: u64,
        /// Bytes the entry claimed to need.
        expected: u64,
        /// Bytes actually present.
        found: u64,
    },

    /// A fetched segment cannot be spliced at the current log position.
    #[error("segment {name} not spliceable: first index {first_index}, local last {local_last}")]
    NotSpliceable {
        /// File name of the rejected segment.
        name: String,
        /// First index contained in the segment.
        first_index: u64,
        /// The local log's last index.
        local_last: u64,
    },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {operation}: {source}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl LogError {
    /// Wraps an I/O error with the operation that produced it.
    #[must_use]
    pub const fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// True if this error indicates data corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::InvalidHeader { .. }
        )
    }

    /// True if the error is a recoverable torn write.
    #[must_use]
    pub const fn is_torn_tail(&self) -> bool {
        matches!(self, Self::TruncatedEntry { .. })
    }
}
