//! On-disk record formats.
//!
//! A segment file starts with a fixed header followed by a sequence of
//! entry records:
//!
//! ```text
//! +----------+-------------+
//! |   Term   | Start Index |   file header (16 bytes)
//! | (8 bytes)|  (8 bytes)  |
//! +----------+-------------+
//! +----------+----------+----------+----------+
//! |  Index   |  Length  | Payload  |  CRC32   |   entry record
//! | (8 bytes)| (4 bytes)| (N bytes)| (4 bytes)|
//! +----------+----------+----------+----------+
//! ```
//!
//! The CRC32 covers index + length + payload and trails the payload so a
//! torn write is detected no matter where it was cut off. All integers are
//! little-endian. A segment holds entries of exactly one term: the term
//! lives in the file header, not in each record.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quill_core::{EditId, Term, ENTRY_PAYLOAD_BYTES_MAX};

use crate::error::{LogError, LogResult};

/// Size of the file header in bytes.
pub const FILE_HEADER_SIZE: u64 = 16;

/// Fixed per-entry overhead: index + length prefix + trailing CRC.
pub const ENTRY_OVERHEAD_BYTES: u64 = 16;

/// Header at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Term of every entry in this segment.
    pub term: Term,
    /// Index of the first entry in this segment.
    pub start_index: u64,
}

impl FileHeader {
    /// Creates a new file header.
    #[must_use]
    pub const fn new(term: Term, start_index: u64) -> Self {
        Self { term, start_index }
    }

    /// Encodes the header to bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.term.get());
        buf.put_u64_le(self.start_index);
    }

    /// Decodes a header from bytes.
    ///
    /// # Errors
    /// Returns `InvalidHeader` if the buffer is too small.
    pub fn decode(buf: &mut impl Buf) -> LogResult<Self> {
        if buf.remaining() < FILE_HEADER_SIZE as usize {
            return Err(LogError::InvalidHeader {
                reason: "file shorter than header",
            });
        }
        let term = Term::new(buf.get_u64_le());
        let start_index = buf.get_u64_le();
        Ok(Self { term, start_index })
    }
}

/// One entry record: an index and its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// Log index of this entry.
    pub index: u64,
    /// Application payload; the engine never interprets it.
    pub payload: Bytes,
}

impl EntryRecord {
    /// Creates a new record.
    ///
    /// # Errors
    /// Returns `EntryTooLarge` if the payload exceeds the limit.
    pub fn new(index: u64, payload: Bytes) -> LogResult<Self> {
        if payload.len() > ENTRY_PAYLOAD_BYTES_MAX as usize {
            return Err(LogError::EntryTooLarge {
                size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                max: ENTRY_PAYLOAD_BYTES_MAX,
            });
        }
        Ok(Self { index, payload })
    }

    /// Total encoded size of this record in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> u64 {
        ENTRY_OVERHEAD_BYTES + self.payload.len() as u64
    }

    /// The edit id of this record given its segment's term.
    #[must_use]
    pub const fn edit_id(&self, term: Term) -> EditId {
        EditId::new(term, self.index)
    }

    /// Encodes the record, including the trailing checksum.
    pub fn encode(&self, buf: &mut BytesMut) {
        // Length fits by construction: checked against the limit in new().
        #[allow(clippy::cast_possible_truncation)]
        let length = self.payload.len() as u32;

        buf.put_u64_le(self.index);
        buf.put_u32_le(length);
        buf.put_slice(&self.payload);
        buf.put_u32_le(compute_crc(self.index, length, &self.payload));
    }

    /// Decodes one record from `buf`, verifying its checksum.
    ///
    /// `offset` is the record's position in the file, used for error
    /// reporting. A record cut short by a torn write yields
    /// `TruncatedEntry`; a checksum failure yields `ChecksumMismatch`.
    ///
    /// # Errors
    /// Returns an error if the record is incomplete or corrupted.
    pub fn decode(buf: &mut impl Buf, offset: u64) -> LogResult<Self> {
        let available = buf.remaining() as u64;
        if available < 12 {
            return Err(LogError::TruncatedEntry {
                offset,
                expected: ENTRY_OVERHEAD_BYTES,
                found: available,
            });
        }

        let index = buf.get_u64_le();
        let length = buf.get_u32_le();

        if length > ENTRY_PAYLOAD_BYTES_MAX {
            return Err(LogError::InvalidHeader {
                reason: "entry length exceeds maximum",
            });
        }

        let needed = u64::from(length) + 4;
        if (buf.remaining() as u64) < needed {
            return Err(LogError::TruncatedEntry {
                offset,
                expected: ENTRY_OVERHEAD_BYTES + u64::from(length),
                found: available,
            });
        }

        let payload = buf.copy_to_bytes(length as usize);
        let stored_crc = buf.get_u32_le();
        let computed = compute_crc(index, length, &payload);
        if computed != stored_crc {
            return Err(LogError::ChecksumMismatch {
                offset,
                expected: computed,
                actual: stored_crc,
            });
        }

        Ok(Self { index, payload })
    }
}

/// Computes the CRC32 over index + length + payload.
fn compute_crc(index: u64, length: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&index.to_le_bytes());
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
