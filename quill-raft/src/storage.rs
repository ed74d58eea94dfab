//! Durable consensus state.
//!
//! Two storage seams feed the state machine:
//!
//! - [`VoteStore`] persists the hard state that must survive a crash
//!   before any vote response leaves the node: the current term, who was
//!   voted for, and the recognized leader marker.
//! - [`LogStore`] persists the replicated entries themselves.
//!
//! Both traits are synchronous; the quorum's event loop is the only
//! writer, and a write must be durable before the triggering event's
//! response is sent. In-memory implementations back unit and simulation
//! tests; the durable implementations are [`FileVoteStore`] here and
//! [`SegmentLogStore`](crate::SegmentLogStore) over the segmented log.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quill_core::{ConsensusHost, EditId, PeerAddress, Term};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the durable state seams.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O failure.
    #[error("storage I/O error during {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// Stored data failed validation.
    #[error("storage corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// A requested entry is not stored.
    #[error("entry not found at index {index}")]
    NotFound {
        /// The missing index.
        index: u64,
    },
}

impl StorageError {
    /// Wraps an error with the operation that produced it.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }
}

/// Hard consensus state persisted before responding to RPCs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoteState {
    /// Highest term this node has adopted.
    pub term: Term,
    /// Who received this node's vote in `term`, if anyone.
    pub voted_for: Option<ConsensusHost>,
    /// The leader this node recognizes, if any.
    pub leader: Option<ConsensusHost>,
}

impl VoteState {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64_le(self.term.get());
        encode_host(&mut buf, self.voted_for.as_ref());
        encode_host(&mut buf, self.leader.as_ref());
        buf.freeze()
    }

    fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.remaining() < 8 {
            return None;
        }
        let term = Term::new(buf.get_u64_le());
        let voted_for = decode_host(buf)?;
        let leader = decode_host(buf)?;
        Some(Self {
            term,
            voted_for,
            leader,
        })
    }
}

fn encode_host(buf: &mut BytesMut, host: Option<&ConsensusHost>) {
    match host {
        Some(host) => {
            buf.put_u8(1);
            buf.put_u64_le(host.term.get());
            let addr = host.address.as_str().as_bytes();
            #[allow(clippy::cast_possible_truncation)]
            buf.put_u16_le(addr.len() as u16);
            buf.put_slice(addr);
        }
        None => buf.put_u8(0),
    }
}

fn decode_host(buf: &mut Bytes) -> Option<Option<ConsensusHost>> {
    if buf.remaining() < 1 {
        return None;
    }
    if buf.get_u8() == 0 {
        return Some(None);
    }
    if buf.remaining() < 10 {
        return None;
    }
    let term = Term::new(buf.get_u64_le());
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return None;
    }
    let addr_bytes = buf.copy_to_bytes(len);
    let addr = std::str::from_utf8(&addr_bytes).ok()?;
    Some(Some(ConsensusHost::new(term, PeerAddress::new(addr))))
}

/// Durable storage for the hard consensus state.
pub trait VoteStore: Send {
    /// Persists the state. Must be durable when this returns `Ok`.
    ///
    /// # Errors
    /// Returns an error if the state could not be made durable.
    fn save(&mut self, state: &VoteState) -> StorageResult<()>;

    /// Loads the persisted state, or `None` on a fresh start.
    ///
    /// # Errors
    /// Returns an error if stored state exists but cannot be read.
    fn load(&self) -> StorageResult<Option<VoteState>>;
}

/// Durable storage for the replicated log.
pub trait LogStore: Send {
    /// Identity of the last stored edit, or the initial sentinel.
    fn last_edit(&self) -> EditId;

    /// Term of the entry at `index`, if stored.
    fn term_at(&self, index: u64) -> Option<Term>;

    /// Appends one entry. Indexes must be strictly sequential.
    ///
    /// # Errors
    /// Returns an error on a sequence violation or I/O failure.
    fn append(&mut self, edit: EditId, payload: Bytes) -> StorageResult<()>;

    /// Discards all entries with index greater than `last_to_keep`.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    fn truncate_after(&mut self, last_to_keep: u64) -> StorageResult<()>;

    /// Reads up to `max_count` entries starting at `from_index`.
    ///
    /// # Errors
    /// Returns an error if stored entries cannot be read.
    fn entries_from(&self, from_index: u64, max_count: usize)
        -> StorageResult<Vec<(EditId, Bytes)>>;

    /// Flushes appended entries to the storage medium.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    fn sync(&mut self) -> StorageResult<()>;
}

/// Read-side export of sealed, committed segments for reconciliation.
///
/// Serving peers' log-status and fetch queries only touches sealed files,
/// so exports are snapshot-consistent without quiescing the append tail.
pub trait LogExport {
    /// Advertises fully committed segments with entries past `min_index`.
    fn advertise(&self, min_index: u64, committed_index: u64) -> Vec<quill_log::LogFileInfo>;

    /// Reads the raw bytes of an advertised segment, if it exists.
    fn read_segment(&self, name: &str) -> Option<Bytes>;
}

/// File-backed [`VoteStore`].
///
/// The state is written to a temporary file, fsynced, and renamed over the
/// previous one, so a crash mid-write leaves the prior state intact. A
/// trailing CRC32 guards against torn renames on filesystems without
/// atomic rename durability.
pub struct FileVoteStore {
    path: PathBuf,
}

impl FileVoteStore {
    /// Creates a store writing to `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl VoteStore for FileVoteStore {
    fn save(&mut self, state: &VoteState) -> StorageResult<()> {
        let body = state.encode();
        let mut buf = BytesMut::with_capacity(body.len() + 4);
        buf.put_slice(&body);
        buf.put_u32_le(crc32fast::hash(&body));

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io("create", e))?;
        file.write_all(&buf)
            .map_err(|e| StorageError::io("write", e))?;
        file.sync_data().map_err(|e| StorageError::io("sync", e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::io("rename", e))?;
        Ok(())
    }

    fn load(&self) -> StorageResult<Option<VoteState>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io("read", e)),
        };
        if data.len() < 4 {
            return Err(StorageError::Corruption {
                message: "vote state file too short".to_string(),
            });
        }
        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().unwrap_or_default());
        if crc32fast::hash(body) != stored {
            return Err(StorageError::Corruption {
                message: "vote state checksum mismatch".to_string(),
            });
        }
        let mut buf = Bytes::copy_from_slice(body);
        VoteState::decode(&mut buf)
            .map(Some)
            .ok_or_else(|| StorageError::Corruption {
                message: "vote state undecodable".to_string(),
            })
    }
}

/// In-memory [`VoteStore`] for tests and simulation.
///
/// `fail_next_save` lets tests exercise the durable-write failure path.
#[derive(Debug, Default)]
pub struct MemoryVoteStore {
    state: Option<VoteState>,
    /// When true, the next `save` fails once.
    pub fail_next_save: bool,
}

impl MemoryVoteStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoteStore for MemoryVoteStore {
    fn save(&mut self, state: &VoteState) -> StorageResult<()> {
        if self.fail_next_save {
            self.fail_next_save = false;
            return Err(StorageError::io("save", "injected failure"));
        }
        self.state = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> StorageResult<Option<VoteState>> {
        Ok(self.state.clone())
    }
}

/// In-memory [`LogStore`] for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    entries: Vec<(EditId, Bytes)>,
    terms: HashMap<u64, Term>,
    first_index: u64,
}

impl MemoryLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn last_edit(&self) -> EditId {
        self.entries.last().map_or_else(EditId::initial, |(e, _)| *e)
    }

    fn term_at(&self, index: u64) -> Option<Term> {
        self.terms.get(&index).copied()
    }

    fn append(&mut self, edit: EditId, payload: Bytes) -> StorageResult<()> {
        let expected = if self.entries.is_empty() {
            self.first_index = edit.index;
            edit.index
        } else {
            self.last_edit().index + 1
        };
        if edit.index != expected {
            return Err(StorageError::Corruption {
                message: format!(
                    "non-sequential append: expected {expected}, got {}",
                    edit.index
                ),
            });
        }
        self.terms.insert(edit.index, edit.term);
        self.entries.push((edit, payload));
        Ok(())
    }

    fn truncate_after(&mut self, last_to_keep: u64) -> StorageResult<()> {
        self.entries.retain(|(e, _)| e.index <= last_to_keep);
        self.terms.retain(|index, _| *index <= last_to_keep);
        Ok(())
    }

    fn entries_from(
        &self,
        from_index: u64,
        max_count: usize,
    ) -> StorageResult<Vec<(EditId, Bytes)>> {
        Ok(self
            .entries
            .iter()
            .filter(|(e, _)| e.index >= from_index)
            .take(max_count)
            .cloned()
            .collect())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

impl LogExport for MemoryLogStore {
    fn advertise(&self, _min_index: u64, _committed_index: u64) -> Vec<quill_log::LogFileInfo> {
        Vec::new() // Nothing on disk to offer.
    }

    fn read_segment(&self, _name: &str) -> Option<Bytes> {
        None
    }
}
