//! Durable [`LogStore`] backed by the segmented log directory.

use bytes::Bytes;
use quill_core::{EditId, Term};
use quill_log::{LogError, LogFileInfo, SegmentDirectory, SegmentSummary};

use crate::storage::{LogStore, StorageError, StorageResult};

/// Adapts a [`SegmentDirectory`] to the consensus engine's log seam.
///
/// Writes stay on the owning quorum's event loop; reconciliation export
/// reads sealed files through [`Self::advertise`] / [`Self::read_segment`]
/// without touching the active tail.
pub struct SegmentLogStore {
    dir: SegmentDirectory,
}

impl SegmentLogStore {
    /// Opens (or creates) the log directory for one quorum.
    ///
    /// # Errors
    /// Returns an error if the directory is unusable. An unwritable log
    /// directory is one of the few fatal conditions in the engine.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, LogError> {
        Ok(Self {
            dir: SegmentDirectory::open(path)?,
        })
    }

    /// Splices a fetched, validated segment into the log.
    ///
    /// # Errors
    /// Returns an error if the segment does not extend the log.
    pub fn splice(&mut self, info: &LogFileInfo, data: &Bytes) -> Result<(), LogError> {
        self.dir.splice(info, data)
    }

    /// Segment summaries for diagnostics.
    ///
    /// # Errors
    /// Returns an error if a segment cannot be read.
    pub fn describe(&self) -> Result<Vec<SegmentSummary>, LogError> {
        self.dir.describe()
    }
}

impl crate::storage::LogExport for SegmentLogStore {
    fn advertise(&self, min_index: u64, committed_index: u64) -> Vec<LogFileInfo> {
        self.dir.advertise(min_index, committed_index)
    }

    fn read_segment(&self, name: &str) -> Option<Bytes> {
        self.dir.read_segment(name).ok()
    }
}

fn storage_err(err: &LogError) -> StorageError {
    StorageError::Io {
        operation: "segment log",
        message: err.to_string(),
    }
}

impl LogStore for SegmentLogStore {
    fn last_edit(&self) -> EditId {
        self.dir.last_edit()
    }

    fn term_at(&self, index: u64) -> Option<Term> {
        self.dir.term_at(index)
    }

    fn append(&mut self, edit: EditId, payload: Bytes) -> StorageResult<()> {
        self.dir
            .append(edit.term, edit.index, payload)
            .map(|_offset| ())
            .map_err(|e| storage_err(&e))
    }

    fn truncate_after(&mut self, last_to_keep: u64) -> StorageResult<()> {
        self.dir
            .truncate_after(last_to_keep)
            .map_err(|e| storage_err(&e))
    }

    fn entries_from(
        &self,
        from_index: u64,
        max_count: usize,
    ) -> StorageResult<Vec<(EditId, Bytes)>> {
        self.dir
            .entries_from(from_index, max_count)
            .map_err(|e| storage_err(&e))
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.dir.sync().map_err(|e| storage_err(&e))
    }
}
