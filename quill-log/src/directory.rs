//! Multi-segment log directory for one quorum.
//!
//! Layout:
//!
//! ```text
//! /<log-dir>/
//!   log-1-1.qlog     # term 1, first index 1 (sealed)
//!   log-1-513.qlog   # term 1, first index 513 (sealed)
//!   log-3-901.qlog   # term 3, first index 901 (active)
//! ```
//!
//! A segment holds entries of exactly one term, so rotation happens on
//! term change as well as on the size limit. The segment with the highest
//! first index is the active one; all writes go through it. The directory
//! keeps an index-to-offset map for the active segment so truncation can
//! land exactly on a previously returned append offset.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use quill_core::{EditId, Term, SEGMENT_BYTES_MAX};
use tracing::{debug, info, warn};

use crate::entry::FILE_HEADER_SIZE;
use crate::error::{LogError, LogResult};
use crate::info::LogFileInfo;
use crate::reader::LogReader;
use crate::writer::LogWriter;

/// Metadata of a sealed (read-only) segment.
#[derive(Debug, Clone)]
struct SealedMeta {
    name: String,
    path: PathBuf,
    term: Term,
    first_index: u64,
    last_index: u64,
}

/// The active segment: its writer plus the index-to-offset map.
struct ActiveSegment {
    writer: LogWriter,
    name: String,
    term: Term,
    first_index: u64,
    /// Byte offset of each entry's record, by index.
    offsets: BTreeMap<u64, u64>,
}

impl ActiveSegment {
    fn last_index(&self) -> Option<u64> {
        self.writer.last_index()
    }
}

/// Segmented log storage for one quorum.
pub struct SegmentDirectory {
    dir: PathBuf,
    sealed: Vec<SealedMeta>,
    active: Option<ActiveSegment>,
}

impl SegmentDirectory {
    /// Opens (or creates) a log directory and recovers its segments.
    ///
    /// The newest segment is reopened for appending after truncating any
    /// torn tail; older segments are sealed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or a segment
    /// header is unreadable.
    pub fn open(dir: impl AsRef<Path>) -> LogResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| LogError::io("create log dir", e))?;

        let mut files: Vec<(u64, PathBuf, String)> = Vec::new();
        let listing = fs::read_dir(&dir).map_err(|e| LogError::io("list log dir", e))?;
        for item in listing {
            let item = item.map_err(|e| LogError::io("list log dir", e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if let Some((_, first_index)) = parse_segment_name(&name) {
                files.push((first_index, item.path(), name));
            }
        }
        files.sort_by_key(|(first, _, _)| *first);

        let mut store = Self {
            dir,
            sealed: Vec::new(),
            active: None,
        };

        let count = files.len();
        for (pos, (_, path, name)) in files.into_iter().enumerate() {
            let recovered = LogReader::recover(&path)?;
            let Some(last_index) = recovered.last_index() else {
                // An empty segment carries no entries; drop it.
                warn!(name = %name, "removing empty segment during recovery");
                fs::remove_file(&path).map_err(|e| LogError::io("remove segment", e))?;
                continue;
            };

            if pos + 1 == count {
                // Newest segment becomes active again.
                let mut offsets = BTreeMap::new();
                let mut offset = FILE_HEADER_SIZE;
                for entry in &recovered.entries {
                    offsets.insert(entry.index, offset);
                    offset += entry.encoded_size();
                }
                let writer = LogWriter::reopen(
                    &path,
                    recovered.header,
                    recovered.valid_length,
                    Some(last_index),
                )?;
                store.active = Some(ActiveSegment {
                    writer,
                    name,
                    term: recovered.header.term,
                    first_index: recovered.header.start_index,
                    offsets,
                });
            } else {
                store.sealed.push(SealedMeta {
                    name,
                    path,
                    term: recovered.header.term,
                    first_index: recovered.header.start_index,
                    last_index,
                });
            }
        }

        info!(
            dir = %store.dir.display(),
            sealed = store.sealed.len(),
            active = store.active.is_some(),
            "opened log directory"
        );
        Ok(store)
    }

    /// The identity of the last stored edit, or the initial sentinel.
    #[must_use]
    pub fn last_edit(&self) -> EditId {
        if let Some(active) = &self.active {
            if let Some(last) = active.last_index() {
                return EditId::new(active.term, last);
            }
        }
        self.sealed
            .last()
            .map_or_else(EditId::initial, |meta| {
                EditId::new(meta.term, meta.last_index)
            })
    }

    /// Current end position of the active segment, if one is open.
    #[must_use]
    pub fn current_position(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.writer.current_position())
    }

    /// Term of the segment containing `index`, if stored.
    #[must_use]
    pub fn term_at(&self, index: u64) -> Option<Term> {
        if let Some(active) = &self.active {
            if index >= active.first_index && active.offsets.contains_key(&index) {
                return Some(active.term);
            }
        }
        self.sealed
            .iter()
            .find(|m| m.first_index <= index && index <= m.last_index)
            .map(|m| m.term)
    }

    /// Appends one entry, rotating segments on term change or size limit.
    ///
    /// Returns the byte offset the record starts at within its segment.
    ///
    /// # Errors
    /// Returns `NonSequentialAppend` if `index` does not extend the log by
    /// exactly one, or an I/O error.
    pub fn append(&mut self, term: Term, index: u64, payload: Bytes) -> LogResult<u64> {
        let last = self.last_edit();
        let expected = if last == EditId::initial() && self.active.is_none() {
            index // First ever append fixes the log's starting index.
        } else {
            last.index + 1
        };
        if index != expected {
            return Err(LogError::NonSequentialAppend {
                expected,
                actual: index,
            });
        }

        let needs_rotation = match &self.active {
            None => true,
            Some(active) => {
                active.term != term
                    || active.writer.current_position() >= SEGMENT_BYTES_MAX
            }
        };
        if needs_rotation {
            self.rotate(term, index)?;
        }

        let active = self
            .active
            .as_mut()
            .unwrap_or_else(|| unreachable!("rotation installs an active segment"));
        let offset = active.writer.append(index, payload)?;
        active.offsets.insert(index, offset);
        Ok(offset)
    }

    /// Flushes the active segment to the storage medium.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> LogResult<()> {
        match &mut self.active {
            Some(active) => active.writer.sync(),
            None => Ok(()),
        }
    }

    /// Discards every entry with index greater than `last_to_keep`.
    ///
    /// Whole segments past the cut are deleted; the segment containing the
    /// cut is truncated at the recorded entry offset, so the file length
    /// lands exactly on a previously returned append offset.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn truncate_after(&mut self, last_to_keep: u64) -> LogResult<()> {
        // Drop whole segments that start past the cut.
        while let Some(active) = &self.active {
            if active.first_index > last_to_keep {
                let path = active.writer.path().to_path_buf();
                debug!(path = %path.display(), "removing segment past truncation point");
                self.active = None;
                fs::remove_file(&path).map_err(|e| LogError::io("remove segment", e))?;
                self.reactivate_newest_sealed()?;
            } else {
                break;
            }
        }

        let Some(active) = &mut self.active else {
            return Ok(());
        };

        match active.offsets.get(&(last_to_keep + 1)).copied() {
            Some(offset) => {
                active.writer.truncate(offset, Some(last_to_keep))?;
                active.offsets.split_off(&(last_to_keep + 1));
            }
            None => {
                // Nothing stored past the cut.
            }
        }
        Ok(())
    }

    /// Reads up to `max_count` entries starting at `from_index`.
    ///
    /// Each item is the entry's edit id and payload. Used by the leader's
    /// catch-up path and by reconciliation export.
    ///
    /// # Errors
    /// Returns an error if a segment cannot be read.
    pub fn entries_from(&self, from_index: u64, max_count: usize) -> LogResult<Vec<(EditId, Bytes)>> {
        let mut out = Vec::new();

        for meta in &self.sealed {
            if out.len() >= max_count || meta.last_index < from_index {
                continue;
            }
            for (index, payload) in LogReader::entries(&meta.path)? {
                if index >= from_index && out.len() < max_count {
                    out.push((EditId::new(meta.term, index), payload));
                }
            }
        }

        if let Some(active) = &self.active {
            if out.len() < max_count && active.last_index().is_some() {
                for (index, payload) in LogReader::entries(active.writer.path())? {
                    if index >= from_index && out.len() < max_count {
                        out.push((EditId::new(active.term, index), payload));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Advertises fully committed segments with entries past `min_index`.
    ///
    /// Only sealed segments whose last index is at or below
    /// `committed_index` are offered; the active tail may still contain
    /// uncommitted entries and is never advertised.
    #[must_use]
    pub fn advertise(&self, min_index: u64, committed_index: u64) -> Vec<LogFileInfo> {
        self.sealed
            .iter()
            .filter(|m| m.last_index > min_index && m.last_index <= committed_index)
            .map(|m| LogFileInfo::new(m.name.clone(), m.first_index, m.last_index, m.term))
            .collect()
    }

    /// Reads the raw bytes of an advertised segment by name.
    ///
    /// # Errors
    /// Returns `IndexOutOfBounds` for unknown names or an I/O error.
    pub fn read_segment(&self, name: &str) -> LogResult<Bytes> {
        let meta = self.sealed.iter().find(|m| m.name == name).ok_or(
            LogError::IndexOutOfBounds {
                index: 0,
                first: 0,
                last: 0,
            },
        )?;
        let data = fs::read(&meta.path).map_err(|e| LogError::io("read segment", e))?;
        Ok(Bytes::from(data))
    }

    /// Splices a fetched segment into the log as a sealed file.
    ///
    /// The segment must extend the log by exactly its advertised range:
    /// its first index has to be one past the local last index, which
    /// rejects both duplicate and out-of-order application. The bytes are
    /// re-validated before anything is written.
    ///
    /// # Errors
    /// Returns `NotSpliceable` if the segment does not extend the log, or
    /// a validation/I/O error.
    pub fn splice(&mut self, expected: &LogFileInfo, data: &Bytes) -> LogResult<()> {
        let local_last = self.last_edit().index;
        let splice_point = if self.last_edit() == EditId::initial() && self.active.is_none() {
            expected.first_index
        } else {
            local_last + 1
        };

        if expected.first_index != splice_point {
            return Err(LogError::NotSpliceable {
                name: expected.name.clone(),
                first_index: expected.first_index,
                local_last,
            });
        }

        // Validate the downloaded bytes before touching the directory.
        let tmp_path = self.dir.join(format!("{}.fetch", expected.name));
        fs::write(&tmp_path, data).map_err(|e| LogError::io("write fetched segment", e))?;
        let recovered = LogReader::recover(&tmp_path)?;
        let valid = recovered.header.term == expected.term
            && recovered.header.start_index == expected.first_index
            && recovered.last_index() == Some(expected.last_index)
            && recovered.valid_length == data.len() as u64;
        if !valid {
            fs::remove_file(&tmp_path).map_err(|e| LogError::io("remove fetched segment", e))?;
            return Err(LogError::InvalidHeader {
                reason: "fetched segment does not match its advertisement",
            });
        }

        // Seal the current active segment: the spliced file continues it.
        self.seal_active();

        let final_path = self.dir.join(&expected.name);
        fs::rename(&tmp_path, &final_path).map_err(|e| LogError::io("install segment", e))?;
        info!(name = %expected.name, "spliced fetched segment");

        self.sealed.push(SealedMeta {
            name: expected.name.clone(),
            path: final_path,
            term: expected.term,
            first_index: expected.first_index,
            last_index: expected.last_index,
        });
        Ok(())
    }

    /// Closes the active segment, leaving every segment sealed.
    pub fn seal_active(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(last_index) = active.last_index() {
                self.sealed.push(SealedMeta {
                    name: active.name,
                    path: active.writer.path().to_path_buf(),
                    term: active.term,
                    first_index: active.first_index,
                    last_index,
                });
            }
        }
    }

    /// Summaries of all segments, oldest first (diagnostics).
    ///
    /// # Errors
    /// Returns an error if a segment cannot be read.
    pub fn describe(&self) -> LogResult<Vec<crate::viewer::SegmentSummary>> {
        let mut out = Vec::new();
        for meta in &self.sealed {
            out.push(crate::viewer::LogFileViewer::summarize(&meta.path)?);
        }
        if let Some(active) = &self.active {
            out.push(crate::viewer::LogFileViewer::summarize(
                active.writer.path(),
            )?);
        }
        Ok(out)
    }

    fn rotate(&mut self, term: Term, start_index: u64) -> LogResult<()> {
        self.seal_active();

        let name = format!("log-{}-{}.qlog", term.get(), start_index);
        let path = self.dir.join(&name);
        let mut writer = LogWriter::create(&path)?;
        writer.write_file_header(term, start_index)?;

        debug!(name = %name, "rotated to new segment");
        self.active = Some(ActiveSegment {
            writer,
            name,
            term,
            first_index: start_index,
            offsets: BTreeMap::new(),
        });
        Ok(())
    }

    fn reactivate_newest_sealed(&mut self) -> LogResult<()> {
        let Some(meta) = self.sealed.pop() else {
            return Ok(());
        };

        let recovered = LogReader::recover(&meta.path)?;
        let mut offsets = BTreeMap::new();
        let mut offset = FILE_HEADER_SIZE;
        for entry in &recovered.entries {
            offsets.insert(entry.index, offset);
            offset += entry.encoded_size();
        }
        let writer = LogWriter::reopen(
            &meta.path,
            recovered.header,
            recovered.valid_length,
            recovered.last_index(),
        )?;
        self.active = Some(ActiveSegment {
            writer,
            name: meta.name,
            term: meta.term,
            first_index: meta.first_index,
            offsets,
        });
        Ok(())
    }
}

/// Parses `log-<term>-<firstIndex>.qlog` names.
fn parse_segment_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_prefix("log-")?.strip_suffix(".qlog")?;
    let (term, first) = stem.split_once('-')?;
    Some((term.parse().ok()?, first.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload(i: u64) -> Bytes {
        Bytes::from(format!("edit-{i}"))
    }

    #[test]
    fn test_append_and_last_edit() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        assert_eq!(store.last_edit(), EditId::initial());

        for i in 1..=5 {
            store.append(Term::new(1), i, payload(i)).unwrap();
        }

        assert_eq!(store.last_edit(), EditId::new(Term::new(1), 5));
        assert_eq!(store.term_at(3), Some(Term::new(1)));
        assert_eq!(store.term_at(9), None);
    }

    #[test]
    fn test_term_change_rotates_segment() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        store.append(Term::new(1), 1, payload(1)).unwrap();
        store.append(Term::new(1), 2, payload(2)).unwrap();
        store.append(Term::new(2), 3, payload(3)).unwrap();

        assert_eq!(store.term_at(2), Some(Term::new(1)));
        assert_eq!(store.term_at(3), Some(Term::new(2)));
        assert_eq!(store.describe().unwrap().len(), 2);
    }

    #[test]
    fn test_non_sequential_append_rejected() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();
        store.append(Term::new(1), 1, payload(1)).unwrap();

        let result = store.append(Term::new(1), 5, payload(5));
        assert!(matches!(result, Err(LogError::NonSequentialAppend { .. })));
    }

    #[test]
    fn test_truncate_within_active_segment() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        for i in 1..=5 {
            store.append(Term::new(1), i, payload(i)).unwrap();
        }
        store.truncate_after(3).unwrap();

        assert_eq!(store.last_edit(), EditId::new(Term::new(1), 3));

        // The log extends again from index 4.
        store.append(Term::new(2), 4, payload(4)).unwrap();
        assert_eq!(store.last_edit(), EditId::new(Term::new(2), 4));
    }

    #[test]
    fn test_truncate_across_segments() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        store.append(Term::new(1), 1, payload(1)).unwrap();
        store.append(Term::new(1), 2, payload(2)).unwrap();
        store.append(Term::new(2), 3, payload(3)).unwrap();
        store.append(Term::new(2), 4, payload(4)).unwrap();

        store.truncate_after(2).unwrap();
        assert_eq!(store.last_edit(), EditId::new(Term::new(1), 2));
    }

    #[test]
    fn test_truncate_reappend_identical_bytes() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        for i in 1..=3 {
            store.append(Term::new(1), i, payload(i)).unwrap();
        }
        store.sync().unwrap();
        let clean = fs::read(dir.path().join("log-1-1.qlog")).unwrap();

        store.append(Term::new(1), 4, payload(99)).unwrap();
        store.truncate_after(3).unwrap();
        store.sync().unwrap();

        let truncated = fs::read(dir.path().join("log-1-1.qlog")).unwrap();
        assert_eq!(clean, truncated);
    }

    #[test]
    fn test_recovery_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = SegmentDirectory::open(dir.path()).unwrap();
            store.append(Term::new(1), 1, payload(1)).unwrap();
            store.append(Term::new(1), 2, payload(2)).unwrap();
            store.append(Term::new(2), 3, payload(3)).unwrap();
            store.sync().unwrap();
        }

        let mut store = SegmentDirectory::open(dir.path()).unwrap();
        assert_eq!(store.last_edit(), EditId::new(Term::new(2), 3));

        // Appends continue from the recovered position.
        store.append(Term::new(2), 4, payload(4)).unwrap();
        assert_eq!(store.last_edit(), EditId::new(Term::new(2), 4));
    }

    #[test]
    fn test_entries_from_spans_segments() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        store.append(Term::new(1), 1, payload(1)).unwrap();
        store.append(Term::new(1), 2, payload(2)).unwrap();
        store.append(Term::new(2), 3, payload(3)).unwrap();

        let entries = store.entries_from(2, 16).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, EditId::new(Term::new(1), 2));
        assert_eq!(entries[1].0, EditId::new(Term::new(2), 3));

        let capped = store.entries_from(1, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_advertise_skips_uncommitted_and_active() {
        let dir = tempdir().unwrap();
        let mut store = SegmentDirectory::open(dir.path()).unwrap();

        store.append(Term::new(1), 1, payload(1)).unwrap();
        store.append(Term::new(1), 2, payload(2)).unwrap();
        store.append(Term::new(2), 3, payload(3)).unwrap(); // Seals term-1 segment.

        // Committed through index 2: only the sealed segment qualifies.
        let infos = store.advertise(0, 2);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].first_index, 1);
        assert_eq!(infos[0].last_index, 2);

        // Nothing new past index 2.
        assert!(store.advertise(2, 2).is_empty());
    }

    #[test]
    fn test_splice_extends_log() {
        let dir_a = tempdir().unwrap();
        let mut source = SegmentDirectory::open(dir_a.path()).unwrap();
        for i in 1..=4 {
            source.append(Term::new(1), i, payload(i)).unwrap();
        }
        source.append(Term::new(2), 5, payload(5)).unwrap(); // Seal term 1.
        source.sync().unwrap();

        let infos = source.advertise(0, 4);
        assert_eq!(infos.len(), 1);
        let data = source.read_segment(&infos[0].name).unwrap();

        let dir_b = tempdir().unwrap();
        let mut target = SegmentDirectory::open(dir_b.path()).unwrap();
        target.splice(&infos[0], &data).unwrap();

        assert_eq!(target.last_edit(), EditId::new(Term::new(1), 4));

        // Splicing the same segment again is rejected as a duplicate.
        let result = target.splice(&infos[0], &data);
        assert!(matches!(result, Err(LogError::NotSpliceable { .. })));
    }
}
