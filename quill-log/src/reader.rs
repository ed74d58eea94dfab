//! Read-side access to one segment file.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::warn;

use crate::entry::{EntryRecord, FileHeader, FILE_HEADER_SIZE};
use crate::error::{LogError, LogResult};

/// Outcome of scanning a segment file.
#[derive(Debug)]
pub struct RecoveredSegment {
    /// The segment header.
    pub header: FileHeader,
    /// Entries that passed checksum verification, in index order.
    pub entries: Vec<EntryRecord>,
    /// Length of the valid prefix of the file in bytes.
    ///
    /// Bytes past this length belong to a torn or corrupt trailing entry
    /// and are treated as if they were never written.
    pub valid_length: u64,
}

impl RecoveredSegment {
    /// Index of the last valid entry, if any.
    #[must_use]
    pub fn last_index(&self) -> Option<u64> {
        self.entries.last().map(|e| e.index)
    }
}

/// Reads and verifies segment files.
pub struct LogReader;

impl LogReader {
    /// Reads a whole segment file, verifying every entry.
    ///
    /// A torn or corrupt trailing entry ends the scan at the last valid
    /// entry boundary; this is the truncate-equivalent recovery path, not
    /// an error. Corruption in the header itself is unrecoverable and
    /// surfaces as `InvalidHeader`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or its header is
    /// invalid.
    pub fn recover(path: impl AsRef<Path>) -> LogResult<RecoveredSegment> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| LogError::io("read segment", e))?;
        Self::parse(Bytes::from(data))
    }

    /// Parses segment bytes that are not (yet) on disk, e.g. a segment
    /// downloaded from a peer. Same semantics as [`Self::recover`].
    ///
    /// # Errors
    /// Returns an error if the header is invalid.
    pub fn parse(mut buf: Bytes) -> LogResult<RecoveredSegment> {
        let header = FileHeader::decode(&mut buf)?;

        let mut entries = Vec::new();
        let mut offset = FILE_HEADER_SIZE;
        let mut expected_index = header.start_index;

        while !buf.is_empty() {
            match EntryRecord::decode(&mut buf, offset) {
                Ok(record) => {
                    if record.index != expected_index {
                        warn!(
                            offset,
                            expected = expected_index,
                            actual = record.index,
                            "out-of-sequence entry ends recovery"
                        );
                        break;
                    }
                    offset += record.encoded_size();
                    expected_index += 1;
                    entries.push(record);
                }
                Err(err) if err.is_torn_tail() || err.is_corruption() => {
                    warn!(
                        offset,
                        error = %err,
                        "discarding invalid segment tail"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(RecoveredSegment {
            header,
            entries,
            valid_length: offset,
        })
    }

    /// Iterates `(index, payload)` pairs of a segment file.
    ///
    /// Convenience over [`Self::recover`] for read paths that only need
    /// the entry stream.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or its header is
    /// invalid.
    pub fn entries(path: impl AsRef<Path>) -> LogResult<Vec<(u64, Bytes)>> {
        let recovered = Self::recover(path)?;
        Ok(recovered
            .entries
            .into_iter()
            .map(|e| (e.index, e.payload))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::LogWriter;
    use quill_core::Term;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_segment(path: &Path, term: u64, start: u64, count: u64) {
        let mut writer = LogWriter::create(path).unwrap();
        writer.write_file_header(Term::new(term), start).unwrap();
        for i in start..start + count {
            writer
                .append(i, Bytes::from(format!("payload-{i}")))
                .unwrap();
        }
        writer.sync().unwrap();
    }

    #[test]
    fn test_recover_clean_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.qlog");
        write_segment(&path, 3, 10, 5);

        let recovered = LogReader::recover(&path).unwrap();
        assert_eq!(recovered.header.term, Term::new(3));
        assert_eq!(recovered.header.start_index, 10);
        assert_eq!(recovered.entries.len(), 5);
        assert_eq!(recovered.last_index(), Some(14));
    }

    #[test]
    fn test_recover_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.qlog");
        write_segment(&path, 1, 1, 3);

        // Simulate a torn write: append half an entry by hand.
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&7u64.to_le_bytes()).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        drop(file);

        let recovered = LogReader::recover(&path).unwrap();
        assert_eq!(recovered.entries.len(), 3);
        assert_eq!(recovered.last_index(), Some(3));
        // Valid length excludes the torn bytes.
        assert!(recovered.valid_length < fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_recover_corrupt_tail_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.qlog");
        write_segment(&path, 1, 1, 3);

        // Flip a byte in the last entry's payload.
        let mut data = fs::read(&path).unwrap();
        let len = data.len();
        data[len - 6] ^= 0xFF;
        fs::write(&path, data).unwrap();

        let recovered = LogReader::recover(&path).unwrap();
        assert_eq!(recovered.entries.len(), 2);
        assert_eq!(recovered.last_index(), Some(2));
    }

    #[test]
    fn test_entries_iteration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.qlog");
        write_segment(&path, 2, 5, 3);

        let entries = LogReader::entries(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, 5);
        assert_eq!(entries[2].0, 7);
        assert_eq!(entries[1].1, Bytes::from("payload-6"));
    }

    #[test]
    fn test_recover_rejects_headerless_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.qlog");
        fs::write(&path, b"short").unwrap();

        let result = LogReader::recover(&path);
        assert!(matches!(result, Err(LogError::InvalidHeader { .. })));
    }
}
