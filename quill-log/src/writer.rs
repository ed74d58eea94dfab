//! Append-side access to one segment file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use quill_core::Term;
use tracing::debug;

use crate::entry::{EntryRecord, FileHeader, FILE_HEADER_SIZE};
use crate::error::{LogError, LogResult};

/// Writes one segment file: a header followed by append-only entries.
///
/// Entries must be appended in strictly increasing index order. Every
/// append returns the byte offset the record starts at; `truncate` accepts
/// exactly those offsets (or the current position) and discards everything
/// at and after the given offset, which is how uncommitted tail entries
/// from a deposed leader are dropped.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    header: Option<FileHeader>,
    position: u64,
    last_index: Option<u64>,
}

impl LogWriter {
    /// Creates a writer over a fresh segment file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .map_err(|e| LogError::io("create segment", e))?;

        Ok(Self {
            file,
            path,
            header: None,
            position: 0,
            last_index: None,
        })
    }

    /// Reopens an existing segment file for appending.
    ///
    /// `valid_length` and `last_index` come from recovery (see
    /// [`crate::reader::LogReader::recover`]); bytes past `valid_length`
    /// are discarded.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or truncated.
    pub fn reopen(
        path: impl AsRef<Path>,
        header: FileHeader,
        valid_length: u64,
        last_index: Option<u64>,
    ) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| LogError::io("open segment", e))?;
        file.set_len(valid_length)
            .map_err(|e| LogError::io("truncate segment", e))?;

        let mut writer = Self {
            file,
            path,
            header: Some(header),
            position: valid_length,
            last_index,
        };
        writer
            .file
            .seek(SeekFrom::Start(valid_length))
            .map_err(|e| LogError::io("seek segment", e))?;
        writer.position = valid_length;
        Ok(writer)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The segment header, if one has been written.
    #[must_use]
    pub const fn header(&self) -> Option<FileHeader> {
        self.header
    }

    /// Index of the last appended entry, if any.
    #[must_use]
    pub const fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    /// Current end-of-file position in bytes.
    #[must_use]
    pub const fn current_position(&self) -> u64 {
        self.position
    }

    /// Writes the segment header. Must be the first write to the file.
    ///
    /// # Errors
    /// Returns an error if a header was already written or on I/O failure.
    pub fn write_file_header(&mut self, term: Term, start_index: u64) -> LogResult<()> {
        if self.header.is_some() || self.position != 0 {
            return Err(LogError::InvalidHeader {
                reason: "header already written",
            });
        }

        let header = FileHeader::new(term, start_index);
        let mut buf = BytesMut::with_capacity(FILE_HEADER_SIZE as usize);
        header.encode(&mut buf);
        self.file
            .write_all(&buf)
            .map_err(|e| LogError::io("write header", e))?;

        self.header = Some(header);
        self.position = FILE_HEADER_SIZE;
        Ok(())
    }

    /// Appends one entry and returns the byte offset its record starts at.
    ///
    /// # Errors
    /// Returns `NonSequentialAppend` if `index` is not exactly one past the
    /// previous entry (or the header's start index for the first entry),
    /// `InvalidHeader` if no header was written, or an I/O error.
    pub fn append(&mut self, index: u64, payload: Bytes) -> LogResult<u64> {
        let Some(header) = self.header else {
            return Err(LogError::InvalidHeader {
                reason: "append before header",
            });
        };

        let expected = self.last_index.map_or(header.start_index, |last| last + 1);
        if index != expected {
            return Err(LogError::NonSequentialAppend {
                expected,
                actual: index,
            });
        }

        let record = EntryRecord::new(index, payload)?;
        let mut buf = BytesMut::with_capacity(record.encoded_size() as usize);
        record.encode(&mut buf);

        let offset = self.position;
        self.file
            .write_all(&buf)
            .map_err(|e| LogError::io("append entry", e))?;
        self.position += buf.len() as u64;
        self.last_index = Some(index);
        Ok(offset)
    }

    /// Discards all bytes at and after `offset`.
    ///
    /// `offset` must be a value previously returned by [`Self::append`]
    /// (an entry boundary) or the current position; `new_last_index` is the
    /// index of the last entry that survives, or `None` if the truncation
    /// empties the segment.
    ///
    /// # Errors
    /// Returns `InvalidTruncateOffset` for offsets inside the header or
    /// past the end of the file, or an I/O error.
    pub fn truncate(&mut self, offset: u64, new_last_index: Option<u64>) -> LogResult<()> {
        if offset < FILE_HEADER_SIZE {
            return Err(LogError::InvalidTruncateOffset {
                offset,
                reason: "offset inside file header",
            });
        }
        if offset > self.position {
            return Err(LogError::InvalidTruncateOffset {
                offset,
                reason: "offset past end of file",
            });
        }

        self.file
            .set_len(offset)
            .map_err(|e| LogError::io("truncate", e))?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| LogError::io("seek after truncate", e))?;

        debug!(
            path = %self.path.display(),
            offset,
            "truncated segment tail"
        );

        self.position = offset;
        self.last_index = new_last_index;
        Ok(())
    }

    /// Flushes buffered data and metadata to the storage medium.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> LogResult<()> {
        self.file
            .sync_data()
            .map_err(|e| LogError::io("sync", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_then_appends() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path().join("seg.qlog")).unwrap();

        writer.write_file_header(Term::new(1), 10).unwrap();
        assert_eq!(writer.current_position(), FILE_HEADER_SIZE);

        let off1 = writer.append(10, Bytes::from("a")).unwrap();
        let off2 = writer.append(11, Bytes::from("bb")).unwrap();

        assert_eq!(off1, FILE_HEADER_SIZE);
        assert!(off2 > off1);
        assert_eq!(writer.last_index(), Some(11));
    }

    #[test]
    fn test_append_before_header_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path().join("seg.qlog")).unwrap();

        let result = writer.append(1, Bytes::from("x"));
        assert!(matches!(result, Err(LogError::InvalidHeader { .. })));
    }

    #[test]
    fn test_non_sequential_append_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path().join("seg.qlog")).unwrap();
        writer.write_file_header(Term::new(1), 1).unwrap();
        writer.append(1, Bytes::from("x")).unwrap();

        let result = writer.append(3, Bytes::from("y"));
        assert!(matches!(
            result,
            Err(LogError::NonSequentialAppend {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_truncate_restores_position() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path().join("seg.qlog")).unwrap();
        writer.write_file_header(Term::new(1), 1).unwrap();

        writer.append(1, Bytes::from("one")).unwrap();
        let off2 = writer.append(2, Bytes::from("two")).unwrap();
        writer.append(3, Bytes::from("three")).unwrap();

        writer.truncate(off2, Some(1)).unwrap();
        assert_eq!(writer.current_position(), off2);
        assert_eq!(writer.last_index(), Some(1));

        // Appending index 2 again succeeds at the same offset.
        let off2_again = writer.append(2, Bytes::from("two")).unwrap();
        assert_eq!(off2_again, off2);
    }

    #[test]
    fn test_truncate_inside_header_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = LogWriter::create(dir.path().join("seg.qlog")).unwrap();
        writer.write_file_header(Term::new(1), 1).unwrap();

        let result = writer.truncate(8, None);
        assert!(matches!(result, Err(LogError::InvalidTruncateOffset { .. })));
    }
}
