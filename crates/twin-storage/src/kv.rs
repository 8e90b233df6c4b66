//! Append-only packed key/value file.
//!
//! The [`PackedKv`] struct owns one data file of [`Entry`] frames and its
//! persisted [`PositionIndex`]. Entries are only ever appended; an entry's
//! ordinal is its position in insertion order.
//!
//! # File Layout
//!
//! ```text
//! {dir}/
//! ├── {name}.pydb   <- append-only entry frames
//! └── {name}.pidx   <- position index for O(1) lookups
//! ```
//!
//! # Shared Files
//!
//! Several handles, possibly in different processes, may point at the same
//! data file. [`PackedKv::refresh`] folds entries appended through other
//! handles into this handle's index. Mutual exclusion between writers is the
//! caller's responsibility.
//!
//! # Index Persistence
//!
//! The index file is written on [`PackedKv::sync`], on drop, and after a full
//! rebuild, never per append. An index that lags the data file is still
//! valid: it covers a prefix, and the rest is scanned on open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::entry::MAX_FRAME_SIZE;
use crate::{Entry, PositionIndex, StorageError};

/// Extension of the position index file.
pub const INDEX_EXTENSION: &str = "pidx";

/// Append-only key/value store over a single data file.
///
/// # Invariants
///
/// - Entries are append-only; existing bytes are never rewritten
/// - The index covers a prefix of the data file (`index.end() <= file length`)
/// - Bytes past `index.end()` are either entries not yet folded in by
///   [`Self::refresh`] or a torn tail left by an interrupted append
#[derive(Debug)]
pub struct PackedKv {
    data_path: PathBuf,
    index_path: PathBuf,
    file: File,
    index: PositionIndex,
    fsync: bool,
    /// A truncated frame sits at `index.end()`; cut it before appending.
    torn_tail: bool,
    /// The in-memory index is ahead of the index file.
    dirty: bool,
}

impl PackedKv {
    /// Opens or creates the store whose data file is `data_path`.
    ///
    /// The index file is loaded when valid and rebuilt from the data file
    /// otherwise. When `fsync` is set every append is flushed to disk.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Io`] if the files cannot be opened or written
    /// - [`StorageError::CorruptedEntry`] if the data file has a bad frame
    ///   before its tail
    pub fn open(data_path: impl Into<PathBuf>, fsync: bool) -> Result<Self, StorageError> {
        let data_path = data_path.into();
        let index_path = data_path.with_extension(INDEX_EXTENSION);

        if let Some(parent) = data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&data_path)?;
        let data_len = file.metadata()?.len();

        let index = match PositionIndex::load(&index_path) {
            Ok(index) if index.end() <= data_len => Some(index),
            Ok(index) => {
                tracing::warn!(
                    path = %index_path.display(),
                    index_end = index.end(),
                    data_len,
                    "index covers more than the data file, rebuilding"
                );
                None
            }
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    path = %index_path.display(),
                    error = %e,
                    "index missing or corrupted, rebuilding from data file"
                );
                None
            }
        };

        let loaded = index.is_some();
        let mut kv = Self {
            data_path,
            index_path,
            file,
            index: index.unwrap_or_default(),
            fsync,
            torn_tail: false,
            dirty: false,
        };
        if loaded {
            kv.refresh()?;
        } else {
            kv.rebuild_index()?;
        }

        tracing::debug!(
            path = %kv.data_path.display(),
            entries = kv.index.len(),
            "opened packed store"
        );
        Ok(kv)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Number of complete entries known to this handle.
    pub fn size(&self) -> usize {
        self.index.len()
    }

    /// Folds entries appended by other handles into the index.
    ///
    /// Only the bytes past the indexed end are scanned. If the data file is
    /// shorter than the index claims, the index is rebuilt from scratch.
    /// Returns the number of newly indexed entries.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptedEntry`] if a new frame is damaged.
    pub fn refresh(&mut self) -> Result<usize, StorageError> {
        let data_len = self.file.metadata()?.len();

        if data_len < self.index.end() {
            tracing::warn!(
                path = %self.data_path.display(),
                index_end = self.index.end(),
                data_len,
                "data file shrank below indexed end, rebuilding index"
            );
            let before = self.index.len();
            self.rebuild_index()?;
            return Ok(self.index.len().saturating_sub(before));
        }

        if data_len == self.index.end() {
            self.torn_tail = false;
            return Ok(0);
        }

        let added = self.scan_tail(data_len)?;
        self.dirty |= added > 0;
        Ok(added)
    }

    /// Rebuilds the position index by scanning the whole data file.
    ///
    /// This is the recovery path when the index file is missing or
    /// corrupted. The rebuilt index is saved for future opens.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptedEntry`] if any frame before the tail
    /// is invalid.
    pub fn rebuild_index(&mut self) -> Result<(), StorageError> {
        let data_len = self.file.metadata()?.len();

        self.index = PositionIndex::new();
        self.torn_tail = false;
        self.scan_tail(data_len)?;
        self.index.save(&self.index_path)?;
        self.dirty = false;

        Ok(())
    }

    /// Indexes every complete frame between `index.end()` and `data_len`.
    fn scan_tail(&mut self, data_len: u64) -> Result<usize, StorageError> {
        let start = self.index.end();
        let data = self.read_range(start, data_len)?;

        let mut pos = 0usize;
        let mut added = 0usize;
        while pos < data.len() {
            let position = start + pos as u64;
            match Entry::from_bytes(&data.slice(pos..), position) {
                Ok((_, consumed)) => {
                    self.index.append(position, position + consumed as u64);
                    pos += consumed;
                    added += 1;
                }
                Err(StorageError::UnexpectedEof) => {
                    if !is_torn_frame(&data.slice(pos..), position) {
                        return Err(StorageError::CorruptedEntry { position });
                    }
                    tracing::warn!(
                        path = %self.data_path.display(),
                        position,
                        trailing_bytes = data.len() - pos,
                        "torn entry at end of data file"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.torn_tail = pos < data.len();
        Ok(added)
    }

    /// Appends one entry and returns its ordinal.
    ///
    /// Entries appended through other handles are folded in first so the new
    /// entry lands after them. A torn tail is truncated away before writing.
    ///
    /// # Errors
    ///
    /// - [`StorageError::KeyTooLarge`] / [`StorageError::ValueTooLarge`]
    /// - [`StorageError::CorruptedEntry`] if unindexed bytes are damaged
    /// - [`StorageError::Io`] if the write fails
    pub fn append(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<usize, StorageError> {
        let entry = Entry::new(key, value)?;

        self.refresh()?;
        if self.torn_tail {
            tracing::warn!(
                path = %self.data_path.display(),
                truncate_to = self.index.end(),
                "truncating torn tail before append"
            );
            self.file.set_len(self.index.end())?;
            self.torn_tail = false;
        }

        let start = self.index.end();
        let frame = entry.to_bytes();

        self.file.write_all(&frame)?;
        if self.fsync {
            self.file.sync_data()?;
        }

        self.index.append(start, start + frame.len() as u64);
        self.dirty = true;

        Ok(self.index.len() - 1)
    }

    /// Reads the entry at ordinal `index`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::IndexOutOfRange`] if `index >= size()`
    /// - [`StorageError::CorruptedEntry`] / [`StorageError::UnexpectedEof`]
    ///   if the stored frame is damaged
    pub fn get(&self, index: usize) -> Result<Entry, StorageError> {
        let (start, end) = self
            .index
            .span(index)
            .ok_or(StorageError::IndexOutOfRange {
                index,
                size: self.index.len(),
            })?;

        let data = self.read_range(start, end)?;
        let (entry, consumed) = Entry::from_bytes(&data, start)?;

        if consumed as u64 != end - start {
            return Err(StorageError::CorruptedEntry { position: start });
        }
        Ok(entry)
    }

    /// Finds the newest entry whose key equals `key`.
    ///
    /// # Errors
    ///
    /// Propagates read and corruption errors hit while scanning.
    pub fn find_key(&self, key: &[u8]) -> Result<Option<usize>, StorageError> {
        for index in (0..self.index.len()).rev() {
            if self.get(index)?.key().as_ref() == key {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Flushes the data file to disk, then persists the index if it moved.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        self.save_index()
    }

    fn save_index(&mut self) -> Result<(), StorageError> {
        if self.dirty {
            self.index.save(&self.index_path)?;
            self.dirty = false;
        }
        Ok(())
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Bytes, StorageError> {
        debug_assert!(start <= end, "inverted range {start}..{end}");

        let len = usize::try_from(end - start).map_err(|_| StorageError::UnexpectedEof)?;
        let mut buf = vec![0u8; len];

        let mut file = &self.file;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => StorageError::UnexpectedEof,
            _ => StorageError::Io(e),
        })?;

        Ok(buf.into())
    }
}

impl Drop for PackedKv {
    fn drop(&mut self) {
        if let Err(e) = self.save_index() {
            tracing::warn!(
                path = %self.index_path.display(),
                error = %e,
                "failed to persist index on drop"
            );
        }
    }
}

/// Whether `trailing` can be what an interrupted append leaves behind.
///
/// A torn append is the prefix of a single frame: shorter than the largest
/// frame, with no complete frame starting anywhere inside it. Anything else
/// means a length field before real data was damaged.
fn is_torn_frame(trailing: &Bytes, position: u64) -> bool {
    if trailing.len() >= MAX_FRAME_SIZE {
        return false;
    }
    (1..trailing.len()).all(|offset| {
        Entry::from_bytes(&trailing.slice(offset..), position + offset as u64).is_err()
    })
}
