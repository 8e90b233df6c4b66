//! Position index for O(1) entry lookups.
//!
//! The [`PositionIndex`] maps an entry's ordinal to its byte span in the
//! data file, so any entry can be read with a single positioned read.
//!
//! # File Format
//!
//! The index is persisted next to the data file:
//! ```text
//! store.pydb   <- append-only entries
//! store.pidx   <- position index
//! ```
//!
//! Binary format:
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  Offset  │  Size  │  Description                │
//! ├─────────────────────────────────────────────────┤
//! │  0       │  4     │  Magic bytes: "TWXI"        │
//! │  4       │  1     │  Version: 0x01              │
//! │  5       │  3     │  Reserved (zero padding)    │
//! │  8       │  8     │  Entry count (u64 LE)       │
//! │  16      │  8     │  Covered data end (u64 LE)  │
//! │  24      │  8*N   │  Positions array [u64; N]   │
//! │  24+8*N  │  4     │  CRC32 of bytes 0..(24+8*N) │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Recovery
//!
//! [`PositionIndex::save`] writes a sibling temp file and renames it over the
//! index, so readers see either the old index or the new one.
//!
//! A missing or invalid index is never fatal: the data file is the source of
//! truth and the index is rebuilt by scanning it.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::StorageError;

// ============================================================================
// File Format Constants
// ============================================================================

const MAGIC: &[u8; 4] = b"TWXI";
const VERSION: u8 = 0x01;
const RESERVED: [u8; 3] = [0u8; 3];

const MAGIC_SIZE: usize = 4;
const VERSION_SIZE: usize = 1;
const RESERVED_SIZE: usize = 3;
const COUNT_SIZE: usize = 8; // u64
const END_SIZE: usize = 8; // u64
const POSITION_SIZE: usize = 8; // u64
const CRC_SIZE: usize = 4; // u32

/// magic(4) + version(1) + reserved(3) + count(8) + end(8) = 24 bytes
const HEADER_SIZE: usize = MAGIC_SIZE + VERSION_SIZE + RESERVED_SIZE + COUNT_SIZE + END_SIZE;

/// Maps entry ordinal → byte span in the data file.
///
/// # Invariants
///
/// - `positions[i]` is the byte position where entry `i` starts
/// - Positions are strictly increasing
/// - `end` is past the last indexed entry, and `end == 0` iff the index is empty
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PositionIndex {
    positions: Vec<u64>,
    end: u64,
}

impl PositionIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry spanning `start..end`.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `start` is not the current end of the index or
    /// the span is empty.
    pub fn append(&mut self, start: u64, end: u64) {
        debug_assert_eq!(start, self.end, "entries must be contiguous");
        debug_assert!(end > start, "entry span must be non-empty");

        self.positions.push(start);
        self.end = end;
    }

    /// Byte span of entry `index`, or `None` past the end.
    #[must_use]
    pub fn span(&self, index: usize) -> Option<(u64, u64)> {
        let start = *self.positions.get(index)?;
        let end = self.positions.get(index + 1).copied().unwrap_or(self.end);
        Some((start, end))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Byte position just past the last indexed entry.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Persists the index to disk with a CRC32 trailer, replacing any
    /// previous index file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be written or renamed.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let positions_size = self.positions.len() * POSITION_SIZE;
        let total_size = HEADER_SIZE + positions_size + CRC_SIZE;
        let mut buf: Vec<u8> = Vec::with_capacity(total_size);

        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&[VERSION]);
        buf.extend_from_slice(&RESERVED);
        buf.extend_from_slice(&(self.positions.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.end.to_le_bytes());

        for pos in &self.positions {
            buf.extend_from_slice(&pos.to_le_bytes());
        }

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        debug_assert_eq!(buf.len(), total_size, "buffer size mismatch");

        let scratch = scratch_path(path);
        if let Err(e) = write_and_rename(&scratch, path, &buf) {
            let _ = fs::remove_file(&scratch);
            return Err(e.into());
        }

        Ok(())
    }

    /// Loads an index from disk.
    ///
    /// Validates magic bytes, version, CRC32 and position ordering before
    /// returning.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Io`] - File cannot be read
    /// - [`StorageError::InvalidIndexMagic`] - Magic bytes don't match
    /// - [`StorageError::UnsupportedIndexVersion`] - Version not supported
    /// - [`StorageError::IndexTruncated`] - File is smaller than expected
    /// - [`StorageError::IndexChecksumMismatch`] - CRC32 verification failed
    /// - [`StorageError::IndexInconsistent`] - positions are not a valid layout
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let data = fs::read(path)?;

        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(StorageError::IndexTruncated {
                expected: HEADER_SIZE + CRC_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..MAGIC_SIZE] != MAGIC {
            return Err(StorageError::InvalidIndexMagic);
        }

        let version = data[MAGIC_SIZE];
        if version != VERSION {
            return Err(StorageError::UnsupportedIndexVersion(version));
        }

        let count_start = MAGIC_SIZE + VERSION_SIZE + RESERVED_SIZE;
        let count = read_u64(&data[count_start..count_start + COUNT_SIZE]) as usize;
        let end_start = count_start + COUNT_SIZE;
        let end = read_u64(&data[end_start..end_start + END_SIZE]);

        let positions_size = count.saturating_mul(POSITION_SIZE);
        let expected_size = HEADER_SIZE.saturating_add(positions_size).saturating_add(CRC_SIZE);
        if data.len() < expected_size {
            return Err(StorageError::IndexTruncated {
                expected: expected_size,
                actual: data.len(),
            });
        }

        // Verify CRC32 before trusting any data
        let crc_start = HEADER_SIZE + positions_size;
        let stored_crc = u32::from_le_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let computed_crc = crc32fast::hash(&data[0..crc_start]);
        if stored_crc != computed_crc {
            return Err(StorageError::IndexChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let positions: Vec<u64> = data[HEADER_SIZE..crc_start]
            .chunks_exact(POSITION_SIZE)
            .map(read_u64)
            .collect();

        // A well-formed checksum over nonsense positions is still nonsense.
        let ordered = positions.windows(2).all(|w| w[0] < w[1])
            && positions.first().is_none_or(|&first| first == 0)
            && positions.last().is_none_or(|&last| last < end)
            && (positions.is_empty() == (end == 0));
        if !ordered {
            return Err(StorageError::IndexInconsistent);
        }

        Ok(Self { positions, end })
    }
}

fn write_and_rename(scratch: &Path, path: &Path, buf: &[u8]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(scratch)?);
    writer.write_all(buf)?;
    writer.flush()?;
    fs::rename(scratch, path)
}

/// Unique temp name next to `path`; handles in other threads or processes
/// may be saving the same index.
fn scratch_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(
        ".{}.{}.tmp",
        process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
