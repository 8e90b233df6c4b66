//! Error types for packed key/value operations.

use std::io;

/// Errors that can occur during storage operations.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    /// The data was truncated (not enough bytes).
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// CRC mismatch - the entry data is corrupted.
    #[error("corrupted entry at byte {position}: CRC mismatch")]
    CorruptedEntry { position: u64 },

    /// Requested entry does not exist.
    #[error("entry index {index} out of range (size {size})")]
    IndexOutOfRange { index: usize, size: usize },

    /// Key length does not fit the frame's length field.
    #[error("key too large: {len} bytes exceeds maximum {max}")]
    KeyTooLarge { len: usize, max: usize },

    /// Value length does not fit the frame's length field.
    #[error("value too large: {len} bytes exceeds maximum {max}")]
    ValueTooLarge { len: usize, max: usize },

    /// Index file has invalid magic bytes
    #[error("invalid index magic bytes")]
    InvalidIndexMagic,

    /// Index file has unsupported version
    #[error("unsupported index version: {0}")]
    UnsupportedIndexVersion(u8),

    /// Index file checksum mismatch
    #[error("index checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    IndexChecksumMismatch { expected: u32, actual: u32 },

    /// Index file is truncated
    #[error("truncated index file: expected {expected} bytes, got {actual}")]
    IndexTruncated { expected: usize, actual: usize },

    /// Index file passed its checksum but describes an impossible layout
    #[error("index positions are not strictly increasing or exceed the covered end")]
    IndexInconsistent,
}
