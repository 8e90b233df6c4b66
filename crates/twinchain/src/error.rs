//! Error types for chain operations.

use std::io;

use twin_crypto::CryptoError;
use twin_storage::StorageError;

use crate::lock::LockError;
use crate::packer::PackerError;

/// Convenience alias for chain results.
pub type Result<T, E = ChainError> = std::result::Result<T, E>;

/// Errors surfaced by [`crate::Store`] operations.
#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    /// Caller input failed a pre-check.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Filesystem error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    /// The cooperative lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Stored bytes could not be turned back into a record.
    #[error("undecodable record: {0}")]
    Codec(#[from] CodecError),

    /// A record could not be serialized.
    #[error("record serialization failed: {0}")]
    Packer(#[from] PackerError),

    /// A store invariant does not hold where it must.
    #[error("chain invariant violated: {0}")]
    Chain(String),

    /// No record exists at the requested index.
    #[error("record index {index} out of range (size {size})")]
    IndexOutOfRange { index: usize, size: usize },
}

/// Reasons a stored record fails to decode.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("missing field {0:?}")]
    MissingField(&'static str),

    #[error("duplicate field {0:?}")]
    DuplicateField(String),

    #[error("unexpected field {0:?}")]
    UnknownField(String),

    #[error("field {field:?} should hold {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    /// A stored digest is not lower-case hex of the right width.
    #[error("field {field:?} is not a valid digest: {source}")]
    Digest {
        field: &'static str,
        #[source]
        source: CryptoError,
    },

    #[error(transparent)]
    Packer(#[from] PackerError),

    /// The storage frame around the record is damaged.
    #[error("damaged frame: {0}")]
    Frame(#[source] StorageError),
}

impl From<StorageError> for ChainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => ChainError::Io(e),
            StorageError::IndexOutOfRange { index, size } => {
                ChainError::IndexOutOfRange { index, size }
            }
            StorageError::KeyTooLarge { len, max } => ChainError::Validation {
                field: "header",
                reason: format!("{len} bytes exceeds maximum {max}"),
            },
            StorageError::ValueTooLarge { len, max } => ChainError::Validation {
                field: "payload",
                reason: format!("encoded record of {len} bytes exceeds maximum {max}"),
            },
            other => ChainError::Codec(CodecError::Frame(other)),
        }
    }
}
