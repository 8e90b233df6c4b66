//! Entry frame for the packed key/value file.
//!
//! Each entry is one key/value pair followed by a CRC32 of everything
//! before it in the frame.

use bytes::Bytes;

use crate::StorageError;

/// Fixed prefix: key_len(4) + value_len(4).
pub(crate) const FRAME_HEADER_SIZE: usize = 8;

/// Trailing checksum.
pub(crate) const CRC_SIZE: usize = 4;

/// Largest key accepted by [`Entry::new`].
pub const MAX_KEY_LENGTH: usize = 4 * 1024;

/// Largest value accepted by [`Entry::new`] (256 MiB).
pub const MAX_VALUE_LENGTH: usize = 256 * 1024 * 1024;

/// Largest frame [`Entry::to_bytes`] can produce.
pub(crate) const MAX_FRAME_SIZE: usize =
    FRAME_HEADER_SIZE + MAX_KEY_LENGTH + MAX_VALUE_LENGTH + CRC_SIZE;

/// A single key/value pair as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    key: Bytes,
    value: Bytes,
}

impl Entry {
    /// Creates an entry, rejecting keys or values the frame cannot carry.
    ///
    /// # Errors
    ///
    /// - [`StorageError::KeyTooLarge`] if the key exceeds [`MAX_KEY_LENGTH`]
    /// - [`StorageError::ValueTooLarge`] if the value exceeds [`MAX_VALUE_LENGTH`]
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<Self, StorageError> {
        let key = key.into();
        let value = value.into();

        if key.len() > MAX_KEY_LENGTH {
            return Err(StorageError::KeyTooLarge {
                len: key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        if value.len() > MAX_VALUE_LENGTH {
            return Err(StorageError::ValueTooLarge {
                len: value.len(),
                max: MAX_VALUE_LENGTH,
            });
        }

        Ok(Self { key, value })
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Splits the entry into `(key, value)`.
    pub fn into_parts(self) -> (Bytes, Bytes) {
        (self.key, self.value)
    }

    /// Size of the serialized frame in bytes.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.key.len() + self.value.len() + CRC_SIZE
    }

    /// Serializes the entry to bytes.
    ///
    /// Format: `[key_len:u32][value_len:u32][key][value][crc32:u32]`
    ///
    /// All integers are little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());

        // Lengths were bounded in `new`, so both fit in u32.
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        debug_assert_eq!(buf.len(), self.encoded_len());
        buf
    }

    /// Deserializes an entry from the start of `data`.
    ///
    /// `position` is the entry's byte position in the data file, used only
    /// for error reporting. Returns the entry and the number of bytes
    /// consumed. Key and value are zero-copy slices of `data`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnexpectedEof`] if the data ends inside the frame
    /// - [`StorageError::CorruptedEntry`] if a length exceeds its maximum or
    ///   the CRC doesn't match
    pub fn from_bytes(data: &Bytes, position: u64) -> Result<(Self, usize), StorageError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(StorageError::UnexpectedEof);
        }

        let key_len = read_u32(&data[0..4]) as usize;
        let value_len = read_u32(&data[4..8]) as usize;

        // No writer produces these lengths, so this is damage, not a short read.
        if key_len > MAX_KEY_LENGTH || value_len > MAX_VALUE_LENGTH {
            return Err(StorageError::CorruptedEntry { position });
        }

        let total_size = FRAME_HEADER_SIZE
            .checked_add(key_len)
            .and_then(|n| n.checked_add(value_len))
            .and_then(|n| n.checked_add(CRC_SIZE))
            .ok_or(StorageError::CorruptedEntry { position })?;
        let body_end = total_size - CRC_SIZE;
        if data.len() < total_size {
            return Err(StorageError::UnexpectedEof);
        }

        let stored_crc = read_u32(&data[body_end..total_size]);
        let computed_crc = crc32fast::hash(&data[0..body_end]);
        if stored_crc != computed_crc {
            return Err(StorageError::CorruptedEntry { position });
        }

        let key = data.slice(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + key_len);
        let value = data.slice(FRAME_HEADER_SIZE + key_len..body_end);

        Ok((Entry { key, value }, total_size))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}
