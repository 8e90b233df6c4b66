//! Lower-case hex digests.
//!
//! Every digest stored in a record is kept as text: lower-case, no `0x`
//! prefix, full width. [`HexDigest`] carries that guarantee in the type.

use std::fmt::{self, Debug, Display};

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::CryptoError;

// ============================================================================
// Constants
// ============================================================================

/// Width of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Width of a hex-encoded MD5 digest.
pub const MD5_HEX_LENGTH: usize = 32;

// ============================================================================
// HexDigest
// ============================================================================

/// A digest rendered as lower-case hexadecimal text.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexDigest(String);

impl HexDigest {
    /// Parses an existing hex digest of the given width.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidLength`] if `text` is not `expected_len` characters
    /// - [`CryptoError::InvalidCharacter`] on anything outside `[0-9a-f]`
    pub fn parse(text: &str, expected_len: usize) -> Result<Self, CryptoError> {
        if text.len() != expected_len {
            return Err(CryptoError::InvalidLength {
                expected: expected_len,
                actual: text.len(),
            });
        }
        if let Some(bad) = text
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(CryptoError::InvalidCharacter(bad));
        }
        Ok(Self(text.to_owned()))
    }

    /// Wraps text already produced by `hex::encode`.
    pub(crate) fn from_hex(text: String) -> Self {
        debug_assert!(text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell digests apart in logs.
        write!(f, "HexDigest({}...)", &self.0[..self.0.len().min(16)])
    }
}

impl From<HexDigest> for String {
    fn from(value: HexDigest) -> Self {
        value.0
    }
}

impl PartialEq<str> for HexDigest {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for HexDigest {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ============================================================================
// Digest Functions
// ============================================================================

/// SHA-256 of `data` as 64 lower-case hex characters.
pub fn sha256_hex(data: &[u8]) -> HexDigest {
    let digest: [u8; 32] = Sha256::digest(data).into();
    let text = hex::encode(digest);

    debug_assert_eq!(text.len(), SHA256_HEX_LENGTH);
    HexDigest::from_hex(text)
}

/// MD5 of `data` as 32 lower-case hex characters.
///
/// Informational only; nothing in the chain depends on it.
pub fn md5_hex(data: &[u8]) -> HexDigest {
    let digest: [u8; 16] = Md5::digest(data).into();
    let text = hex::encode(digest);

    debug_assert_eq!(text.len(), MD5_HEX_LENGTH);
    HexDigest::from_hex(text)
}
