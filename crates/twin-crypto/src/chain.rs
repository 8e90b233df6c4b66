//! Back-link hashing for tamper-evident record chaining.
//!
//! Each non-anchor record stores a back-link computed from four fields of
//! its predecessor:
//!
//! ```text
//! backlink_n = SHA-256( hash256_{n-1} || header_{n-1} || payload_{n-1} || backlink_{n-1} )
//! ```
//!
//! Because the predecessor's own back-link is part of the input, the chain is
//! cumulative: altering any earlier record changes every link after it.
//!
//! The payload contributes its raw bytes. For UTF-8 payloads that is exactly
//! the byte sequence of the decoded text, so the two readings agree.

use sha2::{Digest, Sha256};

use crate::HexDigest;

/// The predecessor fields that feed a back-link, in hashing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSource<'a> {
    pub hash256: &'a str,
    pub header: &'a str,
    pub payload: &'a [u8],
    pub backlink: &'a str,
}

/// Computes the back-link a successor of `prev` must carry.
///
/// The concatenation order is part of the on-disk format; changing it breaks
/// every existing store.
pub fn backlink(prev: &LinkSource<'_>) -> HexDigest {
    let mut hasher = Sha256::new();
    hasher.update(prev.hash256.as_bytes());
    hasher.update(prev.header.as_bytes());
    hasher.update(prev.payload);
    hasher.update(prev.backlink.as_bytes());

    let digest: [u8; 32] = hasher.finalize().into();
    HexDigest::from_hex(hex::encode(digest))
}
