//! # twin-crypto: Hashing primitives for `TwinChain`
//!
//! This crate provides the digests used by the tamper-evident record chain:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`digest`] | Lower-case hex SHA-256 / MD5 digests ([`HexDigest`]) |
//! | [`chain`] | Back-link hash over a predecessor's link fields |
//!
//! ## Quick Start
//!
//! ```
//! use twin_crypto::{LinkSource, backlink, sha256_hex};
//!
//! let payload = b"Initial record, do not use.";
//! let hash256 = sha256_hex(payload);
//!
//! let link = backlink(&LinkSource {
//!     hash256: hash256.as_str(),
//!     header: "00000000-0000-1000-8000-000000000001",
//!     payload,
//!     backlink: "",
//! });
//! assert_eq!(link.as_str().len(), 64);
//! ```

pub mod chain;
pub mod digest;
pub mod error;

pub use chain::{LinkSource, backlink};
pub use digest::{HexDigest, MD5_HEX_LENGTH, SHA256_HEX_LENGTH, md5_hex, sha256_hex};
pub use error::CryptoError;
