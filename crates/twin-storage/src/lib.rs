//! twin-storage: Packed key/value storage for `TwinChain`
//!
//! This crate implements the append-only key/value file the record chain is
//! layered on. Values are opaque bytes; ordering is insertion order and
//! nothing is ever updated in place or deleted.
//!
//! # Entry Format
//!
//! Each entry is stored as:
//! ```text
//! [key_len:u32][value_len:u32][key:bytes][value:bytes][crc32:u32]
//!      4B            4B         variable    variable      4B
//! ```
//!
//! - **`key_len`** / **`value_len`**: sizes of the two byte strings
//! - **key**: lookup key (the chain stores the record header here)
//! - **value**: opaque value bytes
//! - **crc32**: checksum of all preceding bytes of the frame
//!
//! # Example
//!
//! ```ignore
//! use twin_storage::PackedKv;
//!
//! let mut kv = PackedKv::open("/data/ledger.pydb", true)?;
//! let ordinal = kv.append("key-1", "value-1")?;
//!
//! let entry = kv.get(ordinal)?;
//! assert_eq!(entry.value().as_ref(), b"value-1");
//! ```

mod entry;
mod error;
mod index;
mod kv;

pub use entry::{Entry, MAX_KEY_LENGTH, MAX_VALUE_LENGTH};
pub use error::StorageError;
pub use index::PositionIndex;
pub use kv::{INDEX_EXTENSION, PackedKv};
