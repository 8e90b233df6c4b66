//! # `TwinChain`
//!
//! Append-only, tamper-evident record store.
//!
//! Every record carries a SHA-256 of its payload and a back-link: a SHA-256
//! over its predecessor's hash, header, payload and back-link. Editing any
//! stored record breaks the link of the record after it. Records live in a
//! packed key/value file ([`twin_storage::PackedKv`]) keyed by their UUID-1
//! header, and every operation runs under a cross-process advisory lock.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Store                             │
//! │  ┌──────────┐   ┌──────────────┐   ┌───────────────────┐  │
//! │  │  Lock    │ → │ Record codec │ → │ PackedKv (.pydb)  │  │
//! │  │ (.ulock) │   │  + Packer    │   │  + index (.pidx)  │  │
//! │  └──────────┘   └──────────────┘   └───────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use twinchain::Store;
//!
//! # fn main() -> twinchain::Result<()> {
//! let mut store = Store::open("/tmp/ledger")?;
//! let index = store.append(b"hello")?;
//!
//! let (_header, payload) = store.get_payload(index)?;
//! assert_eq!(payload.as_ref(), b"hello");
//! assert!(store.verify_link(index)?);
//! assert!(store.verify_payload(index)?);
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod lock;
pub mod packer;
pub mod record;
mod stamp;
mod store;

pub use config::{DEFAULT_EXTENSION, StoreConfig};
pub use error::{ChainError, CodecError, Result};
pub use lock::{ChainLock, LOCK_EXTENSION, LockError, LockGuard};
pub use packer::{Field, FieldPacker, Packer, PackerError, Value};
pub use record::{ANCHOR_PAYLOAD, PROTOCOL_VERSION, Record};
pub use stamp::{HEADER_LENGTH, HeaderGenerator, local_timestamp, validate_header};
pub use store::{ChainReport, Store, resolve_data_path};

#[cfg(test)]
mod tests;
