//! Record identity and timestamps.
//!
//! Headers are version-1 (time-based) UUIDs in canonical hyphenated form.
//! The `now` field is a local wall-clock string; it is informational and
//! never feeds a hash.

use chrono::Local;
use uuid::{Uuid, Version};

use crate::error::{ChainError, Result};

/// Length of a canonical hyphenated UUID.
pub const HEADER_LENGTH: usize = 36;

/// Produces fresh version-1 headers for one store handle.
#[derive(Debug, Clone)]
pub struct HeaderGenerator {
    node_id: [u8; 6],
}

impl HeaderGenerator {
    /// Creates a generator with a random node id.
    ///
    /// The multicast bit is set so the id can never collide with a real MAC
    /// address (RFC 4122 §4.5).
    pub fn new() -> Self {
        let mut node_id: [u8; 6] = rand::random();
        node_id[0] |= 0x01;
        Self { node_id }
    }

    pub fn next_header(&self) -> String {
        Uuid::now_v1(&self.node_id).hyphenated().to_string()
    }
}

impl Default for HeaderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that `header` is a canonical hyphenated version-1 UUID.
///
/// # Errors
///
/// Returns [`ChainError::Validation`] naming the `header` field otherwise.
pub fn validate_header(header: &str) -> Result<()> {
    let invalid = |reason: String| ChainError::Validation {
        field: "header",
        reason,
    };

    if header.len() != HEADER_LENGTH {
        return Err(invalid(format!(
            "expected {HEADER_LENGTH} characters, got {}",
            header.len()
        )));
    }

    let uuid = Uuid::try_parse(header).map_err(|e| invalid(format!("{header:?}: {e}")))?;

    match uuid.get_version() {
        Some(Version::Mac) => Ok(()),
        _ => Err(invalid(format!(
            "{header:?} is UUID version {}, expected 1",
            uuid.get_version_num()
        ))),
    }
}

/// Local wall-clock time, microsecond precision.
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}
