//! Record codec: the canonical record layout and its hashes.
//!
//! A record is seven named fields, always packed in this order:
//!
//! ```text
//! header, protocol, now, payload, hash256, md5, backlink
//! ```
//!
//! `hash256` and `md5` cover the payload only. `backlink` covers the
//! predecessor's `hash256 || header || payload || backlink` and is empty for
//! the anchor. `now` and `protocol` are not hashed.

use bytes::Bytes;
use twin_crypto::{
    HexDigest, LinkSource, MD5_HEX_LENGTH, SHA256_HEX_LENGTH, backlink, md5_hex, sha256_hex,
};

use crate::error::CodecError;
use crate::packer::{Field, Packer, PackerError, Value};

/// Codec version recorded in every record.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Payload of the anchor record written into an empty store.
pub const ANCHOR_PAYLOAD: &[u8] = b"Initial record, do not use.";

pub const FIELD_HEADER: &str = "header";
pub const FIELD_PROTOCOL: &str = "protocol";
pub const FIELD_NOW: &str = "now";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_HASH256: &str = "hash256";
pub const FIELD_MD5: &str = "md5";
pub const FIELD_BACKLINK: &str = "backlink";

/// Field names in packing order.
pub const FIELD_ORDER: [&str; 7] = [
    FIELD_HEADER,
    FIELD_PROTOCOL,
    FIELD_NOW,
    FIELD_PAYLOAD,
    FIELD_HASH256,
    FIELD_MD5,
    FIELD_BACKLINK,
];

/// One entry of the chain, as decoded from storage.
///
/// Fields are kept exactly as stored; nothing here guarantees that the
/// hashes are correct. Use [`Record::payload_intact`] and
/// [`Record::links_to`] to check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub header: String,
    pub protocol: String,
    pub now: String,
    pub payload: Bytes,
    pub hash256: String,
    pub md5: String,
    pub backlink: String,
}

impl Record {
    /// Builds a record that follows `prev`, or an anchor when `prev` is `None`.
    pub fn build(prev: Option<&Record>, header: String, now: String, payload: Bytes) -> Self {
        Self {
            hash256: compute_hash256(&payload),
            md5: compute_md5(&payload),
            backlink: prev.map(compute_backlink).unwrap_or_default(),
            protocol: PROTOCOL_VERSION.to_owned(),
            header,
            now,
            payload,
        }
    }

    /// The fields a successor's back-link is computed from.
    pub fn link_source(&self) -> LinkSource<'_> {
        LinkSource {
            hash256: &self.hash256,
            header: &self.header,
            payload: &self.payload,
            backlink: &self.backlink,
        }
    }

    /// `true` when the stored `hash256` matches the stored payload.
    pub fn payload_intact(&self) -> bool {
        compute_hash256(&self.payload) == self.hash256
    }

    /// `true` when this record's back-link was computed from `prev`.
    pub fn links_to(&self, prev: &Record) -> bool {
        compute_backlink(prev) == self.backlink
    }

    /// The record as an ordered field list.
    pub fn to_fields(&self) -> Vec<Field> {
        vec![
            Field::text(FIELD_HEADER, self.header.as_str()),
            Field::text(FIELD_PROTOCOL, self.protocol.as_str()),
            Field::text(FIELD_NOW, self.now.as_str()),
            Field::bytes(FIELD_PAYLOAD, self.payload.clone()),
            Field::text(FIELD_HASH256, self.hash256.as_str()),
            Field::text(FIELD_MD5, self.md5.as_str()),
            Field::text(FIELD_BACKLINK, self.backlink.as_str()),
        ]
    }

    /// Rebuilds a record from a decoded field list.
    ///
    /// Field order is not checked; the set of names is.
    ///
    /// # Errors
    ///
    /// - [`CodecError::DuplicateField`] / [`CodecError::UnknownField`]
    /// - [`CodecError::MissingField`] if any of the seven is absent
    /// - [`CodecError::WrongType`] if `payload` is not bytes or a text field
    ///   is not text
    pub fn from_fields(fields: Vec<Field>) -> Result<Self, CodecError> {
        let mut slots: [Option<Value>; 7] = Default::default();

        for Field { name, value } in fields {
            let slot = FIELD_ORDER
                .iter()
                .position(|known| *known == name)
                .ok_or_else(|| CodecError::UnknownField(name.clone()))?;
            if slots[slot].is_some() {
                return Err(CodecError::DuplicateField(name));
            }
            slots[slot] = Some(value);
        }

        let [header, protocol, now, payload, hash256, md5, backlink] = slots;

        let record = Self {
            header: take_text(FIELD_HEADER, header)?,
            protocol: take_text(FIELD_PROTOCOL, protocol)?,
            now: take_text(FIELD_NOW, now)?,
            payload: match payload {
                Some(Value::Bytes(bytes)) => bytes,
                Some(Value::Str(_)) => {
                    return Err(CodecError::WrongType {
                        field: FIELD_PAYLOAD,
                        expected: "bytes",
                    });
                }
                None => return Err(CodecError::MissingField(FIELD_PAYLOAD)),
            },
            hash256: take_text(FIELD_HASH256, hash256)?,
            md5: take_text(FIELD_MD5, md5)?,
            backlink: take_text(FIELD_BACKLINK, backlink)?,
        };

        check_digest(FIELD_HASH256, &record.hash256, SHA256_HEX_LENGTH)?;
        check_digest(FIELD_MD5, &record.md5, MD5_HEX_LENGTH)?;
        // Only the anchor has no predecessor to link to.
        if !record.backlink.is_empty() {
            check_digest(FIELD_BACKLINK, &record.backlink, SHA256_HEX_LENGTH)?;
        }
        Ok(record)
    }
}

fn check_digest(field: &'static str, text: &str, width: usize) -> Result<(), CodecError> {
    HexDigest::parse(text, width)
        .map(drop)
        .map_err(|source| CodecError::Digest { field, source })
}

fn take_text(field: &'static str, value: Option<Value>) -> Result<String, CodecError> {
    match value {
        Some(Value::Str(text)) => Ok(text),
        Some(Value::Bytes(_)) => Err(CodecError::WrongType {
            field,
            expected: "text",
        }),
        None => Err(CodecError::MissingField(field)),
    }
}

// ============================================================================
// Codec Functions
// ============================================================================

/// Lower-case hex SHA-256 of the payload.
pub fn compute_hash256(payload: &[u8]) -> String {
    sha256_hex(payload).into_string()
}

/// Lower-case hex MD5 of the payload.
pub fn compute_md5(payload: &[u8]) -> String {
    md5_hex(payload).into_string()
}

/// The back-link a successor of `prev` must carry.
pub fn compute_backlink(prev: &Record) -> String {
    backlink(&prev.link_source()).into_string()
}

/// Builds and packs a new record; returns its header and the packed bytes.
///
/// # Errors
///
/// Returns [`PackerError`] if the packer rejects the record.
pub fn encode_new<P: Packer>(
    packer: &P,
    prev: Option<&Record>,
    header: String,
    now: String,
    payload: Bytes,
) -> Result<(String, Vec<u8>), PackerError> {
    let record = Record::build(prev, header, now, payload);
    let bytes = encode_fields(packer, &record)?;
    Ok((record.header, bytes))
}

/// Packs an existing record without recomputing anything.
pub fn encode_fields<P: Packer>(packer: &P, record: &Record) -> Result<Vec<u8>, PackerError> {
    packer.encode(&record.to_fields())
}

/// Unpacks stored bytes into a [`Record`].
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes do not decode or the field set is wrong.
pub fn parse<P: Packer>(packer: &P, data: &[u8]) -> Result<Record, CodecError> {
    Record::from_fields(packer.decode(data)?)
}
