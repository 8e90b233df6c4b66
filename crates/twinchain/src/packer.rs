//! Symmetric binary serializer for named field lists.
//!
//! The record codec never touches bytes directly; it hands an ordered list of
//! [`Field`]s to a [`Packer`] and gets the same list back on decode.
//!
//! # Wire Format
//!
//! ```text
//! [version:u8][count:u16]
//! repeated count times:
//!     [name_len:u8][name:utf8][tag:u8][value_len:u32][value]
//! ```
//!
//! All integers are little-endian. `tag` is `b's'` for UTF-8 text and
//! `b'b'` for raw bytes.

use bytes::Bytes;

/// Version byte written by [`FieldPacker`].
pub const PACKER_VERSION: u8 = 0x01;

const TAG_STR: u8 = b's';
const TAG_BYTES: u8 = b'b';

const MAX_NAME_LENGTH: usize = u8::MAX as usize;
const MAX_FIELDS: usize = u16::MAX as usize;
const MAX_VALUE_LENGTH: usize = u32::MAX as usize;

/// A single packed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Str(String),
    Bytes(Bytes),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Value::Str(_) => TAG_STR,
            Value::Bytes(_) => TAG_BYTES,
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Value::Str(s) => s.as_bytes(),
            Value::Bytes(b) => b,
        }
    }
}

/// A named value in an ordered field list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Str(value.into()),
        }
    }

    pub fn bytes(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: Value::Bytes(value.into()),
        }
    }
}

/// Errors from encoding or decoding a field list.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PackerError {
    #[error("unsupported packer version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("truncated input: needed {needed} bytes at position {position}")]
    Truncated { needed: usize, position: usize },

    #[error("unknown value tag {tag:#04x} for field {field:?}")]
    UnknownTag { tag: u8, field: String },

    #[error("{what} is not valid UTF-8")]
    InvalidUtf8 { what: String },

    #[error("{0} trailing bytes after last field")]
    TrailingBytes(usize),

    #[error("field name of {0} bytes is too long")]
    NameTooLong(usize),

    #[error("{0} fields exceed the per-record limit")]
    TooManyFields(usize),

    #[error("value of field {field:?} is too large ({len} bytes)")]
    ValueTooLarge { field: String, len: usize },
}

/// Turns field lists into bytes and back.
///
/// Implementations must round-trip: `decode(encode(x)) == x`.
pub trait Packer {
    fn encode(&self, fields: &[Field]) -> Result<Vec<u8>, PackerError>;

    fn decode(&self, data: &[u8]) -> Result<Vec<Field>, PackerError>;
}

/// The default length-prefixed [`Packer`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldPacker;

impl Packer for FieldPacker {
    fn encode(&self, fields: &[Field]) -> Result<Vec<u8>, PackerError> {
        if fields.len() > MAX_FIELDS {
            return Err(PackerError::TooManyFields(fields.len()));
        }

        let body: usize = fields
            .iter()
            .map(|f| 1 + f.name.len() + 1 + 4 + f.value.as_slice().len())
            .sum();
        let mut buf = Vec::with_capacity(3 + body);

        buf.push(PACKER_VERSION);
        buf.extend_from_slice(&(fields.len() as u16).to_le_bytes());

        for field in fields {
            if field.name.len() > MAX_NAME_LENGTH {
                return Err(PackerError::NameTooLong(field.name.len()));
            }
            let value = field.value.as_slice();
            if value.len() > MAX_VALUE_LENGTH {
                return Err(PackerError::ValueTooLarge {
                    field: field.name.clone(),
                    len: value.len(),
                });
            }

            buf.push(field.name.len() as u8);
            buf.extend_from_slice(field.name.as_bytes());
            buf.push(field.value.tag());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }

        debug_assert_eq!(buf.len(), 3 + body);
        Ok(buf)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<Field>, PackerError> {
        let mut cursor = Cursor { data, pos: 0 };

        let version = cursor.take(1)?[0];
        if version != PACKER_VERSION {
            return Err(PackerError::UnsupportedVersion(version));
        }

        let count_bytes = cursor.take(2)?;
        let count = u16::from_le_bytes([count_bytes[0], count_bytes[1]]) as usize;
        let mut fields = Vec::with_capacity(count);

        for _ in 0..count {
            let name_len = cursor.take(1)?[0] as usize;
            let name = std::str::from_utf8(cursor.take(name_len)?)
                .map_err(|_| PackerError::InvalidUtf8 {
                    what: "field name".to_owned(),
                })?
                .to_owned();

            let tag = cursor.take(1)?[0];
            let len_bytes = cursor.take(4)?;
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                as usize;
            let raw = cursor.take(len)?;

            let value = match tag {
                TAG_STR => Value::Str(
                    std::str::from_utf8(raw)
                        .map_err(|_| PackerError::InvalidUtf8 {
                            what: format!("field {name:?}"),
                        })?
                        .to_owned(),
                ),
                TAG_BYTES => Value::Bytes(Bytes::copy_from_slice(raw)),
                tag => return Err(PackerError::UnknownTag { tag, field: name }),
            };

            fields.push(Field { name, value });
        }

        let rest = data.len() - cursor.pos;
        if rest != 0 {
            return Err(PackerError::TrailingBytes(rest));
        }
        Ok(fields)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], PackerError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(PackerError::Truncated {
                needed: n,
                position: self.pos,
            })?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
