//! Payload shape language.
//!
//! A [`Shape`] declares what a frame payload looks like:
//!
//! - [`Shape::Empty`] - no payload at all
//! - [`Shape::Raw`] - opaque bytes of any length
//! - [`Shape::Fields`] - a fixed sequence of little-endian integer fields
//!
//! Shapes are declared once at registration (or per send call) and the engine
//! decodes payloads against them before invoking handlers or completing
//! trackers.
//!
//! The stable textual grammar accepted by `FromStr` is: the empty string for
//! `Empty`, the literal `raw` for `Raw`, or a whitespace-separated list of
//! field symbols `u8 i8 u16 i16 u32 i32 u64 i64` for `Fields`.
//!
//! # Example
//!
//! ```
//! use devlink::shape::{Field, FieldValue, Shape};
//!
//! let shape: Shape = "u8 i16".parse().unwrap();
//! assert_eq!(shape.wire_len(), Some(3));
//!
//! let values = shape.decode(&[0x07, 0xFE, 0xFF]).unwrap();
//! assert_eq!(values[0], FieldValue::Unsigned(7));
//! assert_eq!(values[1], FieldValue::Signed(-2));
//! ```

use std::str::FromStr;

/// A single fixed-width integer field within a payload.
///
/// Multi-byte fields are little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    I8,
    /// Unsigned 16-bit, little-endian.
    U16,
    /// Signed 16-bit, little-endian.
    I16,
    /// Unsigned 32-bit, little-endian.
    U32,
    /// Signed 32-bit, little-endian.
    I32,
    /// Unsigned 64-bit, little-endian.
    U64,
    /// Signed 64-bit, little-endian.
    I64,
}

impl Field {
    /// Width of the field in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::U64 | Self::I64 => 8,
        }
    }

    /// Decode one field from the start of `buf`.
    ///
    /// `buf` must hold at least `self.width()` bytes.
    fn decode(self, buf: &[u8]) -> FieldValue {
        match self {
            Self::U8 => FieldValue::Unsigned(buf[0] as u64),
            Self::I8 => FieldValue::Signed(buf[0] as i8 as i64),
            Self::U16 => {
                FieldValue::Unsigned(u16::from_le_bytes([buf[0], buf[1]]) as u64)
            }
            Self::I16 => FieldValue::Signed(i16::from_le_bytes([buf[0], buf[1]]) as i64),
            Self::U32 => FieldValue::Unsigned(
                u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64,
            ),
            Self::I32 => FieldValue::Signed(
                i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64,
            ),
            Self::U64 => FieldValue::Unsigned(u64::from_le_bytes(
                buf[..8].try_into().expect("width checked"),
            )),
            Self::I64 => FieldValue::Signed(i64::from_le_bytes(
                buf[..8].try_into().expect("width checked"),
            )),
        }
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "u8" => Ok(Self::U8),
            "i8" => Ok(Self::I8),
            "u16" => Ok(Self::U16),
            "i16" => Ok(Self::I16),
            "u32" => Ok(Self::U32),
            "i32" => Ok(Self::I32),
            "u64" => Ok(Self::U64),
            "i64" => Ok(Self::I64),
            other => Err(format!("unknown field symbol: {:?}", other)),
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    /// Value of an unsigned field, widened to u64.
    Unsigned(u64),
    /// Value of a signed field, widened to i64.
    Signed(i64),
}

impl FieldValue {
    /// The value as u64, sign-cast for signed fields.
    pub fn as_u64(self) -> u64 {
        match self {
            Self::Unsigned(v) => v,
            Self::Signed(v) => v as u64,
        }
    }

    /// The value as i64, bit-cast for unsigned fields.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unsigned(v) => v as i64,
            Self::Signed(v) => v,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Signed(v) => write!(f, "{}", v),
        }
    }
}

/// Declarative description of an expected payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Shape {
    /// No payload bytes at all.
    #[default]
    Empty,
    /// Opaque bytes, any length.
    Raw,
    /// Fixed sequence of integer fields.
    Fields(Vec<Field>),
}

impl Shape {
    /// Convenience constructor for a field sequence.
    pub fn fields(fields: impl Into<Vec<Field>>) -> Self {
        Self::Fields(fields.into())
    }

    /// Total wire length implied by this shape.
    ///
    /// Returns `None` for [`Shape::Raw`], which accepts any length.
    pub fn wire_len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Raw => None,
            Self::Fields(fields) => Some(fields.iter().map(|f| f.width()).sum()),
        }
    }

    /// Whether `len` is an acceptable payload length for this shape.
    pub fn accepts_len(&self, len: usize) -> bool {
        match self.wire_len() {
            Some(expected) => len == expected,
            None => true,
        }
    }

    /// Decode a payload against this shape.
    ///
    /// Returns `None` when the length does not match. For [`Shape::Raw`] and
    /// [`Shape::Empty`] the decoded field list is empty; callers keep the raw
    /// bytes themselves.
    pub fn decode(&self, payload: &[u8]) -> Option<Vec<FieldValue>> {
        match self {
            Self::Empty => payload.is_empty().then(Vec::new),
            Self::Raw => Some(Vec::new()),
            Self::Fields(fields) => {
                if !self.accepts_len(payload.len()) {
                    return None;
                }
                let mut values = Vec::with_capacity(fields.len());
                let mut offset = 0;
                for field in fields {
                    values.push(field.decode(&payload[offset..]));
                    offset += field.width();
                }
                Some(values)
            }
        }
    }
}

impl FromStr for Shape {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::Empty);
        }
        if trimmed == "raw" {
            return Ok(Self::Raw);
        }
        let fields = trimmed
            .split_whitespace()
            .map(Field::from_str)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::Fields(fields))
    }
}
