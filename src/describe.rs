//! Protocol describer - human-readable frame pretty-printer.
//!
//! A [`ProtocolDescriber`] holds a declarative table mapping command opcodes
//! to a payload [`Shape`] and a [`FrameFormat`]. Engines feed raw frames to
//! [`ProtocolDescriber::describe`] when emitting `tracing` debug lines.
//!
//! Describing is total: malformed or unknown input yields an empty string or
//! a bracketed tag, never a panic, so logging is never impaired.
//!
//! Addressed describers (one table per device address) can be merged over
//! disjoint addresses to describe a whole multi-drop link; mixing addressed
//! and unaddressed describers is forbidden.
//!
//! # Example
//!
//! ```
//! use devlink::describe::{FrameFormat, ProtocolDescriber};
//! use devlink::shape::{Field, Shape};
//!
//! let mut d = ProtocolDescriber::addressed(0x55);
//! d.entry(
//!     0x31,
//!     Shape::fields([Field::U8]),
//!     FrameFormat::template("set level {}"),
//! );
//! assert_eq!(d.describe(&[0x55, 0x31, 0x07]), "set level 7");
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{BadCodeReason, DevlinkError, Result};
use crate::protocol::{Frame, ACK_BIT};
use crate::shape::{FieldValue, Shape};

/// Formatter for one opcode's frames.
#[derive(Clone)]
pub enum FrameFormat {
    /// Format string; each `{}` is replaced with the next decoded field.
    Template(String),
    /// Callback receiving decoded fields and the raw payload.
    Custom(Arc<dyn Fn(&[FieldValue], &[u8]) -> String + Send + Sync>),
}

impl FrameFormat {
    /// Convenience constructor for a template string.
    pub fn template(s: impl Into<String>) -> Self {
        Self::Template(s.into())
    }

    /// Convenience constructor for a callback formatter.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[FieldValue], &[u8]) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    fn render(&self, values: &[FieldValue], payload: &[u8]) -> String {
        match self {
            Self::Template(template) => {
                let mut out = String::with_capacity(template.len());
                let mut fields = values.iter();
                let mut rest = template.as_str();
                while let Some(pos) = rest.find("{}") {
                    out.push_str(&rest[..pos]);
                    match fields.next() {
                        Some(v) => {
                            let _ = write!(out, "{}", v);
                        }
                        None => out.push('?'),
                    }
                    rest = &rest[pos + 2..];
                }
                out.push_str(rest);
                out
            }
            Self::Custom(f) => f(values, payload),
        }
    }
}

impl std::fmt::Debug for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Template(t) => f.debug_tuple("Template").field(t).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").finish(),
        }
    }
}

#[derive(Clone, Debug)]
struct DescribeEntry {
    shape: Shape,
    format: FrameFormat,
}

type Table = HashMap<u8, DescribeEntry>;

#[derive(Clone, Debug)]
enum Mode {
    Unaddressed(Table),
    Addressed(HashMap<u8, Table>),
}

/// Declarative frame pretty-printer. See the module docs.
#[derive(Clone, Debug)]
pub struct ProtocolDescriber {
    mode: Mode,
}

impl ProtocolDescriber {
    /// Create a describer for an unaddressed channel.
    pub fn unaddressed() -> Self {
        Self {
            mode: Mode::Unaddressed(Table::new()),
        }
    }

    /// Create a describer for the device at `addr` on an addressed channel.
    pub fn addressed(addr: u8) -> Self {
        let mut tables = HashMap::new();
        tables.insert(addr, Table::new());
        Self {
            mode: Mode::Addressed(tables),
        }
    }

    /// Declare how frames for `opcode` are described.
    ///
    /// For an addressed describer built with [`addressed`](Self::addressed)
    /// the entry lands in that device's table. Later entries replace earlier
    /// ones for the same opcode.
    pub fn entry(&mut self, opcode: u8, shape: Shape, format: FrameFormat) -> &mut Self {
        let entry = DescribeEntry { shape, format };
        match &mut self.mode {
            Mode::Unaddressed(table) => {
                table.insert(opcode, entry);
            }
            Mode::Addressed(tables) => {
                // addressed() always seeds exactly one table pre-merge
                for table in tables.values_mut() {
                    table.insert(opcode, entry.clone());
                }
            }
        }
        self
    }

    /// Merge two addressed describers over disjoint addresses.
    ///
    /// Returns a `Config` error when either side is unaddressed or when the
    /// address sets overlap.
    pub fn merge(self, other: Self) -> Result<Self> {
        match (self.mode, other.mode) {
            (Mode::Addressed(mut left), Mode::Addressed(right)) => {
                for (addr, table) in right {
                    if left.contains_key(&addr) {
                        return Err(DevlinkError::Config(format!(
                            "describer merge: address {:#04x} present on both sides",
                            addr
                        )));
                    }
                    left.insert(addr, table);
                }
                Ok(Self {
                    mode: Mode::Addressed(left),
                })
            }
            _ => Err(DevlinkError::Config(
                "describer merge requires two addressed describers".to_string(),
            )),
        }
    }

    /// Describe one raw frame. Total; never panics.
    pub fn describe(&self, raw: &[u8]) -> String {
        let addressed = matches!(self.mode, Mode::Addressed(_));
        let frame = match Frame::parse(raw, addressed) {
            Some(f) => f,
            None => return "[short frame]".to_string(),
        };

        let table = match (&self.mode, frame.addr) {
            (Mode::Unaddressed(table), _) => table,
            (Mode::Addressed(tables), Some(addr)) => match tables.get(&addr) {
                Some(t) => t,
                None => return String::new(),
            },
            (Mode::Addressed(_), None) => return String::new(),
        };

        if frame.is_bad_cmd() {
            return match &frame.payload[..] {
                [opcode, reason, ..] => format!(
                    "bad command {:#04x}: {}",
                    opcode,
                    BadCodeReason::from_wire(*reason)
                ),
                _ => "[truncated bad-command frame]".to_string(),
            };
        }

        if frame.is_ack() {
            let opcode = frame.opcode & !ACK_BIT;
            return if frame.payload.is_empty() {
                format!("ack {:#04x}", opcode)
            } else {
                format!("ack {:#04x} {}", opcode, hex_dump(&frame.payload))
            };
        }

        let entry = match table.get(&frame.opcode) {
            Some(e) => e,
            None => return format!("[unknown opcode {:#04x}]", frame.opcode),
        };

        let values = match entry.shape.decode(&frame.payload) {
            Some(v) => v,
            None => return format!("[size mismatch for {:#04x}]", frame.opcode),
        };

        entry.format.render(&values, &frame.payload)
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Field;

    fn sample() -> ProtocolDescriber {
        let mut d = ProtocolDescriber::addressed(0x55);
        d.entry(
            0x31,
            Shape::fields([Field::U8]),
            FrameFormat::template("set level {}"),
        );
        d.entry(0x10, Shape::Empty, FrameFormat::template("status query"));
        d.entry(
            0x20,
            Shape::Raw,
            FrameFormat::custom(|_, payload| format!("blob of {} bytes", payload.len())),
        );
        d
    }

    #[test]
    fn test_template_interpolation() {
        let d = sample();
        assert_eq!(d.describe(&[0x55, 0x31, 0x07]), "set level 7");
        assert_eq!(d.describe(&[0x55, 0x10]), "status query");
    }

    #[test]
    fn test_custom_formatter() {
        let d = sample();
        assert_eq!(d.describe(&[0x55, 0x20, 1, 2, 3]), "blob of 3 bytes");
    }

    #[test]
    fn test_ack_and_bad_cmd() {
        let d = sample();
        assert_eq!(d.describe(&[0x55, 0xB1, 0x42]), "ack 0x31 42");
        assert_eq!(d.describe(&[0x55, 0x91]), "ack 0x11");
        assert_eq!(
            d.describe(&[0x55, 0xF0, 0x30, 0x03]),
            "bad command 0x30: SIZEERR"
        );
    }

    #[test]
    fn test_malformed_input_never_panics() {
        let d = sample();
        assert_eq!(d.describe(&[]), "[short frame]");
        assert_eq!(d.describe(&[0x55]), "[short frame]");
        assert_eq!(d.describe(&[0x55, 0xF0]), "[truncated bad-command frame]");
        assert_eq!(d.describe(&[0x55, 0x31]), "[size mismatch for 0x31]");
        assert_eq!(d.describe(&[0x55, 0x33]), "[unknown opcode 0x33]");
        // Frame for a different device: silently empty.
        assert_eq!(d.describe(&[0x02, 0x31, 0x07]), "");
    }

    #[test]
    fn test_unaddressed_describer() {
        let mut d = ProtocolDescriber::unaddressed();
        d.entry(
            0x11,
            Shape::fields([Field::U16]),
            FrameFormat::template("speed {}"),
        );
        assert_eq!(d.describe(&[0x11, 0x34, 0x12]), "speed 4660");
    }

    #[test]
    fn test_merge_disjoint_addresses() {
        let left = sample();
        let mut right = ProtocolDescriber::addressed(0x02);
        right.entry(0x11, Shape::Empty, FrameFormat::template("ping"));

        let merged = left.merge(right).unwrap();
        assert_eq!(merged.describe(&[0x55, 0x10]), "status query");
        assert_eq!(merged.describe(&[0x02, 0x11]), "ping");
    }

    #[test]
    fn test_merge_overlap_rejected() {
        let left = sample();
        let right = ProtocolDescriber::addressed(0x55);
        assert!(matches!(
            left.merge(right),
            Err(DevlinkError::Config(_))
        ));
    }

    #[test]
    fn test_merge_mixed_modes_rejected() {
        let left = sample();
        let right = ProtocolDescriber::unaddressed();
        assert!(left.merge(right).is_err());
    }

    #[test]
    fn test_template_with_too_few_fields() {
        let mut d = ProtocolDescriber::unaddressed();
        d.entry(
            0x11,
            Shape::fields([Field::U8]),
            FrameFormat::template("a={} b={}"),
        );
        assert_eq!(d.describe(&[0x11, 0x05]), "a=5 b=?");
    }
}
