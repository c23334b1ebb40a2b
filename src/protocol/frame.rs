//! Frame struct with typed accessors and wire encoders.
//!
//! A [`Frame`] is the parsed view of one transport read. Payloads use
//! `bytes::Bytes` so trackers and handlers can share them without copying.

use bytes::Bytes;

use super::wire::{ACK_BIT, BAD_CMD_OPCODE, BROADCAST_ADDR};

/// A parsed protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Address byte, present iff the channel is addressed.
    pub addr: Option<u8>,
    /// Opcode byte.
    pub opcode: u8,
    /// Payload bytes after the opcode (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Parse one raw transport read into a frame.
    ///
    /// For an addressed channel the first byte is the address and at least
    /// two bytes are required; otherwise one. Returns `None` on a short read.
    pub fn parse(raw: &[u8], addressed: bool) -> Option<Self> {
        if addressed {
            if raw.len() < 2 {
                return None;
            }
            Some(Self {
                addr: Some(raw[0]),
                opcode: raw[1],
                payload: Bytes::copy_from_slice(&raw[2..]),
            })
        } else {
            if raw.is_empty() {
                return None;
            }
            Some(Self {
                addr: None,
                opcode: raw[0],
                payload: Bytes::copy_from_slice(&raw[1..]),
            })
        }
    }

    /// Check if the opcode carries the ACK bit.
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.opcode & ACK_BIT != 0
    }

    /// Check if this is a bad-command frame.
    #[inline]
    pub fn is_bad_cmd(&self) -> bool {
        self.opcode == BAD_CMD_OPCODE
    }

    /// Check if this frame is addressed to the broadcast address.
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.addr == Some(BROADCAST_ADDR)
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Build the on-wire bytes of a command.
///
/// `msg` is the opcode followed by the payload; `addr` prepends the address
/// byte on addressed channels.
pub fn encode_command(addr: Option<u8>, msg: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.len() + 1);
    if let Some(a) = addr {
        buf.push(a);
    }
    buf.extend_from_slice(msg);
    buf
}

/// Build the on-wire bytes of a positive ACK for `opcode`.
pub fn encode_ack(addr: Option<u8>, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 2);
    if let Some(a) = addr {
        buf.push(a);
    }
    buf.push(opcode | ACK_BIT);
    buf.extend_from_slice(payload);
    buf
}

/// Build the on-wire bytes of a bad-command reply for `opcode`.
pub fn encode_bad_cmd(addr: Option<u8>, opcode: u8, reason: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    if let Some(a) = addr {
        buf.push(a);
    }
    buf.push(BAD_CMD_OPCODE);
    buf.push(opcode);
    buf.push(reason);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addressed() {
        let frame = Frame::parse(&[0x55, 0x90, 0xAA, 0xBB], true).unwrap();
        assert_eq!(frame.addr, Some(0x55));
        assert_eq!(frame.opcode, 0x90);
        assert_eq!(&frame.payload[..], &[0xAA, 0xBB]);
        assert!(frame.is_ack());
        assert!(!frame.is_broadcast());
    }

    #[test]
    fn test_parse_unaddressed() {
        let frame = Frame::parse(&[0x10, 0x01], false).unwrap();
        assert_eq!(frame.addr, None);
        assert_eq!(frame.opcode, 0x10);
        assert_eq!(&frame.payload[..], &[0x01]);
        assert!(!frame.is_ack());
    }

    #[test]
    fn test_parse_short_reads() {
        assert!(Frame::parse(&[], true).is_none());
        assert!(Frame::parse(&[0x55], true).is_none());
        assert!(Frame::parse(&[], false).is_none());
        // A lone opcode is a valid unaddressed frame.
        let frame = Frame::parse(&[0x10], false).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_parse_broadcast() {
        let frame = Frame::parse(&[0x00, 0x20, 0x01], true).unwrap();
        assert!(frame.is_broadcast());
        assert_eq!(frame.opcode, 0x20);
    }

    #[test]
    fn test_bad_cmd_classification() {
        let frame = Frame::parse(&[0x55, 0xF0, 0x7F, 0x02], true).unwrap();
        assert!(frame.is_bad_cmd());
        assert_eq!(&frame.payload[..], &[0x7F, 0x02]);
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command(Some(0x02), &[0x10]), vec![0x02, 0x10]);
        assert_eq!(
            encode_command(None, &[0x20, 0x01]),
            vec![0x20, 0x01]
        );
    }

    #[test]
    fn test_encode_ack() {
        assert_eq!(
            encode_ack(Some(0x55), 0x31, &[0x42]),
            vec![0x55, 0xB1, 0x42]
        );
        assert_eq!(encode_ack(None, 0x11, &[]), vec![0x91]);
    }

    #[test]
    fn test_encode_bad_cmd() {
        assert_eq!(
            encode_bad_cmd(Some(0x55), 0x30, 3),
            vec![0x55, 0xF0, 0x30, 0x03]
        );
        assert_eq!(encode_bad_cmd(None, 0x30, 2), vec![0xF0, 0x30, 0x02]);
    }
}
