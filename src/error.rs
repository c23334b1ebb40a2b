//! Error types for devlink.

use thiserror::Error;

/// Reason byte carried by a bad-command (0xF0) reply.
///
/// On the wire this is a single unsigned byte; values above 3 are
/// project-specific extensions and are preserved as [`BadCodeReason::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadCodeReason {
    /// Handler failed or returned something uninterpretable.
    ExecErr,
    /// Opcode not registered on the peer.
    Unknown,
    /// Payload length does not match the registered shape.
    SizeErr,
    /// Project-specific extension code.
    Other(u8),
}

impl BadCodeReason {
    /// Decode a reason from its wire byte.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            1 => Self::ExecErr,
            2 => Self::Unknown,
            3 => Self::SizeErr,
            other => Self::Other(other),
        }
    }

    /// Encode the reason to its wire byte.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::ExecErr => 1,
            Self::Unknown => 2,
            Self::SizeErr => 3,
            Self::Other(b) => b,
        }
    }
}

impl std::fmt::Display for BadCodeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExecErr => write!(f, "EXECERR"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::SizeErr => write!(f, "SIZEERR"),
            Self::Other(b) => write!(f, "code {}", b),
        }
    }
}

/// Main error type for all devlink operations.
#[derive(Debug, Error)]
pub enum DevlinkError {
    /// Command exhausted all attempts without a matching acknowledgement.
    #[error("no answer for command {opcode:#04x}")]
    NoAnswer {
        /// Opcode of the unanswered command.
        opcode: u8,
    },

    /// Peer replied with a bad-command frame.
    #[error("bad code {reason} for command {opcode:#04x}")]
    BadCode {
        /// Opcode of the rejected command.
        opcode: u8,
        /// Decoded reason byte.
        reason: BadCodeReason,
    },

    /// Hard transport failure during read/write.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Invalid address, empty message, duplicate registration, etc.
    #[error("config error: {0}")]
    Config(String),

    /// The engine worker has stopped; the engine must be restarted or rebuilt.
    #[error("engine closed")]
    Closed,
}

/// Result type alias using DevlinkError.
pub type Result<T> = std::result::Result<T, DevlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_wire_roundtrip() {
        for byte in [1u8, 2, 3, 4, 0, 255] {
            let reason = BadCodeReason::from_wire(byte);
            assert_eq!(reason.to_wire(), byte);
        }
    }

    #[test]
    fn test_reason_named_values() {
        assert_eq!(BadCodeReason::from_wire(1), BadCodeReason::ExecErr);
        assert_eq!(BadCodeReason::from_wire(2), BadCodeReason::Unknown);
        assert_eq!(BadCodeReason::from_wire(3), BadCodeReason::SizeErr);
        assert_eq!(BadCodeReason::from_wire(9), BadCodeReason::Other(9));
    }

    #[test]
    fn test_error_messages_include_opcode() {
        let err = DevlinkError::NoAnswer { opcode: 0x11 };
        assert!(err.to_string().contains("0x11"));

        let err = DevlinkError::BadCode {
            opcode: 0x7f,
            reason: BadCodeReason::Unknown,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x7f"));
        assert!(msg.contains("UNKNOWN"));
    }
}
