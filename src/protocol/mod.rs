//! Wire protocol - opcode space, frame model, encoders.
//!
//! Frames are single octet sequences, one frame per transport read:
//!
//! ```text
//! Command:      [addr?] [opcode]      [payload...]    opcode & 0x80 == 0
//! Positive ACK: [addr?] [opcode|0x80] [payload...]
//! Bad command:  [addr?] 0xF0 [orig_opcode] [reason]
//! ```
//!
//! The address byte is present iff the channel is addressed; a channel either
//! carries it on every frame or on none.

mod frame;
mod wire;

pub use frame::{encode_ack, encode_bad_cmd, encode_command, Frame};
pub use wire::{
    is_valid_command_opcode, ACK_BIT, BAD_CMD_OPCODE, BROADCAST_ADDR, RESERVED_OPCODE,
};
