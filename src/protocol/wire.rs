//! Opcode space constants and validation.

/// High bit marking an acknowledgement opcode.
pub const ACK_BIT: u8 = 0x80;

/// Opcode of the bad-command negative acknowledgement frame.
pub const BAD_CMD_OPCODE: u8 = 0xF0;

/// Reserved command opcode (its ACK form would collide with 0xF0).
pub const RESERVED_OPCODE: u8 = 0x70;

/// Reserved broadcast address.
pub const BROADCAST_ADDR: u8 = 0;

/// Whether `opcode` is usable as a command opcode.
///
/// Valid command opcodes occupy 0x00-0x7F except the reserved 0x70.
#[inline]
pub fn is_valid_command_opcode(opcode: u8) -> bool {
    opcode & ACK_BIT == 0 && opcode != RESERVED_OPCODE
}
