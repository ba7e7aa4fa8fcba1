//! Bytecode operands
//!
//! Every operand is big-endian. The operand layout of an instruction is fixed
//! by its opcode, so a decoder never needs more than the opcode byte to know
//! how far to advance.

use serde::{Deserialize, Serialize};

/// Callee-name operand of `Call`/`New` when the callee has no static name
pub const NO_NAME: u16 = 0xFFFF;

/// Kind of a single instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Unsigned byte (increment/decrement flags)
    U8,
    /// Unsigned 16-bit count or slot ordinal
    U16,
    /// Signed 16-bit inline literal
    I16,
    /// Signed 32-bit inline literal
    I32,
    /// 16-bit index into the string table
    String,
    /// 16-bit index into the number table
    Number,
    /// 16-bit index into the nested function table
    Function,
    /// 16-bit index into the regular expression table
    RegExp,
    /// Signed 16-bit offset relative to the instruction's opcode byte
    Jump,
}

impl Operand {
    /// Encoded width in bytes
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I32 => 4,
            _ => 2,
        }
    }

    /// Whether the operand is read as a signed value
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I16 | Self::I32 | Self::Jump)
    }
}

/// Read an unsigned byte
#[inline]
pub fn read_u8(code: &[u8], at: usize) -> u8 {
    code[at]
}

/// Read a big-endian unsigned 16-bit operand
#[inline]
pub fn read_u16(code: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([code[at], code[at + 1]])
}

/// Read a big-endian signed 16-bit operand
#[inline]
pub fn read_i16(code: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([code[at], code[at + 1]])
}

/// Read a big-endian signed 32-bit operand
#[inline]
pub fn read_i32(code: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

/// Resolve a jump operand against the position of its opcode byte.
///
/// Returns `None` for a zero offset, which `Try` uses to mean "no handler".
#[inline]
pub fn jump_target(instruction_pc: usize, offset: i16) -> Option<usize> {
    if offset == 0 {
        None
    } else {
        Some((instruction_pc as isize + offset as isize) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_widths() {
        assert_eq!(Operand::U8.width(), 1);
        assert_eq!(Operand::Jump.width(), 2);
        assert_eq!(Operand::String.width(), 2);
        assert_eq!(Operand::I32.width(), 4);
    }

    #[test]
    fn test_big_endian_reads() {
        let code = [0x01, 0x02, 0xFF, 0xFE, 0x80, 0x00, 0x00, 0x01];
        assert_eq!(read_u16(&code, 0), 0x0102);
        assert_eq!(read_i16(&code, 2), -2);
        assert_eq!(read_i32(&code, 4), i32::MIN + 1);
    }

    #[test]
    fn test_jump_target() {
        assert_eq!(jump_target(10, 5), Some(15));
        assert_eq!(jump_target(10, -10), Some(0));
        assert_eq!(jump_target(10, 0), None);
    }
}
