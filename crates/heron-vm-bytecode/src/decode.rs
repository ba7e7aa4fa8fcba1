//! Instruction decoding

use crate::error::{BytecodeError, Result};
use crate::instruction::Opcode;
use crate::operand::{Operand, read_i16, read_i32, read_u8, read_u16};

/// A decoded instruction with its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Position of the opcode byte
    pub pc: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Operand values in layout order; unused entries are zero
    pub operands: [i32; 2],
}

impl DecodedInstruction {
    /// Position of the next instruction
    #[inline]
    pub fn next_pc(&self) -> usize {
        self.pc + self.opcode.length()
    }

    /// Operand `i` as an unsigned 16-bit value
    #[inline]
    pub fn u16(&self, i: usize) -> u16 {
        self.operands[i] as u16
    }

    /// Absolute targets of the instruction's jump operands (zero offsets skipped)
    pub fn jump_targets(&self) -> impl Iterator<Item = isize> + '_ {
        self.opcode
            .operands()
            .iter()
            .zip(self.operands)
            .filter(|(kind, offset)| **kind == Operand::Jump && *offset != 0)
            .map(|(_, offset)| self.pc as isize + offset as isize)
    }
}

/// Decode one instruction at `pc`
pub fn decode_at(code: &[u8], pc: usize) -> Result<DecodedInstruction> {
    let byte = code[pc];
    let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode {
        opcode: byte,
        offset: pc,
    })?;
    if pc + opcode.length() > code.len() {
        return Err(BytecodeError::Truncated(pc));
    }

    let mut operands = [0i32; 2];
    let mut at = pc + 1;
    for (slot, kind) in operands.iter_mut().zip(opcode.operands()) {
        *slot = match kind {
            Operand::U8 => read_u8(code, at) as i32,
            Operand::I16 | Operand::Jump => read_i16(code, at) as i32,
            Operand::I32 => read_i32(code, at),
            Operand::U16
            | Operand::String
            | Operand::Number
            | Operand::Function
            | Operand::RegExp => read_u16(code, at) as i32,
        };
        at += kind.width();
    }

    Ok(DecodedInstruction {
        pc,
        opcode,
        operands,
    })
}

/// Iterator over the instructions of a code blob
#[derive(Debug, Clone)]
pub struct Instructions<'a> {
    code: &'a [u8],
    pc: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    /// Decode `code` from its first byte
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pc: 0,
            failed: false,
        }
    }
}

impl Iterator for Instructions<'_> {
    type Item = Result<DecodedInstruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pc >= self.code.len() {
            return None;
        }
        match decode_at(self.code, self.pc) {
            Ok(insn) => {
                self.pc = insn.next_pc();
                Some(Ok(insn))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CodeBuffer;

    #[test]
    fn test_decode_sequence() {
        let mut buf = CodeBuffer::new();
        buf.push_u8(Opcode::Int.to_byte());
        buf.push_i32(-70_000);
        buf.push_u8(Opcode::Call.to_byte());
        buf.push_u16(2);
        buf.push_u16(7);
        buf.push_u8(Opcode::Return.to_byte());

        let insns: Vec<_> = Instructions::new(buf.as_slice())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[0].operands[0], -70_000);
        assert_eq!(insns[1].pc, 5);
        assert_eq!(insns[1].operands, [2, 7]);
        assert_eq!(insns[2].opcode, Opcode::Return);
    }

    #[test]
    fn test_truncated() {
        let code = [Opcode::GetVar.to_byte(), 0];
        assert_eq!(decode_at(&code, 0), Err(BytecodeError::Truncated(0)));
    }

    #[test]
    fn test_invalid_opcode() {
        let code = [0xEE];
        assert!(matches!(
            decode_at(&code, 0),
            Err(BytecodeError::InvalidOpcode { opcode: 0xEE, .. })
        ));
    }

    #[test]
    fn test_try_jump_targets() {
        let mut buf = CodeBuffer::new();
        buf.push_u8(Opcode::Undefined.to_byte());
        buf.push_u8(Opcode::Try.to_byte());
        buf.push_i16(0);
        buf.push_i16(12);

        let insn = decode_at(buf.as_slice(), 1).unwrap();
        let targets: Vec<_> = insn.jump_targets().collect();
        assert_eq!(targets, vec![13]);
        assert_eq!(insn.next_pc(), 6);
    }
}
