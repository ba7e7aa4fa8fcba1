//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while emitting or decoding bytecode
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytecodeError {
    /// A side table ran out of 16-bit indices
    #[error("Too many distinct constants in {table} table (max 65535)")]
    TooManyConstants {
        /// Which table overflowed
        table: &'static str,
    },

    /// A resolved jump displacement does not fit a signed 16-bit operand
    #[error("Jump too large: {distance} bytes from offset {from}")]
    JumpTooLarge {
        /// Position of the jump instruction
        from: usize,
        /// Displacement that did not fit
        distance: isize,
    },

    /// Invalid opcode byte
    #[error("Invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode {
        /// The offending byte
        opcode: u8,
        /// Its position
        offset: usize,
    },

    /// An instruction's operands run past the end of the code
    #[error("Truncated instruction at offset {0}")]
    Truncated(usize),

    /// A jump lands outside the code or in the middle of an instruction
    #[error("Jump at offset {from} targets {target}, which is not an instruction boundary")]
    BadJumpTarget {
        /// Position of the jump instruction
        from: usize,
        /// Computed target
        target: isize,
    },

    /// Two control-flow paths reach one instruction with different stack depths
    #[error("Stack depth mismatch at offset {offset}: {expected} vs {found}")]
    StackMismatch {
        /// Position of the instruction
        offset: usize,
        /// Depth recorded first
        expected: u32,
        /// Depth found on a later path
        found: u32,
    },

    /// An instruction pops more values than the stack holds
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// A table index or frame slot operand points past its region
    #[error("{region} index {index} at offset {offset} is out of range (len {len})")]
    OperandOutOfRange {
        /// Position of the instruction
        offset: usize,
        /// Table or frame region the operand indexes
        region: &'static str,
        /// The operand value
        index: u16,
        /// Size of the region
        len: usize,
    },

    /// A unit declares more parameters than it names
    #[error("{params} parameters declared but only {names} variable names")]
    ParamCount {
        /// Declared parameter count
        params: u16,
        /// Length of the variable name list
        names: usize,
    },
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
