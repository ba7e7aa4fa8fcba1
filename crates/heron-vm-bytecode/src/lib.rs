//! # Heron VM Bytecode
//!
//! The instruction encoding shared by the Heron compiler and interpreter.
//!
//! ## Design Principles
//!
//! - **Stack-based**: Instructions operate on an operand stack sized at compile time
//! - **Compact**: One opcode byte followed by fixed-width big-endian operands
//! - **Self-describing**: Operand widths are a pure function of the opcode
//! - **Immutable**: A finished [`FunctionUnit`] is shared read-only between invocations

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod constant;
pub mod decode;
pub mod disasm;
pub mod emit;
pub mod error;
pub mod instruction;
pub mod label;
pub mod layout;
pub mod operand;
pub mod unit;
pub mod verify;

pub use buffer::CodeBuffer;
pub use constant::{NumberTable, RegExpLiteral, StringTable};
pub use decode::{DecodedInstruction, Instructions};
pub use emit::{EmittedCode, Emitter};
pub use error::{BytecodeError, Result};
pub use instruction::Opcode;
pub use label::{Label, LabelTable};
pub use layout::FrameLayout;
pub use operand::{NO_NAME, Operand};
pub use unit::{FunctionUnit, UnitFlags};

/// Largest number of entries any side table may hold.
pub const MAX_TABLE_ENTRIES: usize = 0xFFFF;
