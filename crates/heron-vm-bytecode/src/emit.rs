//! Instruction emission
//!
//! [`Emitter`] combines the code buffer, the side tables and the label table
//! of one unit under compilation. It knows nothing about stack depth; the
//! compiler tracks that on top of it.

use std::sync::Arc;

use crate::MAX_TABLE_ENTRIES;
use crate::buffer::CodeBuffer;
use crate::constant::{NumberTable, RegExpLiteral, StringTable};
use crate::error::{BytecodeError, Result};
use crate::instruction::Opcode;
use crate::label::{Label, LabelTable, jump_offset};
use crate::operand::Operand;
use crate::unit::FunctionUnit;

/// Everything an emitter produced for one unit
#[derive(Debug)]
pub struct EmittedCode {
    /// Trimmed instruction stream
    pub code: Box<[u8]>,
    /// String table
    pub strings: Vec<String>,
    /// Number table
    pub numbers: Vec<f64>,
    /// Nested function table
    pub functions: Vec<Arc<FunctionUnit>>,
    /// Regular expression table
    pub regexps: Vec<RegExpLiteral>,
}

/// Bytecode emitter for one unit
#[derive(Debug, Default)]
pub struct Emitter {
    code: CodeBuffer,
    strings: StringTable,
    numbers: NumberTable,
    functions: Vec<Arc<FunctionUnit>>,
    regexps: Vec<RegExpLiteral>,
    labels: LabelTable,
}

impl Emitter {
    /// Create an empty emitter
    pub fn new() -> Self {
        Self {
            code: CodeBuffer::new(),
            ..Self::default()
        }
    }

    /// Current code position
    #[inline]
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Code written so far
    #[inline]
    pub fn code(&self) -> &[u8] {
        self.code.as_slice()
    }

    fn check_operands(op: Opcode, expected: &[Operand]) {
        debug_assert_eq!(
            op.operands(),
            expected,
            "{} emitted with the wrong operand layout",
            op.name()
        );
    }

    /// Emit an operand-less instruction
    pub fn op(&mut self, op: Opcode) {
        Self::check_operands(op, &[]);
        self.code.push_u8(op.to_byte());
    }

    /// Emit an instruction with one unsigned 16-bit operand
    pub fn op_u16(&mut self, op: Opcode, operand: u16) {
        debug_assert!(matches!(op.operands(), [Operand::U16]));
        self.code.push_u8(op.to_byte());
        self.code.push_u16(operand);
    }

    /// Emit an instruction with one byte operand
    pub fn op_u8(&mut self, op: Opcode, operand: u8) {
        Self::check_operands(op, &[Operand::U8]);
        self.code.push_u8(op.to_byte());
        self.code.push_u8(operand);
    }

    /// Emit `VarIncDec`-style slot + flags instructions
    pub fn op_u16_u8(&mut self, op: Opcode, slot: u16, flags: u8) {
        Self::check_operands(op, &[Operand::U16, Operand::U8]);
        self.code.push_u8(op.to_byte());
        self.code.push_u16(slot);
        self.code.push_u8(flags);
    }

    /// Emit an instruction whose first operand is a string table index
    pub fn op_string(&mut self, op: Opcode, s: &str) -> Result<()> {
        debug_assert_eq!(op.operands().first(), Some(&Operand::String));
        let idx = self.strings.add(s)?;
        self.code.push_u8(op.to_byte());
        self.code.push_u16(idx);
        Ok(())
    }

    /// Emit a string-indexed instruction followed by a byte operand
    pub fn op_string_u8(&mut self, op: Opcode, s: &str, flags: u8) -> Result<()> {
        Self::check_operands(op, &[Operand::String, Operand::U8]);
        self.op_string(op, s)?;
        self.code.push_u8(flags);
        Ok(())
    }

    /// Emit `Call`/`New` with an argument count and optional callee name
    pub fn op_call(&mut self, op: Opcode, argc: u16, name: Option<&str>) -> Result<()> {
        Self::check_operands(op, &[Operand::U16, Operand::String]);
        let name_idx = match name {
            Some(name) => self.strings.add(name)?,
            None => crate::operand::NO_NAME,
        };
        self.code.push_u8(op.to_byte());
        self.code.push_u16(argc);
        self.code.push_u16(name_idx);
        Ok(())
    }

    /// Push a number, choosing the smallest encoding that round-trips exactly
    pub fn number(&mut self, n: f64) -> Result<()> {
        let is_int = n.fract() == 0.0 && !(n == 0.0 && n.is_sign_negative());
        if is_int && n == 0.0 {
            self.op(Opcode::Zero);
        } else if is_int && n == 1.0 {
            self.op(Opcode::One);
        } else if is_int && n >= i16::MIN as f64 && n <= i16::MAX as f64 {
            self.code.push_u8(Opcode::Short.to_byte());
            self.code.push_i16(n as i16);
        } else if is_int && n >= i32::MIN as f64 && n <= i32::MAX as f64 {
            self.code.push_u8(Opcode::Int.to_byte());
            self.code.push_i32(n as i32);
        } else {
            let idx = self.numbers.add(n)?;
            self.code.push_u8(Opcode::Number.to_byte());
            self.code.push_u16(idx);
        }
        Ok(())
    }

    /// Add a nested function template, returning its table index
    pub fn add_function(&mut self, unit: Arc<FunctionUnit>) -> Result<u16> {
        if self.functions.len() >= MAX_TABLE_ENTRIES {
            return Err(BytecodeError::TooManyConstants { table: "function" });
        }
        self.functions.push(unit);
        Ok((self.functions.len() - 1) as u16)
    }

    /// Emit `Closure` for a nested function index
    pub fn closure(&mut self, idx: u16) {
        self.code.push_u8(Opcode::Closure.to_byte());
        self.code.push_u16(idx);
    }

    /// Emit `RegExp` for a new literal
    pub fn regexp(&mut self, literal: RegExpLiteral) -> Result<()> {
        let idx = match self.regexps.iter().position(|r| *r == literal) {
            Some(idx) => idx,
            None => {
                if self.regexps.len() >= MAX_TABLE_ENTRIES {
                    return Err(BytecodeError::TooManyConstants { table: "regexp" });
                }
                self.regexps.push(literal);
                self.regexps.len() - 1
            }
        };
        self.code.push_u8(Opcode::RegExp.to_byte());
        self.code.push_u16(idx as u16);
        Ok(())
    }

    /// Allocate a label
    #[inline]
    pub fn new_label(&mut self) -> Label {
        self.labels.acquire()
    }

    /// Bind a label to the current position
    #[inline]
    pub fn mark(&mut self, label: Label) {
        let pc = self.pc();
        self.labels.mark(label, pc);
    }

    /// Whether a label has been bound
    #[inline]
    pub fn is_marked(&self, label: Label) -> bool {
        self.labels.position(label).is_some()
    }

    fn jump_operand(&mut self, label: Label, instruction_pc: usize) -> Result<()> {
        match self.labels.position(label) {
            Some(target) => {
                let offset = jump_offset(instruction_pc, target)?;
                self.code.push_i16(offset);
            }
            None => {
                let at = self.code.len();
                self.labels.add_fixup(label, at, instruction_pc);
                self.code.push_i16(0);
            }
        }
        Ok(())
    }

    /// Emit a jump (`Goto`, `IfTrue`, `IfFalse`) to a label
    pub fn jump(&mut self, op: Opcode, label: Label) -> Result<()> {
        Self::check_operands(op, &[Operand::Jump]);
        let pc = self.pc();
        self.code.push_u8(op.to_byte());
        self.jump_operand(label, pc)
    }

    /// Emit `Gosub` to a finally body, saving the return position in `temp`
    pub fn gosub(&mut self, label: Label, temp: u16) -> Result<()> {
        let pc = self.pc();
        self.code.push_u8(Opcode::Gosub.to_byte());
        self.jump_operand(label, pc)?;
        self.code.push_u16(temp);
        Ok(())
    }

    /// Emit `Try` with optional catch and finally handlers
    pub fn try_region(&mut self, catch: Option<Label>, finally: Option<Label>) -> Result<()> {
        let pc = self.pc();
        self.code.push_u8(Opcode::Try.to_byte());
        for handler in [catch, finally] {
            match handler {
                Some(label) => self.jump_operand(label, pc)?,
                None => self.code.push_i16(0),
            }
        }
        Ok(())
    }

    /// Resolve all pending jumps and hand out the finished code and tables
    pub fn finish(mut self) -> Result<EmittedCode> {
        self.labels.fix_label_gotos(&mut self.code)?;
        Ok(EmittedCode {
            code: self.code.finish(),
            strings: self.strings.into_vec(),
            numbers: self.numbers.into_vec(),
            functions: self.functions,
            regexps: self.regexps,
        })
    }
}
