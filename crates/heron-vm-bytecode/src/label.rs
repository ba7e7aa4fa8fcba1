//! Branch labels and jump backpatching

use crate::buffer::CodeBuffer;
use crate::error::{BytecodeError, Result};

/// Opaque handle to a branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    /// Handle index, for diagnostics
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A jump operand waiting for its label to be marked
#[derive(Debug, Clone, Copy)]
struct Fixup {
    label: Label,
    /// Position of the 16-bit operand to patch
    operand_at: usize,
    /// Position of the jump's opcode byte; offsets are relative to it
    instruction_pc: usize,
}

/// Tracks label positions and unresolved jump operands for one unit
#[derive(Debug, Default)]
pub struct LabelTable {
    positions: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

/// Encode the displacement between a jump and its target
pub fn jump_offset(instruction_pc: usize, target: usize) -> Result<i16> {
    let distance = target as isize - instruction_pc as isize;
    i16::try_from(distance).map_err(|_| BytecodeError::JumpTooLarge {
        from: instruction_pc,
        distance,
    })
}

impl LabelTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new unmarked label
    pub fn acquire(&mut self) -> Label {
        let label = Label(self.positions.len() as u32);
        self.positions.push(None);
        label
    }

    /// Bind a label to a code position. A label is marked at most once.
    pub fn mark(&mut self, label: Label, position: usize) {
        let slot = &mut self.positions[label.0 as usize];
        assert!(
            slot.is_none(),
            "label {} marked twice (at {:?} and {})",
            label.0,
            slot,
            position
        );
        *slot = Some(position);
    }

    /// Position of a marked label
    #[inline]
    pub fn position(&self, label: Label) -> Option<usize> {
        self.positions[label.0 as usize]
    }

    /// Record a jump operand that refers to a label not yet marked
    pub fn add_fixup(&mut self, label: Label, operand_at: usize, instruction_pc: usize) {
        self.fixups.push(Fixup {
            label,
            operand_at,
            instruction_pc,
        });
    }

    /// Number of jump operands still waiting to be patched
    pub fn pending_fixups(&self) -> usize {
        self.fixups.len()
    }

    /// Patch every recorded fixup with its resolved offset.
    ///
    /// A fixup whose label was never marked is a compiler defect and panics.
    pub fn fix_label_gotos(&mut self, code: &mut CodeBuffer) -> Result<()> {
        for fixup in self.fixups.drain(..) {
            let target = self.positions[fixup.label.0 as usize].unwrap_or_else(|| {
                panic!(
                    "jump at {} references label {} that was never marked",
                    fixup.instruction_pc, fixup.label.0
                )
            });
            let offset = jump_offset(fixup.instruction_pc, target)?;
            code.patch_i16(fixup.operand_at, offset);
        }
        Ok(())
    }
}
