//! Code generation state for one unit
//!
//! [`FunctionContext`] wraps the bytecode [`Emitter`] and keeps the running
//! operand-stack depth, the temporary-slot allocator and the try nesting
//! counter that size the unit's frame.

use std::sync::Arc;

use heron_vm_bytecode::{
    EmittedCode, Emitter, FrameLayout, FunctionUnit, Label, Opcode, RegExpLiteral, verify,
};

use crate::error::{CompileError, CompileResult};

/// Temporary slot allocator.
///
/// Temporaries are released in reverse order of allocation, so a slot is
/// reused only once the construct that owned it has been fully compiled.
#[derive(Debug, Default)]
pub struct TempAllocator {
    /// Next free temporary
    next: u16,
    /// Highest number of temporaries live at once
    max: u16,
}

impl TempAllocator {
    /// Allocate a temporary
    pub fn alloc(&mut self) -> CompileResult<u16> {
        let temp = self.next;
        self.next = self
            .next
            .checked_add(1)
            .ok_or(CompileError::TooManyLocals)?;
        self.max = self.max.max(self.next);
        Ok(temp)
    }

    /// Release the most recently allocated temporary
    pub fn free(&mut self, temp: u16) {
        assert_eq!(
            temp + 1,
            self.next,
            "temporaries must be released innermost first"
        );
        self.next = temp;
    }

    /// Number of temporaries currently live
    pub fn live(&self) -> u16 {
        self.next
    }

    /// Highest number of temporaries live at once
    pub fn max_used(&self) -> u16 {
        self.max
    }
}

/// Unit being compiled
#[derive(Debug)]
pub struct FunctionContext {
    /// Instructions and side tables
    emitter: Emitter,
    /// Temporary allocator
    temps: TempAllocator,
    /// Current operand-stack depth
    depth: u32,
    /// Largest depth seen
    max_depth: u32,
    /// Current try nesting
    try_depth: u16,
    /// Largest try nesting
    max_try_depth: u16,
    /// Largest call argument count
    max_call_args: u16,
    /// Last line marker emitted
    line: u16,
}

impl Default for FunctionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            emitter: Emitter::new(),
            temps: TempAllocator::default(),
            depth: 0,
            max_depth: 0,
            try_depth: 0,
            max_try_depth: 0,
            max_call_args: 0,
            line: 0,
        }
    }

    fn adjust(&mut self, op: Opcode, count: u16) {
        let (pops, pushes) = op.stack_effect(count);
        assert!(
            self.depth >= pops,
            "{} pops {} values from a stack of depth {}",
            op.name(),
            pops,
            self.depth
        );
        self.depth = self.depth - pops + pushes;
        self.max_depth = self.max_depth.max(self.depth);
    }

    /// Current operand-stack depth
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Reset the depth at a join point reached only by jumps
    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
        self.max_depth = self.max_depth.max(depth);
    }

    /// Emit an operand-less instruction
    pub fn emit(&mut self, op: Opcode) {
        self.emitter.op(op);
        self.adjust(op, 0);
    }

    /// Emit an instruction with one 16-bit operand
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.emitter.op_u16(op, operand);
        self.adjust(op, operand);
    }

    /// Emit an instruction with a flags byte
    pub fn emit_u8(&mut self, op: Opcode, flags: u8) {
        self.emitter.op_u8(op, flags);
        self.adjust(op, 0);
    }

    /// Emit a slot instruction with a flags byte
    pub fn emit_slot_u8(&mut self, op: Opcode, slot: u16, flags: u8) {
        self.emitter.op_u16_u8(op, slot, flags);
        self.adjust(op, 0);
    }

    /// Emit a string-indexed instruction
    pub fn emit_string(&mut self, op: Opcode, s: &str) -> CompileResult<()> {
        self.emitter.op_string(op, s)?;
        self.adjust(op, 0);
        Ok(())
    }

    /// Emit a string-indexed instruction with a flags byte
    pub fn emit_string_u8(&mut self, op: Opcode, s: &str, flags: u8) -> CompileResult<()> {
        self.emitter.op_string_u8(op, s, flags)?;
        self.adjust(op, 0);
        Ok(())
    }

    /// Emit `Call` or `New`
    pub fn emit_call(&mut self, op: Opcode, argc: usize, name: Option<&str>) -> CompileResult<()> {
        let argc = u16::try_from(argc).map_err(|_| CompileError::TooManyArguments(argc))?;
        self.emitter.op_call(op, argc, name)?;
        self.adjust(op, argc);
        self.max_call_args = self.max_call_args.max(argc);
        Ok(())
    }

    /// Push a numeric literal
    pub fn emit_number(&mut self, n: f64) -> CompileResult<()> {
        self.emitter.number(n)?;
        self.adjust(Opcode::Number, 0);
        Ok(())
    }

    /// Push a closure over a nested unit
    pub fn emit_closure(&mut self, idx: u16) {
        self.emitter.closure(idx);
        self.adjust(Opcode::Closure, 0);
    }

    /// Push a regular expression object
    pub fn emit_regexp(&mut self, literal: RegExpLiteral) -> CompileResult<()> {
        self.emitter.regexp(literal)?;
        self.adjust(Opcode::RegExp, 0);
        Ok(())
    }

    /// Emit `Goto`, `IfTrue` or `IfFalse`
    pub fn emit_jump(&mut self, op: Opcode, label: Label) -> CompileResult<()> {
        self.emitter.jump(op, label)?;
        self.adjust(op, 0);
        Ok(())
    }

    /// Call a finally body as a subroutine
    pub fn emit_gosub(&mut self, label: Label, temp: u16) -> CompileResult<()> {
        self.emitter.gosub(label, temp)?;
        self.adjust(Opcode::Gosub, 0);
        Ok(())
    }

    /// Open a try region
    pub fn emit_try(&mut self, catch: Option<Label>, finally: Option<Label>) -> CompileResult<()> {
        self.emitter.try_region(catch, finally)?;
        self.adjust(Opcode::Try, 0);
        Ok(())
    }

    /// Record a statement's line, emitting a marker when it changes.
    /// Lines past `u16::MAX` share the saturated marker.
    pub fn line(&mut self, line: u32) {
        let marker = u16::try_from(line).unwrap_or(u16::MAX);
        if line == 0 || marker == self.line {
            return;
        }
        self.line = marker;
        self.emitter.op_u16(Opcode::Line, marker);
    }

    /// Allocate a label
    #[inline]
    pub fn new_label(&mut self) -> Label {
        self.emitter.new_label()
    }

    /// Bind a label here
    #[inline]
    pub fn mark(&mut self, label: Label) {
        self.emitter.mark(label);
    }

    /// Add a nested unit
    pub fn add_function(&mut self, unit: Arc<FunctionUnit>) -> CompileResult<u16> {
        Ok(self.emitter.add_function(unit)?)
    }

    /// Allocate a temporary slot
    pub fn alloc_temp(&mut self) -> CompileResult<u16> {
        self.temps.alloc()
    }

    /// Release a temporary slot
    pub fn free_temp(&mut self, temp: u16) {
        self.temps.free(temp);
    }

    /// Enter a try statement
    pub fn enter_try(&mut self) {
        self.try_depth += 1;
        self.max_try_depth = self.max_try_depth.max(self.try_depth);
    }

    /// Leave a try statement
    pub fn exit_try(&mut self) {
        self.try_depth -= 1;
    }

    /// Resolve jumps and compute the frame layout
    pub fn finish(self, var_count: u16) -> CompileResult<(EmittedCode, FrameLayout, u16)> {
        debug_assert_eq!(self.temps.live(), 0, "temporaries leaked");
        debug_assert_eq!(self.try_depth, 0, "unbalanced try nesting");

        let emitted = self.emitter.finish()?;
        // Code after an unconditional transfer is compiled but never runs,
        // so the reachable maximum can be lower than the running counter.
        let max_stack = verify::max_stack_depth(&emitted.code)
            .unwrap_or_else(|e| panic!("emitted code fails stack verification: {}", e));
        debug_assert!(max_stack <= self.max_depth);
        let max_stack = u16::try_from(max_stack)
            .map_err(|_| CompileError::internal("operand stack deeper than 65535"))?;

        let layout = FrameLayout::new(
            var_count,
            self.temps.max_used(),
            self.max_try_depth,
            max_stack,
        );
        Ok((emitted, layout, self.max_call_args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temps_nest() {
        let mut temps = TempAllocator::default();
        let a = temps.alloc().unwrap();
        let b = temps.alloc().unwrap();
        temps.free(b);
        let c = temps.alloc().unwrap();
        assert_eq!(c, b);
        temps.free(c);
        temps.free(a);
        assert_eq!(temps.max_used(), 2);
    }

    #[test]
    #[should_panic(expected = "innermost first")]
    fn test_temps_out_of_order() {
        let mut temps = TempAllocator::default();
        let a = temps.alloc().unwrap();
        let _b = temps.alloc().unwrap();
        temps.free(a);
    }

    #[test]
    fn test_depth_tracking() {
        let mut ctx = FunctionContext::new();
        ctx.emit_number(1.0).unwrap();
        ctx.emit_number(2.0).unwrap();
        ctx.emit(Opcode::Dup2);
        assert_eq!(ctx.depth(), 4);
        ctx.emit(Opcode::Add);
        ctx.emit(Opcode::Pop);
        ctx.emit(Opcode::Add);
        ctx.emit(Opcode::Return);
        assert_eq!(ctx.depth(), 0);

        let (_, layout, _) = ctx.finish(0).unwrap();
        assert_eq!(layout.max_stack, 4);
    }

    #[test]
    fn test_call_tracks_argument_count() {
        let mut ctx = FunctionContext::new();
        ctx.emit_string(Opcode::NameAndThis, "f").unwrap();
        for _ in 0..3 {
            ctx.emit(Opcode::Undefined);
        }
        ctx.emit_call(Opcode::Call, 3, Some("f")).unwrap();
        assert_eq!(ctx.depth(), 1);
        ctx.emit(Opcode::Return);
        let (_, layout, max_args) = ctx.finish(0).unwrap();
        assert_eq!(max_args, 3);
        assert_eq!(layout.max_stack, 5);
    }

    #[test]
    fn test_line_markers_saturate() {
        let mut ctx = FunctionContext::new();
        ctx.line(7);
        ctx.line(7);
        ctx.line(70_000);
        ctx.line(80_000);
        ctx.emit(Opcode::End);
        let (code, _, _) = ctx.finish(0).unwrap();
        let lines: Vec<u16> = heron_vm_bytecode::Instructions::new(&code.code)
            .map(|insn| insn.unwrap())
            .filter(|insn| insn.opcode == Opcode::Line)
            .map(|insn| insn.u16(0))
            .collect();
        assert_eq!(lines, vec![7, u16::MAX]);
    }
}
