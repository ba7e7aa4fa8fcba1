//! Static stack-balance verification
//!
//! Walks every reachable path through a unit's code, tracking operand-stack
//! depth, and reports the maximum depth reached. Every jump must land on an
//! instruction boundary and every join point must be reached with a single
//! depth. Exception handlers (`Try` targets) are entered with exactly the
//! caught value on the stack.
//!
//! [`check_operands`] bounds every table index and frame slot operand, so a
//! unit read from outside the compiler cannot index past its own storage.

use rustc_hash::FxHashMap;

use crate::decode::{DecodedInstruction, Instructions};
use crate::error::{BytecodeError, Result};
use crate::instruction::Opcode;
use crate::operand::{NO_NAME, Operand};
use crate::unit::FunctionUnit;

fn record(
    depths: &mut FxHashMap<usize, u32>,
    work: &mut Vec<(usize, u32)>,
    pc: usize,
    depth: u32,
) -> Result<()> {
    match depths.get(&pc) {
        Some(&seen) if seen != depth => Err(BytecodeError::StackMismatch {
            offset: pc,
            expected: seen,
            found: depth,
        }),
        Some(_) => Ok(()),
        None => {
            depths.insert(pc, depth);
            work.push((pc, depth));
            Ok(())
        }
    }
}

/// Compute the maximum operand-stack depth over all reachable paths
pub fn max_stack_depth(code: &[u8]) -> Result<u32> {
    let insns: FxHashMap<usize, DecodedInstruction> = Instructions::new(code)
        .map(|insn| insn.map(|i| (i.pc, i)))
        .collect::<Result<_>>()?;

    let mut depths = FxHashMap::default();
    let mut work = Vec::new();
    let mut max = 0;
    if !code.is_empty() {
        record(&mut depths, &mut work, 0, 0)?;
    }

    while let Some((pc, depth)) = work.pop() {
        let insn = &insns[&pc];
        let count = match insn.opcode {
            Opcode::NewArray | Opcode::Call | Opcode::New => insn.u16(0),
            _ => 0,
        };
        let (pops, pushes) = insn.opcode.stack_effect(count);
        if pops > depth {
            return Err(BytecodeError::StackUnderflow(pc));
        }
        let after = depth - pops + pushes;
        max = max.max(after).max(depth);

        for target in insn.jump_targets() {
            if target < 0 || !insns.contains_key(&(target as usize)) {
                return Err(BytecodeError::BadJumpTarget { from: pc, target });
            }
            let entry_depth = match insn.opcode {
                Opcode::Try => 1,
                _ => after,
            };
            max = max.max(entry_depth);
            record(&mut depths, &mut work, target as usize, entry_depth)?;
        }

        if insn.opcode.falls_through() {
            let next = insn.next_pc();
            if next < code.len() {
                record(&mut depths, &mut work, next, after)?;
            }
        }
    }

    Ok(max)
}

fn in_range(insn: &DecodedInstruction, region: &'static str, index: u16, len: usize) -> Result<()> {
    if (index as usize) < len {
        return Ok(());
    }
    Err(BytecodeError::OperandOutOfRange {
        offset: insn.pc,
        region,
        index,
        len,
    })
}

/// Check the table and slot operands of one unit against its own tables and
/// frame layout. Nested units are not visited.
pub fn check_operands(unit: &FunctionUnit) -> Result<()> {
    if unit.param_count as usize > unit.var_names.len() {
        return Err(BytecodeError::ParamCount {
            params: unit.param_count,
            names: unit.var_names.len(),
        });
    }
    let vars = unit.layout.var_count as usize;
    let temps = unit.layout.temp_count as usize;

    for insn in unit.instructions() {
        let insn = insn?;
        for (i, kind) in insn.opcode.operands().iter().enumerate() {
            let index = insn.u16(i);
            match kind {
                Operand::String => {
                    let callee_name = matches!(insn.opcode, Opcode::Call | Opcode::New);
                    if !(callee_name && index == NO_NAME) {
                        in_range(&insn, "string", index, unit.strings.len())?;
                    }
                }
                Operand::Number => in_range(&insn, "number", index, unit.numbers.len())?,
                Operand::Function => in_range(&insn, "function", index, unit.functions.len())?,
                Operand::RegExp => in_range(&insn, "regexp", index, unit.regexps.len())?,
                _ => {}
            }
        }

        match insn.opcode {
            Opcode::GetVar | Opcode::SetVar | Opcode::VarIncDec => {
                in_range(&insn, "variable", insn.u16(0), vars)?
            }
            Opcode::LoadTemp
            | Opcode::StoreTemp
            | Opcode::EnumInit
            | Opcode::EnumNext
            | Opcode::EnumId
            | Opcode::RetSub
            | Opcode::Rethrow => in_range(&insn, "temporary", insn.u16(0), temps)?,
            Opcode::Gosub => in_range(&insn, "temporary", insn.u16(1), temps)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{EmittedCode, Emitter};
    use crate::layout::FrameLayout;
    use crate::unit::UnitFlags;

    fn unit(out: EmittedCode, layout: FrameLayout) -> FunctionUnit {
        FunctionUnit {
            name: Some("f".to_string()),
            param_count: 0,
            var_names: vec!["x".to_string()],
            code: out.code,
            strings: out.strings,
            numbers: out.numbers,
            functions: out.functions,
            regexps: out.regexps,
            layout,
            max_call_args: 0,
            flags: UnitFlags::default(),
            source_name: "test.js".to_string(),
            source: None,
            first_line: 1,
        }
    }

    fn named_lookup() -> EmittedCode {
        let mut e = Emitter::new();
        e.op_string(Opcode::NameAndThis, "print").unwrap();
        e.op_call(Opcode::Call, 0, None).unwrap();
        e.op_u16(Opcode::SetVar, 0);
        e.op(Opcode::Return);
        e.finish().unwrap()
    }

    #[test]
    fn test_straight_line() {
        let mut e = Emitter::new();
        e.number(1.0).unwrap();
        e.number(2.0).unwrap();
        e.number(3.0).unwrap();
        e.op(Opcode::Mul);
        e.op(Opcode::Add);
        e.op(Opcode::Return);
        let out = e.finish().unwrap();
        assert_eq!(max_stack_depth(&out.code), Ok(3));
    }

    #[test]
    fn test_branch_join() {
        let mut e = Emitter::new();
        let other = e.new_label();
        let end = e.new_label();
        e.op(Opcode::True);
        e.jump(Opcode::IfFalse, other).unwrap();
        e.op(Opcode::One);
        e.jump(Opcode::Goto, end).unwrap();
        e.mark(other);
        e.op(Opcode::Zero);
        e.mark(end);
        e.op(Opcode::Return);
        let out = e.finish().unwrap();
        assert_eq!(max_stack_depth(&out.code), Ok(1));
    }

    #[test]
    fn test_mismatched_join() {
        let mut e = Emitter::new();
        let end = e.new_label();
        e.op(Opcode::True);
        e.jump(Opcode::IfFalse, end).unwrap();
        e.op(Opcode::One);
        e.mark(end);
        e.op(Opcode::ReturnUndefined);
        let out = e.finish().unwrap();
        assert!(matches!(
            max_stack_depth(&out.code),
            Err(BytecodeError::StackMismatch { .. })
        ));
    }

    #[test]
    fn test_underflow() {
        let mut e = Emitter::new();
        e.op(Opcode::Pop);
        e.op(Opcode::End);
        let out = e.finish().unwrap();
        assert_eq!(max_stack_depth(&out.code), Err(BytecodeError::StackUnderflow(0)));
    }

    #[test]
    fn test_catch_handler_entered_with_one_value() {
        let mut e = Emitter::new();
        let catch = e.new_label();
        let end = e.new_label();
        e.try_region(Some(catch), None).unwrap();
        e.op(Opcode::One);
        e.op(Opcode::Throw);
        e.mark(catch);
        e.op(Opcode::PopResult);
        e.mark(end);
        e.op(Opcode::End);
        let out = e.finish().unwrap();
        assert_eq!(max_stack_depth(&out.code), Ok(1));
    }

    #[test]
    fn test_jump_into_instruction_is_rejected() {
        let mut e = Emitter::new();
        let label = e.new_label();
        e.jump(Opcode::Goto, label).unwrap();
        e.op_u16(Opcode::GetVar, 0);
        e.op(Opcode::End);
        // Bind the label one byte into GetVar
        let mut out = e;
        out.mark(label);
        let out = out.finish().unwrap();
        let mut code = out.code.to_vec();
        code[1..3].copy_from_slice(&4i16.to_be_bytes());
        assert!(matches!(
            max_stack_depth(&code),
            Err(BytecodeError::BadJumpTarget { from: 0, target: 4 })
        ));
    }

    #[test]
    fn test_operands_in_range() {
        let u = unit(named_lookup(), FrameLayout::new(1, 0, 0, 2));
        assert_eq!(check_operands(&u), Ok(()));
    }

    #[test]
    fn test_missing_string_entry_is_rejected() {
        let mut u = unit(named_lookup(), FrameLayout::new(1, 0, 0, 2));
        u.strings.clear();
        assert_eq!(
            check_operands(&u),
            Err(BytecodeError::OperandOutOfRange {
                offset: 0,
                region: "string",
                index: 0,
                len: 0,
            })
        );
    }

    #[test]
    fn test_slot_past_layout_is_rejected() {
        let u = unit(named_lookup(), FrameLayout::new(0, 0, 0, 2));
        assert!(matches!(
            check_operands(&u),
            Err(BytecodeError::OperandOutOfRange { region: "variable", index: 0, .. })
        ));

        let mut e = Emitter::new();
        e.op_u16(Opcode::LoadTemp, 3);
        e.op(Opcode::Return);
        let u = unit(e.finish().unwrap(), FrameLayout::new(1, 2, 0, 1));
        assert!(matches!(
            check_operands(&u),
            Err(BytecodeError::OperandOutOfRange { region: "temporary", index: 3, len: 2, .. })
        ));
    }

    #[test]
    fn test_param_count_past_names_is_rejected() {
        let mut u = unit(named_lookup(), FrameLayout::new(1, 0, 0, 2));
        u.param_count = 2;
        assert_eq!(
            check_operands(&u),
            Err(BytecodeError::ParamCount { params: 2, names: 1 })
        );
    }
}
