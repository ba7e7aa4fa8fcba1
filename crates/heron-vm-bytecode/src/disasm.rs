//! Human-readable dump of compiled units

use std::fmt::Write;

use crate::decode::DecodedInstruction;
use crate::instruction::{INCDEC_DECREMENT, INCDEC_POSTFIX};
use crate::operand::{NO_NAME, Operand};
use crate::unit::FunctionUnit;

fn incdec(flags: i32) -> &'static str {
    let flags = flags as u8;
    match (flags & INCDEC_DECREMENT != 0, flags & INCDEC_POSTFIX != 0) {
        (false, false) => "++x",
        (false, true) => "x++",
        (true, false) => "--x",
        (true, true) => "x--",
    }
}

fn operand_text(unit: &FunctionUnit, insn: &DecodedInstruction, kind: Operand, value: i32) -> String {
    match kind {
        Operand::String if value as u16 == NO_NAME => "-".to_string(),
        Operand::String => format!("{:?}", unit.strings.get(value as usize).map_or("?", String::as_str)),
        Operand::Number => unit
            .numbers
            .get(value as usize)
            .map_or_else(|| "?".to_string(), |n| n.to_string()),
        Operand::Function => format!(
            "<{}>",
            unit.functions
                .get(value as usize)
                .map_or("?", |f| f.display_name())
        ),
        Operand::RegExp => unit
            .regexps
            .get(value as usize)
            .map_or_else(|| "?".to_string(), |r| format!("/{}/{}", r.pattern, r.flags)),
        Operand::Jump if value == 0 => "-".to_string(),
        Operand::Jump => format!("-> {}", insn.pc as isize + value as isize),
        Operand::U8 => incdec(value).to_string(),
        Operand::U16 | Operand::I16 | Operand::I32 => value.to_string(),
    }
}

fn dump_unit(unit: &FunctionUnit, out: &mut String) {
    let layout = unit.layout;
    let _ = writeln!(
        out,
        "function {} ({}): params={} vars={} temps={} try={} stack={} args={}{}",
        unit.display_name(),
        unit.source_name,
        unit.param_count,
        layout.var_count,
        layout.temp_count,
        layout.try_depth,
        layout.max_stack,
        unit.max_call_args,
        if unit.needs_activation() { " activation" } else { "" },
    );
    for insn in unit.instructions() {
        match insn {
            Ok(insn) => {
                let _ = write!(out, "  {:5}  {}", insn.pc, insn.opcode.name());
                for (kind, value) in insn.opcode.operands().iter().zip(insn.operands) {
                    let _ = write!(out, " {}", operand_text(unit, &insn, *kind, value));
                }
                out.push('\n');
            }
            Err(e) => {
                let _ = writeln!(out, "  !! {}", e);
                break;
            }
        }
    }
    for nested in &unit.functions {
        out.push('\n');
        dump_unit(nested, out);
    }
}

/// Render a unit and its nested functions as text
pub fn disassemble(unit: &FunctionUnit) -> String {
    let mut out = String::new();
    dump_unit(unit, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Emitter;
    use crate::instruction::Opcode;
    use crate::layout::FrameLayout;
    use crate::unit::UnitFlags;

    #[test]
    fn test_disassemble_names_and_operands() {
        let mut e = Emitter::new();
        e.op_string(Opcode::Name, "print").unwrap();
        e.op(Opcode::Undefined);
        e.number(2.5).unwrap();
        e.op_call(Opcode::Call, 1, Some("print")).unwrap();
        e.op(Opcode::Pop);
        e.op(Opcode::End);
        let out = e.finish().unwrap();

        let unit = FunctionUnit {
            name: None,
            param_count: 0,
            var_names: Vec::new(),
            code: out.code,
            strings: out.strings,
            numbers: out.numbers,
            functions: out.functions,
            regexps: out.regexps,
            layout: FrameLayout::new(0, 0, 0, 3),
            max_call_args: 1,
            flags: UnitFlags {
                is_script: true,
                needs_activation: false,
            },
            source_name: "test.js".to_string(),
            source: None,
            first_line: 1,
        };

        let text = disassemble(&unit);
        assert!(text.starts_with("function <script> (test.js)"));
        assert!(text.contains("Name \"print\""));
        assert!(text.contains("Number 2.5"));
        assert!(text.contains("Call 1 \"print\""));
        assert!(text.contains("End"));
    }
}
