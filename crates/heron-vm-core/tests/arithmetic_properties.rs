//! Property tests for numeric evaluation
//!
//! Integer literals may be encoded inline (16 or 32 bit) or through the
//! number table; the choice must never change a result.

use std::sync::Arc;

use heron_vm_bytecode::{CodeBuffer, FrameLayout, FunctionUnit, Opcode, UnitFlags};
use heron_vm_compiler::ast::{BinaryOp, Expr, Script, Stmt};
use heron_vm_compiler::{Compiler, resolve_script};
use heron_vm_core::{Context, Value};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Encoding {
    Short,
    Int,
    Table,
}

const ENCODINGS: [Encoding; 3] = [Encoding::Short, Encoding::Int, Encoding::Table];

const OPS: [Opcode; 12] = [
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::BitAnd,
    Opcode::BitOr,
    Opcode::BitXor,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Ushr,
    Opcode::Lt,
];

fn push_integer(code: &mut CodeBuffer, numbers: &mut Vec<f64>, n: i16, encoding: Encoding) {
    match encoding {
        Encoding::Short => {
            code.push_u8(Opcode::Short.to_byte());
            code.push_i16(n);
        }
        Encoding::Int => {
            code.push_u8(Opcode::Int.to_byte());
            code.push_i32(n as i32);
        }
        Encoding::Table => {
            code.push_u8(Opcode::Number.to_byte());
            code.push_u16(numbers.len() as u16);
            numbers.push(n as f64);
        }
    }
}

/// A script unit computing `a op b`
fn binary_unit(a: i16, b: i16, op: Opcode, encoding: Encoding) -> Arc<FunctionUnit> {
    let mut code = CodeBuffer::new();
    let mut numbers = Vec::new();
    push_integer(&mut code, &mut numbers, a, encoding);
    push_integer(&mut code, &mut numbers, b, encoding);
    code.push_u8(op.to_byte());
    code.push_u8(Opcode::Return.to_byte());
    Arc::new(FunctionUnit {
        name: None,
        param_count: 0,
        var_names: Vec::new(),
        code: code.finish(),
        strings: Vec::new(),
        numbers,
        functions: Vec::new(),
        regexps: Vec::new(),
        layout: FrameLayout::new(0, 0, 0, 2),
        max_call_args: 0,
        flags: UnitFlags {
            is_script: true,
            needs_activation: false,
        },
        source_name: "prop.js".into(),
        source: None,
        first_line: 0,
    })
}

fn same_number(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}

fn compiled(op: BinaryOp, a: f64, b: f64) -> Value {
    let mut script = Script::new("prop.js", vec![Stmt::expr(Expr::binary(op, Expr::num(a), Expr::num(b)))]);
    resolve_script(&mut script);
    let unit = Compiler::new().compile(&script).unwrap();
    Context::new().execute_script(unit).unwrap()
}

proptest! {
    #[test]
    fn prop_integer_encodings_agree(
        a in any::<i16>(),
        b in any::<i16>(),
        op in proptest::sample::select(OPS.to_vec()),
    ) {
        let mut ctx = Context::new();
        let results: Vec<Value> = ENCODINGS
            .iter()
            .map(|&encoding| ctx.execute_script(binary_unit(a, b, op, encoding)).unwrap())
            .collect();
        for result in &results[1..] {
            match (&results[0], result) {
                (Value::Number(x), Value::Number(y)) => prop_assert!(same_number(*x, *y)),
                (x, y) => prop_assert_eq!(x, y),
            }
        }
    }

    #[test]
    fn prop_arithmetic_matches_f64(
        a in -1.0e6f64..1.0e6,
        b in -1.0e6f64..1.0e6,
    ) {
        let cases = [
            (BinaryOp::Add, a + b),
            (BinaryOp::Sub, a - b),
            (BinaryOp::Mul, a * b),
            (BinaryOp::Div, a / b),
            (BinaryOp::Mod, a % b),
        ];
        for (op, expected) in cases {
            let Value::Number(actual) = compiled(op, a, b) else {
                return Err(TestCaseError::fail(format!("{:?} produced a non-number", op)));
            };
            prop_assert!(same_number(actual, expected), "{:?}: {} vs {}", op, actual, expected);
        }
    }

    #[test]
    fn prop_int32_operators_wrap(a in any::<i32>(), b in 0u32..64) {
        let expected_shl = a.wrapping_shl(b & 31) as f64;
        let expected_shr = (a >> (b & 31)) as f64;
        let expected_ushr = ((a as u32) >> (b & 31)) as f64;
        prop_assert_eq!(compiled(BinaryOp::Shl, a as f64, b as f64), Value::from(expected_shl));
        prop_assert_eq!(compiled(BinaryOp::Shr, a as f64, b as f64), Value::from(expected_shr));
        prop_assert_eq!(compiled(BinaryOp::Ushr, a as f64, b as f64), Value::from(expected_ushr));
    }
}

#[test]
fn test_division_edge_cases() {
    assert_eq!(compiled(BinaryOp::Div, 1.0, 0.0), Value::from(f64::INFINITY));
    assert_eq!(compiled(BinaryOp::Div, -1.0, 0.0), Value::from(f64::NEG_INFINITY));
    let Value::Number(n) = compiled(BinaryOp::Mod, 5.0, 0.0) else {
        panic!("expected a number");
    };
    assert!(n.is_nan());
}
