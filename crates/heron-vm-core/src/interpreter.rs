//! Bytecode interpreter
//!
//! Executes one [`FunctionUnit`] per native call of [`call_closure`]. Calls
//! between script functions recurse directly, passing the caller's argument
//! window by reference; host functions receive an owned argument vector.
//!
//! The dispatch loop propagates failures with `?`. An enclosing loop catches
//! them, consults the frame's try-region stack and either resumes at a
//! handler or lets the error leave the frame.

use std::sync::Arc;

use heron_vm_bytecode::decode::decode_at;
use heron_vm_bytecode::instruction::{INCDEC_DECREMENT, INCDEC_POSTFIX};
use heron_vm_bytecode::operand::jump_target;
use heron_vm_bytecode::{DecodedInstruction, FunctionUnit, NO_NAME, Opcode};
use tracing::trace;

use crate::context::Context;
use crate::convert::{self, Hint};
use crate::debug::DebugHooks;
use crate::error::{ThrownValue, VmError, VmResult};
use crate::frame::{Enumerator, Frame, TempSlot, ThrowSite, TrySave};
use crate::object::{Closure, JsObject, ObjectKind, PropertyAttributes, PropertyKey};
use crate::scope::ScopeKind;
use crate::value::Value;

/// Invoke a script function
pub(crate) fn call_closure(
    ctx: &mut Context,
    closure: &Closure,
    this: Value,
    args: &[Value],
) -> VmResult<Value> {
    ctx.enter_call()?;
    let result = invoke(ctx, closure, this, args);
    ctx.exit_call();
    result
}

fn invoke(ctx: &mut Context, closure: &Closure, this: Value, args: &[Value]) -> VmResult<Value> {
    let unit = closure.unit.clone();
    let mut frame = enter_frame(ctx, closure, this, args);
    let hooks = ctx.debug_hooks().cloned();

    trace!(function = unit.display_name(), depth = ctx.call_depth(), "Enter frame");
    if let Some(hooks) = &hooks {
        hooks.on_enter(&unit);
    }
    let result = run(ctx, &mut frame, hooks.as_deref());
    if let Some(hooks) = &hooks {
        hooks.on_exit(&unit, result.is_ok());
    }
    trace!(function = unit.display_name(), ok = result.is_ok(), "Exit frame");

    result.map_err(|err| leave_frame_error(ctx, &frame, err))
}

/// Build the frame: bind `this`, then place arguments in slots or in a
/// fresh activation object
fn enter_frame(ctx: &Context, closure: &Closure, this: Value, args: &[Value]) -> Frame {
    let unit = &closure.unit;
    let this = if unit.is_script() || !this.is_nullish() {
        this
    } else {
        Value::Object(ctx.global().clone())
    };
    let param_count = unit.param_count as usize;

    if unit.is_script() {
        // Hoisted declarations exist before the first statement runs
        let variables = closure.scope.variable_object();
        for name in &unit.var_names {
            variables.define_if_absent(PropertyKey::from(name.as_str()), Value::Undefined);
        }
        return Frame::new(unit.clone(), this, closure.scope.clone(), Vec::new());
    }

    if unit.needs_activation() {
        let activation = Arc::new(JsObject::ordinary(None));
        activation.define(
            "arguments".into(),
            Value::Object(ctx.new_array(args.to_vec())),
            PropertyAttributes::hidden(),
        );
        for (i, name) in unit.var_names.iter().take(param_count).enumerate() {
            let value = args.get(i).cloned().unwrap_or_default();
            activation.set(PropertyKey::from(name.as_str()), value);
        }
        for name in unit.local_names() {
            activation.define_if_absent(PropertyKey::from(name.as_str()), Value::Undefined);
        }
        let scope = closure.scope.with_activation(activation);
        return Frame::new(unit.clone(), this, scope, Vec::new());
    }

    let var_count = unit.layout.var_count as usize;
    let mut vars = Vec::with_capacity(var_count);
    vars.extend(args.iter().take(param_count.min(var_count)).cloned());
    vars.resize(var_count, Value::Undefined);
    Frame::new(unit.clone(), this, closure.scope.clone(), vars)
}

/// Attach the frame's location to an error leaving it. Runtime errors
/// become thrown error objects so callers catch them like any other value.
fn leave_frame_error(ctx: &Context, frame: &Frame, err: VmError) -> VmError {
    let source_name = Some(frame.unit.source_name.clone());
    let line = (frame.line > 0).then_some(frame.line);
    if let Some((name, message)) = err.runtime_parts() {
        let value = Value::Object(ctx.new_error(name, message));
        return VmError::Exception(Box::new(ThrownValue {
            value,
            message: format!("{}: {}", name, message),
            source_name,
            line,
        }));
    }
    match err {
        VmError::Exception(mut thrown) => {
            if thrown.source_name.is_none() {
                thrown.source_name = source_name;
                thrown.line = line;
            }
            VmError::Exception(thrown)
        }
        other => other,
    }
}

fn run(ctx: &mut Context, frame: &mut Frame, hooks: Option<&dyn DebugHooks>) -> VmResult<Value> {
    loop {
        match execute(ctx, frame, hooks) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if let Some(hooks) = hooks {
                    hooks.on_exception(&frame.unit, &err);
                }
                unwind(ctx, frame, err)?;
            }
        }
    }
}

/// Transfer control to the innermost handler for a catchable error.
///
/// Host failures and fatal errors skip every handler, finally bodies
/// included.
fn unwind(ctx: &mut Context, frame: &mut Frame, err: VmError) -> VmResult<()> {
    if !err.is_catchable() || frame.try_stack.is_empty() {
        return Err(err);
    }
    let site = throw_site(frame, &err);
    let value = exception_value(ctx, err);

    while let Some(save) = frame.try_stack.pop() {
        let region = decode_at(&frame.unit.code, save.try_pc)?;
        assert_eq!(
            region.opcode,
            Opcode::Try,
            "try save does not point at a Try instruction"
        );
        let catch = jump_target(save.try_pc, region.operands[0] as i16);
        let finally = jump_target(save.try_pc, region.operands[1] as i16);

        frame.stack.clear();
        frame.scope = save.scope.clone();
        let handler = match (catch, finally) {
            (Some(catch), finally) if !save.catch_taken => {
                // The finally still has to run after the catch body
                if finally.is_some() {
                    frame.try_stack.push(TrySave {
                        catch_taken: true,
                        ..save
                    });
                }
                frame.pending_site = None;
                catch
            }
            (_, Some(finally)) => {
                frame.pending_site = Some(site.clone());
                finally
            }
            (_, None) => continue,
        };

        trace!(
            function = frame.unit.display_name(),
            handler,
            "Unwinding to handler"
        );
        frame.push(value);
        frame.pc = handler;
        frame.counted_from = handler;
        return Ok(());
    }

    Err(rethrow(ctx, value, Some(site)))
}

/// Where a catchable error was first thrown. Errors raised in this frame
/// take its current line.
fn throw_site(frame: &Frame, err: &VmError) -> ThrowSite {
    match err {
        VmError::Exception(thrown) if thrown.source_name.is_some() => ThrowSite {
            source_name: thrown.source_name.clone(),
            line: thrown.line,
        },
        _ => ThrowSite {
            source_name: Some(frame.unit.source_name.clone()),
            line: (frame.line > 0).then_some(frame.line),
        },
    }
}

/// Raise `value` again, keeping its original location when known
fn rethrow(ctx: &mut Context, value: Value, site: Option<ThrowSite>) -> VmError {
    let message = convert::describe(ctx, &value);
    let site = site.unwrap_or_default();
    VmError::Exception(Box::new(ThrownValue {
        value,
        message,
        source_name: site.source_name,
        line: site.line,
    }))
}

/// Script-visible value of a catchable error
fn exception_value(ctx: &Context, err: VmError) -> Value {
    if let Some((name, message)) = err.runtime_parts() {
        return Value::Object(ctx.new_error(name, message));
    }
    match err {
        VmError::Exception(thrown) => thrown.value,
        _ => Value::Undefined,
    }
}

#[inline]
fn jump(insn: &DecodedInstruction) -> usize {
    (insn.pc as isize + insn.operands[0] as isize) as usize
}

/// Charge the straight-line run ending at `end` to the instruction budget
/// and start the next run at `resume`
#[inline]
fn charge(ctx: &mut Context, frame: &mut Frame, end: usize, resume: usize) -> VmResult<()> {
    let executed = end.saturating_sub(frame.counted_from) as u64;
    frame.counted_from = resume;
    ctx.observe_instructions(executed)
}

#[inline]
fn incdec(old: f64, flags: u8) -> (f64, f64) {
    let new = if flags & INCDEC_DECREMENT != 0 {
        old - 1.0
    } else {
        old + 1.0
    };
    let result = if flags & INCDEC_POSTFIX != 0 { old } else { new };
    (new, result)
}

fn string_constant(unit: &FunctionUnit, idx: u16) -> Value {
    Value::String(Arc::from(unit.string(idx)))
}

fn name_operand(unit: &FunctionUnit, idx: u16) -> Option<&str> {
    (idx != NO_NAME).then(|| unit.string(idx))
}

fn not_defined(name: &str) -> VmError {
    VmError::reference_error(format!("{} is not defined", name))
}

fn not_a_function(ctx: &mut Context, unit: &FunctionUnit, callee: &Value, name: u16) -> VmError {
    let shown = match name_operand(unit, name) {
        Some(name) => name.to_string(),
        None => convert::describe(ctx, callee),
    };
    VmError::type_error(format!("{} is not a function", shown))
}

fn nullish_name(value: &Value) -> &'static str {
    if value.is_undefined() { "undefined" } else { "null" }
}

fn get_property(base: &Value, key: &PropertyKey) -> VmResult<Value> {
    match base {
        Value::Object(obj) => Ok(obj.get(key)),
        Value::String(s) => Ok(match key {
            PropertyKey::String(name) if &**name == "length" => {
                Value::Number(s.encode_utf16().count() as f64)
            }
            PropertyKey::Index(i) => s
                .encode_utf16()
                .nth(*i as usize)
                .map(|unit| Value::from(String::from_utf16_lossy(&[unit])))
                .unwrap_or_default(),
            PropertyKey::String(_) => Value::Undefined,
        }),
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot read property '{}' of {}",
            key,
            nullish_name(base)
        ))),
        Value::Boolean(_) | Value::Number(_) => Ok(Value::Undefined),
    }
}

fn set_property(base: &Value, key: PropertyKey, value: Value) -> VmResult<()> {
    match base {
        Value::Object(obj) => {
            obj.set(key, value);
            Ok(())
        }
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot set property '{}' of {}",
            key,
            nullish_name(base)
        ))),
        // Writes to primitives are discarded
        _ => Ok(()),
    }
}

fn delete_property(base: &Value, key: &PropertyKey) -> VmResult<bool> {
    match base {
        Value::Object(obj) => Ok(obj.delete(key)),
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot delete property '{}' of {}",
            key,
            nullish_name(base)
        ))),
        _ => Ok(true),
    }
}

fn instance_of(value: &Value, ctor: &Value) -> VmResult<bool> {
    let Some(ctor) = ctor.as_object().filter(|c| c.is_callable()) else {
        return Err(VmError::type_error(
            "Right-hand side of 'instanceof' is not callable",
        ));
    };
    let Some(obj) = value.as_object() else {
        return Ok(false);
    };
    match ctor.get(&"prototype".into()) {
        Value::Object(proto) => Ok(obj.inherits_from(&proto)),
        _ => Err(VmError::type_error(
            "Function has non-object prototype in instanceof check",
        )),
    }
}

/// Pop two operands and convert both to numbers, left first
fn numeric_operands(ctx: &mut Context, frame: &mut Frame) -> VmResult<(f64, f64)> {
    let b = frame.pop();
    let a = frame.pop();
    if let (Value::Number(x), Value::Number(y)) = (&a, &b) {
        return Ok((*x, *y));
    }
    let x = convert::to_number(ctx, &a)?;
    let y = convert::to_number(ctx, &b)?;
    Ok((x, y))
}

/// Pop two operands for a relational operator
fn relational_operands(ctx: &mut Context, frame: &mut Frame) -> VmResult<(Value, Value)> {
    let b = frame.pop();
    let a = frame.pop();
    let a = convert::to_primitive(ctx, &a, Hint::Number)?;
    let b = convert::to_primitive(ctx, &b, Hint::Number)?;
    Ok((a, b))
}

/// Execute until the frame returns or an error escapes the current
/// instruction
fn execute(
    ctx: &mut Context,
    frame: &mut Frame,
    hooks: Option<&dyn DebugHooks>,
) -> VmResult<Value> {
    let unit = frame.unit.clone();
    let code: &[u8] = &unit.code;

    loop {
        let pc = frame.pc;
        let insn = decode_at(code, pc)?;
        let next = insn.next_pc();
        frame.pc = next;

        match insn.opcode {
            // ==================== Literals ====================
            Opcode::Undefined => frame.push(Value::Undefined),
            Opcode::Null => frame.push(Value::Null),
            Opcode::True => frame.push(Value::Boolean(true)),
            Opcode::False => frame.push(Value::Boolean(false)),
            Opcode::Zero => frame.push(Value::Number(0.0)),
            Opcode::One => frame.push(Value::Number(1.0)),
            Opcode::Short | Opcode::Int => frame.push(Value::Number(insn.operands[0] as f64)),
            Opcode::Number => frame.push(Value::Number(unit.number(insn.u16(0)))),
            Opcode::String => frame.push(string_constant(&unit, insn.u16(0))),
            Opcode::This => frame.push(frame.this.clone()),
            Opcode::RegExp => {
                let literal = unit.regexp(insn.u16(0));
                let regexp = ctx.new_regexp(&literal.pattern, &literal.flags);
                frame.push(Value::Object(regexp));
            }
            Opcode::Closure => {
                let template = unit.function(insn.u16(0)).clone();
                let function = ctx.new_function(template, frame.scope.clone());
                frame.push(Value::Object(function));
            }

            // ==================== Stack ====================
            Opcode::Pop => {
                frame.pop();
            }
            Opcode::PopResult => frame.result = frame.pop(),
            Opcode::Dup => frame.push(frame.peek(0).clone()),
            Opcode::Dup2 => {
                let a = frame.peek(1).clone();
                let b = frame.peek(0).clone();
                frame.push(a);
                frame.push(b);
            }
            Opcode::Swap => {
                let len = frame.stack.len();
                assert!(len >= 2, "operand stack underflow at pc {}", pc);
                frame.stack.swap(len - 1, len - 2);
            }

            // ==================== Slots ====================
            Opcode::GetVar => frame.push(frame.vars[insn.u16(0) as usize].clone()),
            Opcode::SetVar => frame.vars[insn.u16(0) as usize] = frame.peek(0).clone(),
            Opcode::VarIncDec => {
                let slot = insn.u16(0) as usize;
                let old = frame.vars[slot].clone();
                let old = convert::to_number(ctx, &old)?;
                let (new, result) = incdec(old, insn.operands[1] as u8);
                frame.vars[slot] = Value::Number(new);
                frame.push(Value::Number(result));
            }
            Opcode::LoadTemp => frame.push(frame.temp_value(insn.u16(0))),
            Opcode::StoreTemp => {
                let value = frame.pop();
                frame.store_temp(insn.u16(0), value);
            }

            // ==================== Names ====================
            Opcode::Name => {
                let name = unit.string(insn.u16(0));
                match frame.scope.get(&PropertyKey::from(name)) {
                    Some(value) => frame.push(value),
                    None => return Err(not_defined(name)),
                }
            }
            Opcode::BindName => {
                let key = PropertyKey::from(unit.string(insn.u16(0)));
                let holder = frame.scope.bind(&key).clone();
                frame.push(Value::Object(holder));
            }
            Opcode::SetName => {
                let value = frame.pop();
                let holder = frame.pop();
                let key = PropertyKey::from(unit.string(insn.u16(0)));
                set_property(&holder, key, value.clone())?;
                frame.push(value);
            }
            Opcode::NameAndThis => {
                let name = unit.string(insn.u16(0));
                match frame.scope.get_with_this(&PropertyKey::from(name)) {
                    Some((value, this)) => {
                        frame.push(value);
                        frame.push(this);
                    }
                    None => return Err(not_defined(name)),
                }
            }
            Opcode::TypeOfName => {
                let key = PropertyKey::from(unit.string(insn.u16(0)));
                let kind = frame
                    .scope
                    .get(&key)
                    .map_or("undefined", |value| value.type_of());
                frame.push(Value::from(kind));
            }
            Opcode::NameIncDec => {
                let name = unit.string(insn.u16(0));
                let key = PropertyKey::from(name);
                let Some(holder) = frame.scope.lookup(&key).map(|s| s.object().clone()) else {
                    return Err(not_defined(name));
                };
                let old = convert::to_number(ctx, &holder.get(&key))?;
                let (new, result) = incdec(old, insn.operands[1] as u8);
                holder.set(key, Value::Number(new));
                frame.push(Value::Number(result));
            }

            // ==================== Properties ====================
            Opcode::GetProp => {
                let base = frame.pop();
                let key = PropertyKey::from(unit.string(insn.u16(0)));
                frame.push(get_property(&base, &key)?);
            }
            Opcode::SetProp => {
                let value = frame.pop();
                let base = frame.pop();
                let key = PropertyKey::from(unit.string(insn.u16(0)));
                set_property(&base, key, value.clone())?;
                frame.push(value);
            }
            Opcode::GetElem => {
                let key = frame.pop();
                let base = frame.pop();
                let key = convert::to_property_key(ctx, &key)?;
                frame.push(get_property(&base, &key)?);
            }
            Opcode::SetElem => {
                let value = frame.pop();
                let key = frame.pop();
                let base = frame.pop();
                let key = convert::to_property_key(ctx, &key)?;
                set_property(&base, key, value.clone())?;
                frame.push(value);
            }
            Opcode::DelProp => {
                let key = frame.pop();
                let base = frame.pop();
                let key = convert::to_property_key(ctx, &key)?;
                frame.push(Value::Boolean(delete_property(&base, &key)?));
            }
            Opcode::PropIncDec => {
                let base = frame.pop();
                let key = PropertyKey::from(unit.string(insn.u16(0)));
                let old = convert::to_number(ctx, &get_property(&base, &key)?)?;
                let (new, result) = incdec(old, insn.operands[1] as u8);
                set_property(&base, key, Value::Number(new))?;
                frame.push(Value::Number(result));
            }
            Opcode::ElemIncDec => {
                let key = frame.pop();
                let base = frame.pop();
                let key = convert::to_property_key(ctx, &key)?;
                let old = convert::to_number(ctx, &get_property(&base, &key)?)?;
                let (new, result) = incdec(old, insn.operands[0] as u8);
                set_property(&base, key, Value::Number(new))?;
                frame.push(Value::Number(result));
            }
            Opcode::NewArray => {
                let count = insn.u16(0) as usize;
                let len = frame.stack.len();
                assert!(count <= len, "operand stack underflow at pc {}", pc);
                let elements = frame.stack.split_off(len - count);
                frame.push(Value::Object(ctx.new_array(elements)));
            }
            Opcode::NewObject => frame.push(Value::Object(ctx.new_object())),

            // ==================== Arithmetic ====================
            Opcode::Add => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(convert::add(ctx, &a, &b)?);
            }
            Opcode::Sub => {
                let (x, y) = numeric_operands(ctx, frame)?;
                frame.push(Value::Number(x - y));
            }
            Opcode::Mul => {
                let (x, y) = numeric_operands(ctx, frame)?;
                frame.push(Value::Number(x * y));
            }
            Opcode::Div => {
                let (x, y) = numeric_operands(ctx, frame)?;
                frame.push(Value::Number(x / y));
            }
            Opcode::Mod => {
                let (x, y) = numeric_operands(ctx, frame)?;
                frame.push(Value::Number(x % y));
            }
            Opcode::Neg => {
                let value = frame.pop();
                frame.push(Value::Number(-convert::to_number(ctx, &value)?));
            }
            Opcode::Pos => {
                let value = frame.pop();
                frame.push(Value::Number(convert::to_number(ctx, &value)?));
            }
            Opcode::BitNot => {
                let value = frame.pop();
                let n = convert::to_int32(convert::to_number(ctx, &value)?);
                frame.push(Value::Number(f64::from(!n)));
            }
            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::Shl | Opcode::Shr => {
                let (x, y) = numeric_operands(ctx, frame)?;
                let (x, y) = (convert::to_int32(x), convert::to_int32(y));
                let n = match insn.opcode {
                    Opcode::BitAnd => x & y,
                    Opcode::BitOr => x | y,
                    Opcode::BitXor => x ^ y,
                    Opcode::Shl => x.wrapping_shl(y as u32 & 31),
                    _ => x >> (y as u32 & 31),
                };
                frame.push(Value::Number(f64::from(n)));
            }
            Opcode::Ushr => {
                let (x, y) = numeric_operands(ctx, frame)?;
                let n = convert::to_uint32(x) >> (convert::to_uint32(y) & 31);
                frame.push(Value::Number(f64::from(n)));
            }
            Opcode::Not => {
                let value = frame.pop();
                frame.push(Value::Boolean(!convert::to_boolean(&value)));
            }

            // ==================== Comparison ====================
            Opcode::Eq | Opcode::Ne => {
                let b = frame.pop();
                let a = frame.pop();
                let equal = convert::loose_equals(ctx, &a, &b)?;
                frame.push(Value::Boolean(equal == (insn.opcode == Opcode::Eq)));
            }
            Opcode::StrictEq => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(Value::Boolean(a == b));
            }
            Opcode::StrictNe => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(Value::Boolean(a != b));
            }
            Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let (a, b) = relational_operands(ctx, frame)?;
                // a <= b is !(b < a); NaN makes every comparison false
                let result = match insn.opcode {
                    Opcode::Lt => convert::primitive_less_than(&a, &b) == Some(true),
                    Opcode::Gt => convert::primitive_less_than(&b, &a) == Some(true),
                    Opcode::Le => convert::primitive_less_than(&b, &a) == Some(false),
                    _ => convert::primitive_less_than(&a, &b) == Some(false),
                };
                frame.push(Value::Boolean(result));
            }
            Opcode::In => {
                let target = frame.pop();
                let key = frame.pop();
                let Value::Object(obj) = &target else {
                    let key = convert::describe(ctx, &key);
                    let target = convert::describe(ctx, &target);
                    return Err(VmError::type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key, target
                    )));
                };
                let key = convert::to_property_key(ctx, &key)?;
                frame.push(Value::Boolean(obj.has(&key)));
            }
            Opcode::InstanceOf => {
                let ctor = frame.pop();
                let value = frame.pop();
                frame.push(Value::Boolean(instance_of(&value, &ctor)?));
            }
            Opcode::TypeOf => {
                let value = frame.pop();
                frame.push(Value::from(value.type_of()));
            }

            // ==================== Control Flow ====================
            Opcode::Goto => {
                let target = jump(&insn);
                charge(ctx, frame, next, target)?;
                frame.pc = target;
            }
            Opcode::IfTrue | Opcode::IfFalse => {
                let value = frame.pop();
                let taken = convert::to_boolean(&value) == (insn.opcode == Opcode::IfTrue);
                let target = if taken { jump(&insn) } else { next };
                charge(ctx, frame, next, target)?;
                frame.pc = target;
            }
            Opcode::Gosub => {
                let target = jump(&insn);
                frame.temps[insn.u16(1) as usize] = TempSlot::Resume(next);
                charge(ctx, frame, next, target)?;
                frame.pc = target;
            }
            Opcode::RetSub => {
                let slot = insn.u16(0);
                let resume = match &frame.temps[slot as usize] {
                    TempSlot::Resume(resume) => *resume,
                    other => panic!("temporary {} holds {:?}, expected a resume point", slot, other),
                };
                charge(ctx, frame, next, resume)?;
                frame.pc = resume;
            }

            // ==================== Scope ====================
            Opcode::EnterWith => {
                let value = frame.pop();
                let Value::Object(obj) = value else {
                    let shown = convert::describe(ctx, &value);
                    return Err(VmError::type_error(format!(
                        "{} cannot be used as a with scope",
                        shown
                    )));
                };
                frame.scope = frame.scope.with_object(obj);
            }
            Opcode::LeaveWith => {
                assert_eq!(frame.scope.kind(), ScopeKind::With, "LeaveWith outside with at pc {}", pc);
                let parent = frame.scope.parent().cloned();
                if let Some(parent) = parent {
                    frame.scope = parent;
                }
            }
            Opcode::EnumInit => {
                let value = frame.pop();
                let enumerator = match value {
                    Value::Object(obj) => Enumerator::new(obj),
                    Value::String(s) => Enumerator::string_indices(s.encode_utf16().count()),
                    _ => Enumerator::default(),
                };
                frame.temps[insn.u16(0) as usize] = TempSlot::Enumerator(enumerator);
            }
            Opcode::EnumNext => {
                let more = frame.enumerator(insn.u16(0)).advance();
                frame.push(Value::Boolean(more));
            }
            Opcode::EnumId => {
                let key = frame.enumerator(insn.u16(0)).current().cloned();
                frame.push(key.map(Value::String).unwrap_or_default());
            }

            // ==================== Calls ====================
            Opcode::Call => {
                charge(ctx, frame, next, next)?;
                let argc = insn.u16(0) as usize;
                assert!(
                    frame.stack.len() >= argc + 2,
                    "operand stack underflow at pc {}",
                    pc
                );
                let base = frame.stack.len() - argc;
                let callee = frame.stack[base - 2].clone();
                let this = frame.stack[base - 1].clone();
                let result = match callee.as_object().map(|obj| obj.kind()) {
                    Some(ObjectKind::Function(closure)) => {
                        let closure = closure.clone();
                        call_closure(ctx, &closure, this, &frame.stack[base..])?
                    }
                    Some(ObjectKind::Native(native)) => {
                        let native = native.clone();
                        native.call(ctx, this, frame.stack[base..].to_vec())?
                    }
                    _ => return Err(not_a_function(ctx, &unit, &callee, insn.u16(1))),
                };
                frame.stack.truncate(base - 2);
                frame.push(result);
            }
            Opcode::New => {
                charge(ctx, frame, next, next)?;
                let argc = insn.u16(0) as usize;
                assert!(
                    frame.stack.len() > argc,
                    "operand stack underflow at pc {}",
                    pc
                );
                let args = frame.stack.split_off(frame.stack.len() - argc);
                let ctor = frame.pop();
                let name = name_operand(&unit, insn.u16(1));
                let result = ctx.construct(&ctor, &args, name)?;
                frame.push(result);
            }
            Opcode::Return => {
                charge(ctx, frame, next, next)?;
                return Ok(frame.pop());
            }

            // ==================== Exceptions ====================
            Opcode::Try => frame.push_try(pc),
            Opcode::EndTry => frame.pop_try(),
            Opcode::Throw => {
                let value = frame.pop();
                let message = convert::describe(ctx, &value);
                return Err(VmError::exception(value, message));
            }
            Opcode::Rethrow => {
                let (value, site) = frame.parked_exception(insn.u16(0));
                return Err(rethrow(ctx, value, site));
            }

            // ==================== Internal ====================
            Opcode::Line => {
                frame.line = u32::from(insn.u16(0));
                if let Some(hooks) = hooks {
                    hooks.on_line(&unit, frame.line);
                }
            }
            Opcode::ReturnUndefined => {
                charge(ctx, frame, next, next)?;
                return Ok(Value::Undefined);
            }
            Opcode::End => {
                charge(ctx, frame, next, next)?;
                return Ok(std::mem::take(&mut frame.result));
            }
        }
    }
}
