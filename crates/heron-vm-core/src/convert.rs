//! Type coercions and comparisons (ECMA-262 §7.1, §7.2)
//!
//! Conversions that may reach an object run user `valueOf`/`toString`
//! methods and therefore take the context and return `VmResult`.

use std::sync::Arc;

use crate::context::Context;
use crate::error::VmResult;
use crate::object::{JsObject, ObjectKind, PropertyKey};
use crate::value::Value;

/// Preferred type for [`to_primitive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// No preference (`+`, `==`)
    Default,
    /// Numeric context
    Number,
    /// String context
    String,
}

/// ToBoolean
pub fn to_boolean(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Object(_) => true,
    }
}

/// ToPrimitive: try `valueOf`/`toString` in hint order, then fall back to
/// the built-in string form of the object
pub fn to_primitive(ctx: &mut Context, value: &Value, hint: Hint) -> VmResult<Value> {
    let Value::Object(obj) = value else {
        return Ok(value.clone());
    };
    let order = match hint {
        Hint::String => ["toString", "valueOf"],
        Hint::Default | Hint::Number => ["valueOf", "toString"],
    };
    for name in order {
        let method = obj.get(&PropertyKey::from(name));
        if method.is_callable() {
            let result = ctx.call(&method, value.clone(), &[])?;
            if !matches!(result, Value::Object(_)) {
                return Ok(result);
            }
        }
    }
    let mut seen = Vec::new();
    Ok(Value::String(default_string(ctx, obj, &mut seen)?))
}

/// String form of an object with no user conversion methods
fn default_string(
    ctx: &mut Context,
    obj: &Arc<JsObject>,
    seen: &mut Vec<*const JsObject>,
) -> VmResult<Arc<str>> {
    Ok(match obj.kind() {
        ObjectKind::Array(_) => {
            let ptr = Arc::as_ptr(obj);
            if seen.contains(&ptr) {
                return Ok(Arc::from(""));
            }
            seen.push(ptr);
            let elements = obj.elements().unwrap_or_default();
            let mut out = String::new();
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match element {
                    Value::Undefined | Value::Null => {}
                    Value::Object(inner) if inner.is_array() => {
                        out.push_str(&default_string(ctx, inner, seen)?)
                    }
                    other => out.push_str(&to_string(ctx, other)?),
                }
            }
            seen.pop();
            Arc::from(out)
        }
        ObjectKind::Error => {
            let name = obj.get(&PropertyKey::from("name"));
            let name = match name {
                Value::Undefined => Arc::from("Error"),
                other => to_string(ctx, &other)?,
            };
            let message = match obj.get(&PropertyKey::from("message")) {
                Value::Undefined => Arc::from(""),
                other => to_string(ctx, &other)?,
            };
            if message.is_empty() {
                name
            } else if name.is_empty() {
                message
            } else {
                Arc::from(format!("{}: {}", name, message))
            }
        }
        ObjectKind::RegExp => {
            let source = obj.get(&PropertyKey::from("source"));
            let flags = obj.get(&PropertyKey::from("flags"));
            Arc::from(format!(
                "/{}/{}",
                source.as_str().unwrap_or("(?:)"),
                flags.as_str().unwrap_or("")
            ))
        }
        ObjectKind::Function(closure) => Arc::from(format!(
            "function {}() {{ [code] }}",
            closure.unit.name.as_deref().unwrap_or("")
        )),
        ObjectKind::Native(native) => {
            Arc::from(format!("function {}() {{ [native code] }}", native.name))
        }
        ObjectKind::Ordinary => Arc::from("[object Object]"),
    })
}

/// ToNumber
pub fn to_number(ctx: &mut Context, value: &Value) -> VmResult<f64> {
    Ok(match value {
        Value::Number(n) => *n,
        Value::Object(_) => {
            let prim = to_primitive(ctx, value, Hint::Number)?;
            primitive_to_number(&prim)
        }
        other => primitive_to_number(other),
    })
}

/// ToNumber of a value known not to be an object
pub fn primitive_to_number(value: &Value) -> f64 {
    match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Number(n) => *n,
        Value::String(s) => string_to_number(s),
        Value::Object(_) => f64::NAN,
    }
}

/// StringToNumber: decimal, hex and `Infinity` literals; anything else is NaN
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned == "Infinity" {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    // Rust's parser also accepts "inf" and "nan"
    if !unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// ToString
pub fn to_string(ctx: &mut Context, value: &Value) -> VmResult<Arc<str>> {
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => {
            let prim = to_primitive(ctx, value, Hint::String)?;
            primitive_to_string(&prim)
        }
        other => primitive_to_string(other),
    })
}

/// ToString of a value known not to be an object
pub fn primitive_to_string(value: &Value) -> Arc<str> {
    match value {
        Value::Undefined => Arc::from("undefined"),
        Value::Null => Arc::from("null"),
        Value::Boolean(true) => Arc::from("true"),
        Value::Boolean(false) => Arc::from("false"),
        Value::Number(n) => Arc::from(number_to_string(*n)),
        Value::String(s) => s.clone(),
        Value::Object(_) => Arc::from("[object Object]"),
    }
}

/// String form of a value for diagnostics; never fails
pub fn describe(ctx: &mut Context, value: &Value) -> String {
    match to_string(ctx, value) {
        Ok(s) => s.to_string(),
        Err(_) => format!("[{}]", value.type_of()),
    }
}

/// Number::toString(10)
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    let abs = n.abs();
    if n.fract() == 0.0 && abs < 1e21 {
        return format!("{:.0}", n);
    }
    if (1e-6..1e21).contains(&abs) {
        return format!("{}", n);
    }
    // Exponent form: "1e21" -> "1e+21", "1.5e-7" stays
    let s = format!("{:e}", n);
    match s.find('e') {
        Some(pos) if !s[pos + 1..].starts_with('-') => {
            format!("{}e+{}", &s[..pos], &s[pos + 1..])
        }
        _ => s,
    }
}

/// ToInt32
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ToUint32
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// Property key for a computed member access
pub fn to_property_key(ctx: &mut Context, value: &Value) -> VmResult<PropertyKey> {
    if let Value::Number(n) = value
        && *n >= 0.0
        && *n < u32::MAX as f64
        && n.fract() == 0.0
    {
        return Ok(PropertyKey::Index(*n as u32));
    }
    Ok(PropertyKey::string(&to_string(ctx, value)?))
}

/// Abstract equality (`==`)
pub fn loose_equals(ctx: &mut Context, a: &Value, b: &Value) -> VmResult<bool> {
    Ok(match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Number(x), Value::String(s)) | (Value::String(s), Value::Number(x)) => {
            *x == string_to_number(s)
        }
        (Value::Boolean(x), other) | (other, Value::Boolean(x)) => {
            let x = Value::Number(f64::from(u8::from(*x)));
            return loose_equals(ctx, &x, other);
        }
        (Value::Object(_), Value::Number(_) | Value::String(_)) => {
            let prim = to_primitive(ctx, a, Hint::Default)?;
            return loose_equals(ctx, &prim, b);
        }
        (Value::Number(_) | Value::String(_), Value::Object(_)) => {
            let prim = to_primitive(ctx, b, Hint::Default)?;
            return loose_equals(ctx, a, &prim);
        }
        _ => a == b,
    })
}

/// Abstract relational comparison `a < b`; `None` when either side is NaN.
///
/// Both operands are converted, left first, before comparing.
pub fn less_than(ctx: &mut Context, a: &Value, b: &Value) -> VmResult<Option<bool>> {
    let pa = to_primitive(ctx, a, Hint::Number)?;
    let pb = to_primitive(ctx, b, Hint::Number)?;
    Ok(primitive_less_than(&pa, &pb))
}

/// `a < b` for primitives; `None` when either side is NaN
pub fn primitive_less_than(a: &Value, b: &Value) -> Option<bool> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.encode_utf16().lt(y.encode_utf16()));
    }
    let x = primitive_to_number(a);
    let y = primitive_to_number(b);
    if x.is_nan() || y.is_nan() {
        None
    } else {
        Some(x < y)
    }
}

/// The `+` operator
pub fn add(ctx: &mut Context, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return Ok(Value::Number(x + y));
    }
    let pa = to_primitive(ctx, a, Hint::Default)?;
    let pb = to_primitive(ctx, b, Hint::Default)?;
    if matches!(pa, Value::String(_)) || matches!(pb, Value::String(_)) {
        let mut s = primitive_to_string(&pa).to_string();
        s.push_str(&primitive_to_string(&pb));
        return Ok(Value::from(s));
    }
    Ok(Value::Number(primitive_to_number(&pa) + primitive_to_number(&pb)))
}
