//! Script values
//!
//! Numbers are stored unboxed in the enum; only strings and objects are
//! reference counted.

use std::fmt;
use std::sync::Arc;

use crate::object::{JsObject, ObjectKind};

/// A script value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// IEEE-754 double
    Number(f64),
    /// Immutable string
    String(Arc<str>),
    /// Object reference
    Object(Arc<JsObject>),
}

impl Value {
    /// `undefined`
    #[inline]
    pub const fn undefined() -> Self {
        Self::Undefined
    }

    /// A number
    #[inline]
    pub const fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// A string
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    /// An object
    #[inline]
    pub fn object(obj: Arc<JsObject>) -> Self {
        Self::Object(obj)
    }

    /// Is `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Is `null` or `undefined`
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// The number, if this is one
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object, if this is one
    #[inline]
    pub fn as_object(&self) -> Option<&Arc<JsObject>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Whether the value can be called
    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|obj| obj.is_callable())
    }

    /// Result of the `typeof` operator
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(obj) if obj.is_callable() => "function",
            Self::Object(_) => "object",
        }
    }
}

/// Strict equality (`===`): objects compare by identity, NaN is unequal
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", crate::convert::number_to_string(*n)),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Object(obj) => match obj.kind() {
                ObjectKind::Function(closure) => {
                    write!(f, "[function {}]", closure.unit.display_name())
                }
                ObjectKind::Native(native) => write!(f, "[native {}]", native.name),
                ObjectKind::Array(_) => write!(f, "[array]"),
                ObjectKind::Error => write!(f, "[error]"),
                ObjectKind::RegExp => write!(f, "[regexp]"),
                ObjectKind::Ordinary => write!(f, "[object]"),
            },
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Self::String(s)
    }
}

impl From<Arc<JsObject>> for Value {
    fn from(obj: Arc<JsObject>) -> Self {
        Self::Object(obj)
    }
}
