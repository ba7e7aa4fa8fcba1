//! Script objects
//!
//! Properties live in an insertion-ordered map behind a `parking_lot` lock,
//! so objects can be shared between threads and `for-in` sees keys in the
//! order they were added. Arrays keep their elements in a dense vector.

use std::fmt;
use std::sync::Arc;

use heron_vm_bytecode::FunctionUnit;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use crate::context::Context;
use crate::error::VmResult;
use crate::scope::Scope;
use crate::value::Value;

/// Largest gap an index store may open past the end of an array before the
/// key is kept as a plain property instead of growing the element vector
const MAX_ARRAY_GAP: usize = 1 << 16;

/// Property key (string or array index)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(Arc<str>),
    /// Canonical array index
    Index(u32),
}

impl PropertyKey {
    /// Create a key from a string, canonicalizing array indices
    pub fn string(s: &str) -> Self {
        match parse_index(s) {
            Some(i) => Self::Index(i),
            None => Self::String(Arc::from(s)),
        }
    }

    /// Create an index property key
    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }

    /// The key as a script string
    pub fn to_js_string(&self) -> Arc<str> {
        match self {
            Self::String(s) => s.clone(),
            Self::Index(i) => Arc::from(i.to_string()),
        }
    }
}

/// `"0"`, `"17"`; not `"017"`, `"-1"` or `"4294967295"`
fn parse_index(s: &str) -> Option<u32> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 10 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    s.parse::<u32>().ok().filter(|&i| i != u32::MAX)
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable and configurable but skipped by `for-in`
    pub const fn hidden() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Writable, non-enumerable, non-configurable
    pub const fn permanent() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: false,
        }
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

/// A data property
#[derive(Clone, Debug)]
pub struct Property {
    /// The value
    pub value: Value,
    /// Attributes
    pub attributes: PropertyAttributes,
}

type PropertyMap = IndexMap<PropertyKey, Property, FxBuildHasher>;

/// A script function: compiled unit plus the scope it closes over
#[derive(Clone)]
pub struct Closure {
    /// Compiled code
    pub unit: Arc<FunctionUnit>,
    /// Scope captured when the closure was created
    pub scope: Scope,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("unit", &self.unit.display_name())
            .finish_non_exhaustive()
    }
}

/// Signature of host functions: `(context, this, arguments)`
pub type NativeFn = Arc<dyn Fn(&mut Context, Value, Vec<Value>) -> VmResult<Value> + Send + Sync>;

/// A host function callable from scripts
#[derive(Clone)]
pub struct NativeFunction {
    /// Name used in diagnostics
    pub name: Arc<str>,
    /// The implementation
    pub func: NativeFn,
}

impl NativeFunction {
    /// Wrap a Rust closure
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Context, Value, Vec<Value>) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    /// Invoke the function
    #[inline]
    pub fn call(&self, ctx: &mut Context, this: Value, args: Vec<Value>) -> VmResult<Value> {
        (self.func)(ctx, this, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// What an object is, beyond its properties
#[derive(Debug)]
pub enum ObjectKind {
    /// Plain object
    Ordinary,
    /// Array with dense elements
    Array(RwLock<Vec<Value>>),
    /// Error object (`name` and `message` properties)
    Error,
    /// Script function
    Function(Closure),
    /// Host function
    Native(NativeFunction),
    /// Regular expression literal (`source` and `flags` properties)
    RegExp,
}

/// A script object
pub struct JsObject {
    kind: ObjectKind,
    prototype: Option<Arc<JsObject>>,
    properties: RwLock<PropertyMap>,
}

impl JsObject {
    /// Create an object of the given kind
    pub fn new(kind: ObjectKind, prototype: Option<Arc<JsObject>>) -> Self {
        Self {
            kind,
            prototype,
            properties: RwLock::new(PropertyMap::default()),
        }
    }

    /// Create a plain object
    pub fn ordinary(prototype: Option<Arc<JsObject>>) -> Self {
        Self::new(ObjectKind::Ordinary, prototype)
    }

    /// Create an array holding `elements`
    pub fn array(prototype: Option<Arc<JsObject>>, elements: Vec<Value>) -> Self {
        Self::new(ObjectKind::Array(RwLock::new(elements)), prototype)
    }

    /// Object kind
    #[inline]
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Prototype link
    #[inline]
    pub fn prototype(&self) -> Option<&Arc<JsObject>> {
        self.prototype.as_ref()
    }

    /// Whether the object is a script or host function
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_) | ObjectKind::Native(_))
    }

    /// Whether the object is an array
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array(_))
    }

    /// Array length, for arrays
    pub fn array_length(&self) -> Option<usize> {
        match &self.kind {
            ObjectKind::Array(elements) => Some(elements.read().len()),
            _ => None,
        }
    }

    /// Snapshot of the elements, for arrays
    pub fn elements(&self) -> Option<Vec<Value>> {
        match &self.kind {
            ObjectKind::Array(elements) => Some(elements.read().clone()),
            _ => None,
        }
    }

    /// Own property value
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        if let ObjectKind::Array(elements) = &self.kind {
            match key {
                PropertyKey::Index(i) => {
                    if let Some(value) = elements.read().get(*i as usize) {
                        return Some(value.clone());
                    }
                }
                PropertyKey::String(s) if &**s == "length" => {
                    return Some(Value::Number(elements.read().len() as f64));
                }
                PropertyKey::String(_) => {}
            }
        }
        self.properties.read().get(key).map(|p| p.value.clone())
    }

    /// Property value, following the prototype chain; `undefined` if absent
    pub fn get(&self, key: &PropertyKey) -> Value {
        let mut current = Some(self);
        while let Some(obj) = current {
            if let Some(value) = obj.get_own(key) {
                return value;
            }
            current = obj.prototype.as_deref();
        }
        Value::Undefined
    }

    /// Whether the object itself has the property
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        if let ObjectKind::Array(elements) = &self.kind {
            match key {
                PropertyKey::Index(i) if (*i as usize) < elements.read().len() => return true,
                PropertyKey::String(s) if &**s == "length" => return true,
                _ => {}
            }
        }
        self.properties.read().contains_key(key)
    }

    /// Whether the object or its prototype chain has the property
    pub fn has(&self, key: &PropertyKey) -> bool {
        let mut current = Some(self);
        while let Some(obj) = current {
            if obj.has_own(key) {
                return true;
            }
            current = obj.prototype.as_deref();
        }
        false
    }

    /// Assign an own property; writes to read-only properties are ignored
    pub fn set(&self, key: PropertyKey, value: Value) {
        if let ObjectKind::Array(elements) = &self.kind {
            match &key {
                PropertyKey::Index(i) => {
                    let i = *i as usize;
                    let mut elements = elements.write();
                    if i < elements.len() {
                        elements[i] = value;
                        return;
                    }
                    if i - elements.len() <= MAX_ARRAY_GAP {
                        elements.resize(i, Value::Undefined);
                        elements.push(value);
                        return;
                    }
                }
                PropertyKey::String(s) if &**s == "length" => {
                    if let Value::Number(n) = value
                        && n >= 0.0
                        && n.fract() == 0.0
                    {
                        let mut elements = elements.write();
                        let len = n as usize;
                        if len <= elements.len() + MAX_ARRAY_GAP {
                            elements.resize(len, Value::Undefined);
                        }
                    }
                    return;
                }
                PropertyKey::String(_) => {}
            }
        }

        let mut properties = self.properties.write();
        match properties.get_mut(&key) {
            Some(existing) if existing.attributes.writable => existing.value = value,
            Some(_) => {}
            None => {
                properties.insert(
                    key,
                    Property {
                        value,
                        attributes: PropertyAttributes::data(),
                    },
                );
            }
        }
    }

    /// Define (or redefine) an own property with explicit attributes
    pub fn define(&self, key: PropertyKey, value: Value, attributes: PropertyAttributes) {
        self.properties
            .write()
            .insert(key, Property { value, attributes });
    }

    /// Define an own property unless one already exists
    pub fn define_if_absent(&self, key: PropertyKey, value: Value) {
        if !self.has_own(&key) {
            self.define(key, value, PropertyAttributes::data());
        }
    }

    /// Delete an own property. Returns false for non-configurable properties.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        if let ObjectKind::Array(elements) = &self.kind {
            match key {
                PropertyKey::Index(i) => {
                    let mut elements = elements.write();
                    if let Some(slot) = elements.get_mut(*i as usize) {
                        *slot = Value::Undefined;
                        return true;
                    }
                }
                PropertyKey::String(s) if &**s == "length" => return false,
                PropertyKey::String(_) => {}
            }
        }
        let mut properties = self.properties.write();
        match properties.get(key) {
            Some(p) if !p.attributes.configurable => false,
            Some(_) => {
                properties.shift_remove(key);
                true
            }
            None => true,
        }
    }

    /// Own enumerable keys: array indices first, then properties in
    /// insertion order
    pub fn own_enumerable_keys(&self) -> Vec<PropertyKey> {
        let mut keys = Vec::new();
        if let ObjectKind::Array(elements) = &self.kind {
            let len = elements.read().len() as u32;
            keys.extend((0..len).map(PropertyKey::Index));
        }
        keys.extend(
            self.properties
                .read()
                .iter()
                .filter(|(_, p)| p.attributes.enumerable)
                .map(|(k, _)| k.clone()),
        );
        keys
    }

    /// Whether `prototype` appears on this object's prototype chain
    pub fn inherits_from(&self, prototype: &Arc<JsObject>) -> bool {
        let mut current = self.prototype.as_ref();
        while let Some(proto) = current {
            if Arc::ptr_eq(proto, prototype) {
                return true;
            }
            current = proto.prototype.as_ref();
        }
        false
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("kind", &self.kind)
            .field("properties", &self.properties.read().len())
            .finish_non_exhaustive()
    }
}
