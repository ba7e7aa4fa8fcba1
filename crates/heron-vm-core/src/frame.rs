//! Activation frames
//!
//! One frame per in-flight invocation, split into the four regions of the
//! unit's [`FrameLayout`]: variables, temporaries, try-region saves and the
//! operand stack. Each region is its own typed vector sized once at entry;
//! indexing past a region is a compiler or interpreter defect and panics.

use std::sync::Arc;

use heron_vm_bytecode::{FrameLayout, FunctionUnit};
use rustc_hash::FxHashSet;

use crate::object::{JsObject, PropertyKey};
use crate::scope::Scope;
use crate::value::Value;

/// Contents of one temporary slot
#[derive(Debug, Clone, Default)]
pub enum TempSlot {
    /// Never written
    #[default]
    Empty,
    /// A saved value (switch discriminant, pending exception, return value)
    Value(Value),
    /// `for-in` enumeration state
    Enumerator(Enumerator),
    /// Resume position saved by `Gosub`
    Resume(usize),
    /// An exception parked while a finally body runs
    Thrown {
        /// The thrown value
        value: Value,
        /// Where it was first thrown
        site: ThrowSite,
    },
}

/// Source location an exception was first thrown from
#[derive(Debug, Clone, Default)]
pub struct ThrowSite {
    pub source_name: Option<String>,
    pub line: Option<u32>,
}

/// Keys of a `for-in` loop, snapshotted at loop entry
#[derive(Debug, Clone, Default)]
pub struct Enumerator {
    object: Option<Arc<JsObject>>,
    keys: Vec<PropertyKey>,
    next: usize,
    current: Option<Arc<str>>,
}

impl Enumerator {
    /// Enumerate the enumerable keys of `object` and its prototypes
    pub fn new(object: Arc<JsObject>) -> Self {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();
        let mut current = Some(&object);
        while let Some(obj) = current {
            for key in obj.own_enumerable_keys() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            current = obj.prototype();
        }
        Self {
            object: Some(object),
            keys,
            next: 0,
            current: None,
        }
    }

    /// Enumerate the indices of a string
    pub fn string_indices(len: usize) -> Self {
        Self {
            object: None,
            keys: (0..len as u32).map(PropertyKey::Index).collect(),
            next: 0,
            current: None,
        }
    }

    /// Advance to the next key still present on the object
    pub fn advance(&mut self) -> bool {
        while let Some(key) = self.keys.get(self.next) {
            self.next += 1;
            // Keys deleted during the loop are skipped
            if self.object.as_ref().is_none_or(|obj| obj.has(key)) {
                self.current = Some(key.to_js_string());
                return true;
            }
        }
        self.current = None;
        false
    }

    /// The key produced by the last successful [`advance`](Self::advance)
    pub fn current(&self) -> Option<&Arc<str>> {
        self.current.as_ref()
    }
}

/// Saved state of one active try region
#[derive(Debug, Clone)]
pub struct TrySave {
    /// Scope chain when the region was entered
    pub scope: Scope,
    /// Position of the region's `Try` instruction
    pub try_pc: usize,
    /// The catch handler already ran; only the finally remains
    pub catch_taken: bool,
}

/// One in-flight invocation
pub struct Frame {
    pub(crate) unit: Arc<FunctionUnit>,
    pub(crate) this: Value,
    pub(crate) scope: Scope,
    pub(crate) vars: Vec<Value>,
    pub(crate) temps: Vec<TempSlot>,
    pub(crate) try_stack: Vec<TrySave>,
    pub(crate) stack: Vec<Value>,
    /// Completion value of a script (`PopResult`)
    pub(crate) result: Value,
    pub(crate) pc: usize,
    /// Last line marker executed
    pub(crate) line: u32,
    /// Start of the straight-line run not yet counted against the budget
    pub(crate) counted_from: usize,
    /// Origin of the exception being handed to a finally entry; taken by
    /// the entry's `StoreTemp`
    pub(crate) pending_site: Option<ThrowSite>,
}

impl Frame {
    /// Allocate the regions of `unit`'s layout
    pub fn new(unit: Arc<FunctionUnit>, this: Value, scope: Scope, vars: Vec<Value>) -> Self {
        let layout: FrameLayout = unit.layout;
        assert_eq!(
            vars.len(),
            layout.variables().len(),
            "variable region of {} has the wrong size",
            unit.display_name()
        );
        Self {
            this,
            scope,
            vars,
            temps: vec![TempSlot::Empty; layout.temporaries().len()],
            try_stack: Vec::with_capacity(layout.try_depth as usize),
            stack: Vec::with_capacity(layout.max_stack as usize),
            result: Value::Undefined,
            pc: 0,
            line: unit.first_line,
            counted_from: 0,
            pending_site: None,
            unit,
        }
    }

    /// Push onto the operand stack
    #[inline]
    pub fn push(&mut self, value: Value) {
        debug_assert!(
            self.stack.len() < self.unit.layout.max_stack as usize,
            "operand stack overflow at pc {} in {}",
            self.pc,
            self.unit.display_name()
        );
        self.stack.push(value);
    }

    /// Pop from the operand stack
    #[inline]
    pub fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(value) => value,
            None => panic!(
                "operand stack underflow at pc {} in {}",
                self.pc,
                self.unit.display_name()
            ),
        }
    }

    /// Top of the operand stack
    #[inline]
    pub fn peek(&self, depth: usize) -> &Value {
        let len = self.stack.len();
        assert!(depth < len, "operand stack underflow at pc {}", self.pc);
        &self.stack[len - 1 - depth]
    }

    /// Value held in a temporary
    pub fn temp_value(&self, slot: u16) -> Value {
        match &self.temps[slot as usize] {
            TempSlot::Value(value) | TempSlot::Thrown { value, .. } => value.clone(),
            other => panic!("temporary {} holds {:?}, expected a value", slot, other),
        }
    }

    /// Store a value into a temporary, tagging it with the origin of the
    /// exception that just entered a finally handler
    pub fn store_temp(&mut self, slot: u16, value: Value) {
        self.temps[slot as usize] = match self.pending_site.take() {
            Some(site) => TempSlot::Thrown { value, site },
            None => TempSlot::Value(value),
        };
    }

    /// Parked exception and its origin, if one was recorded
    pub fn parked_exception(&self, slot: u16) -> (Value, Option<ThrowSite>) {
        match &self.temps[slot as usize] {
            TempSlot::Thrown { value, site } => (value.clone(), Some(site.clone())),
            TempSlot::Value(value) => (value.clone(), None),
            other => panic!("temporary {} holds {:?}, expected an exception", slot, other),
        }
    }

    /// Enumerator held in a temporary
    pub fn enumerator(&mut self, slot: u16) -> &mut Enumerator {
        match &mut self.temps[slot as usize] {
            TempSlot::Enumerator(e) => e,
            other => panic!("temporary {} holds {:?}, expected an enumerator", slot, other),
        }
    }

    /// Enter a try region
    pub fn push_try(&mut self, try_pc: usize) {
        assert!(
            self.try_stack.len() < self.unit.layout.try_depth as usize,
            "try nesting exceeds the layout of {}",
            self.unit.display_name()
        );
        self.try_stack.push(TrySave {
            scope: self.scope.clone(),
            try_pc,
            catch_taken: false,
        });
    }

    /// Leave the innermost try region normally
    pub fn pop_try(&mut self) {
        if self.try_stack.pop().is_none() {
            panic!("EndTry without an active region at pc {}", self.pc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PropertyAttributes;

    #[test]
    fn test_enumerator_walks_prototypes_once() {
        let proto = Arc::new(JsObject::ordinary(None));
        proto.set("a".into(), Value::from(1));
        proto.set("shared".into(), Value::from(1));
        let obj = Arc::new(JsObject::ordinary(Some(proto)));
        obj.set("shared".into(), Value::from(2));
        obj.set("b".into(), Value::from(2));
        obj.define("hidden".into(), Value::Null, PropertyAttributes::hidden());

        let mut e = Enumerator::new(obj);
        let mut seen = Vec::new();
        while e.advance() {
            seen.push(e.current().unwrap().to_string());
        }
        assert_eq!(seen, vec!["shared", "b", "a"]);
        assert!(e.current().is_none());
    }

    #[test]
    fn test_enumerator_skips_deleted_keys() {
        let obj = Arc::new(JsObject::ordinary(None));
        obj.set("x".into(), Value::from(1));
        obj.set("y".into(), Value::from(2));

        let mut e = Enumerator::new(obj.clone());
        assert!(e.advance());
        obj.delete(&"y".into());
        assert!(!e.advance());
    }
}
