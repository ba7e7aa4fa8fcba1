//! Scope chains
//!
//! A scope is a persistent linked list of objects. Name resolution walks it
//! from the innermost node outwards; `with` pushes an arbitrary object and
//! functions needing an activation push a fresh variable object.

use std::fmt;
use std::sync::Arc;

use crate::object::{JsObject, PropertyKey};
use crate::value::Value;

/// Role of one scope node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Outermost scope holding the global object
    Global,
    /// Variable object of one function invocation
    Activation,
    /// Object pushed by a `with` statement
    With,
}

struct ScopeNode {
    kind: ScopeKind,
    object: Arc<JsObject>,
    parent: Option<Scope>,
}

/// A shared, immutable scope chain
#[derive(Clone)]
pub struct Scope {
    node: Arc<ScopeNode>,
}

impl Scope {
    /// Create a chain holding only the global object
    pub fn global(object: Arc<JsObject>) -> Self {
        Self::link(ScopeKind::Global, object, None)
    }

    fn link(kind: ScopeKind, object: Arc<JsObject>, parent: Option<Scope>) -> Self {
        Self {
            node: Arc::new(ScopeNode {
                kind,
                object,
                parent,
            }),
        }
    }

    /// Push a function's variable object
    pub fn with_activation(&self, object: Arc<JsObject>) -> Self {
        Self::link(ScopeKind::Activation, object, Some(self.clone()))
    }

    /// Push a `with` object
    pub fn with_object(&self, object: Arc<JsObject>) -> Self {
        Self::link(ScopeKind::With, object, Some(self.clone()))
    }

    /// Kind of the innermost node
    #[inline]
    pub fn kind(&self) -> ScopeKind {
        self.node.kind
    }

    /// Object of the innermost node
    #[inline]
    pub fn object(&self) -> &Arc<JsObject> {
        &self.node.object
    }

    /// Enclosing scope
    #[inline]
    pub fn parent(&self) -> Option<&Scope> {
        self.node.parent.as_ref()
    }

    /// Iterate from the innermost node outwards
    pub fn iter(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |scope| scope.parent())
    }

    /// Innermost object that receives `var` declarations
    pub fn variable_object(&self) -> &Arc<JsObject> {
        self.iter()
            .find(|scope| scope.kind() != ScopeKind::With)
            .map_or(self.object(), Scope::object)
    }

    /// The global object at the root of the chain
    pub fn global_object(&self) -> &Arc<JsObject> {
        self.iter().last().map_or(self.object(), Scope::object)
    }

    /// Innermost node whose object binds `key`
    pub fn lookup(&self, key: &PropertyKey) -> Option<&Scope> {
        self.iter().find(|scope| match scope.kind() {
            ScopeKind::Activation => scope.object().has_own(key),
            ScopeKind::Global | ScopeKind::With => scope.object().has(key),
        })
    }

    /// Value bound to `key`, or `None` when unbound
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.lookup(key).map(|scope| scope.object().get(key))
    }

    /// Value bound to `key` and the `this` a call through it receives
    pub fn get_with_this(&self, key: &PropertyKey) -> Option<(Value, Value)> {
        self.lookup(key).map(|scope| {
            let this = match scope.kind() {
                ScopeKind::With => Value::Object(scope.object().clone()),
                ScopeKind::Global | ScopeKind::Activation => Value::Undefined,
            };
            (scope.object().get(key), this)
        })
    }

    /// Object that binds `key`; the global object when unbound
    pub fn bind(&self, key: &PropertyKey) -> &Arc<JsObject> {
        self.lookup(key)
            .map_or_else(|| self.global_object(), Scope::object)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|scope| scope.kind()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_order() {
        let global = Arc::new(JsObject::ordinary(None));
        global.set("x".into(), Value::from("global"));
        let activation = Arc::new(JsObject::ordinary(None));
        activation.set("x".into(), Value::from("local"));

        let scope = Scope::global(global.clone()).with_activation(activation.clone());
        assert_eq!(scope.get(&"x".into()), Some(Value::from("local")));
        assert!(Arc::ptr_eq(scope.variable_object(), &activation));
        assert!(Arc::ptr_eq(scope.global_object(), &global));
        assert_eq!(scope.get(&"missing".into()), None);
        assert!(Arc::ptr_eq(scope.bind(&"missing".into()), &global));
    }

    #[test]
    fn test_with_supplies_this() {
        let global = Arc::new(JsObject::ordinary(None));
        let target = Arc::new(JsObject::ordinary(None));
        target.set("f".into(), Value::from(1));

        let scope = Scope::global(global).with_object(target.clone());
        let (value, this) = scope.get_with_this(&"f".into()).unwrap();
        assert_eq!(value, Value::from(1));
        assert_eq!(this, Value::Object(target.clone()));
        assert_eq!(scope.kind(), ScopeKind::With);
        assert_eq!(scope.parent().map(Scope::kind), Some(ScopeKind::Global));
        assert!(!Arc::ptr_eq(scope.variable_object(), &target));
    }
}
