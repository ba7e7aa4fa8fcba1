//! VM execution context
//!
//! The context is threaded explicitly through every interpreter entry point.
//! It owns the global object, the intrinsic prototypes, the configured
//! limits and the cooperative preemption state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use heron_vm_bytecode::FunctionUnit;
use tracing::warn;

use crate::convert;
use crate::debug::DebugHooks;
use crate::error::{VmError, VmResult};
use crate::interpreter;
use crate::object::{Closure, JsObject, NativeFunction, ObjectKind, PropertyAttributes, PropertyKey};
use crate::scope::Scope;
use crate::value::Value;

/// Default maximum call depth.
///
/// Every interpreted call recurses on the native stack, so the limit has to
/// stay well inside the smallest thread stack the host runs scripts on.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 400;

/// Callback invoked when the instruction budget is used up. Receives the
/// number of bytecode bytes executed since the previous invocation; an error
/// aborts the running script.
pub type InstructionObserver = Arc<dyn Fn(u64) -> VmResult<()> + Send + Sync>;

/// Execution limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Bytecode bytes executed between observer invocations; `None` disables
    /// the observer (the interrupt flag is still honored)
    pub instruction_threshold: Option<u64>,
    /// Maximum nesting of interpreted calls
    pub max_call_depth: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            instruction_threshold: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Prototypes of the built-in object kinds
#[derive(Debug, Clone)]
pub struct Intrinsics {
    /// `Object.prototype`
    pub object_prototype: Arc<JsObject>,
    /// Prototype of every function object
    pub function_prototype: Arc<JsObject>,
    /// `Array.prototype`
    pub array_prototype: Arc<JsObject>,
    /// `Error.prototype`
    pub error_prototype: Arc<JsObject>,
    /// `TypeError.prototype`
    pub type_error_prototype: Arc<JsObject>,
    /// `ReferenceError.prototype`
    pub reference_error_prototype: Arc<JsObject>,
    /// `RangeError.prototype`
    pub range_error_prototype: Arc<JsObject>,
    /// Prototype of regular expression objects
    pub regexp_prototype: Arc<JsObject>,
}

impl Intrinsics {
    fn new() -> Self {
        let object_prototype = Arc::new(JsObject::ordinary(None));
        let derived = || Arc::new(JsObject::ordinary(Some(object_prototype.clone())));
        let error_prototype = derived();
        error_prototype.define("name".into(), Value::from("Error"), PropertyAttributes::hidden());
        error_prototype.define("message".into(), Value::from(""), PropertyAttributes::hidden());
        let error_subclass = |name: &str| {
            let proto = Arc::new(JsObject::ordinary(Some(error_prototype.clone())));
            proto.define("name".into(), Value::from(name), PropertyAttributes::hidden());
            proto
        };
        Self {
            function_prototype: derived(),
            array_prototype: derived(),
            regexp_prototype: derived(),
            type_error_prototype: error_subclass("TypeError"),
            reference_error_prototype: error_subclass("ReferenceError"),
            range_error_prototype: error_subclass("RangeError"),
            error_prototype,
            object_prototype,
        }
    }

    /// Prototype for errors raised under the given constructor name
    pub fn error_prototype_for(&self, name: &str) -> &Arc<JsObject> {
        match name {
            "TypeError" => &self.type_error_prototype,
            "ReferenceError" => &self.reference_error_prototype,
            "RangeError" => &self.range_error_prototype,
            _ => &self.error_prototype,
        }
    }
}

/// VM execution context
pub struct Context {
    config: ContextConfig,
    global: Arc<JsObject>,
    global_scope: Scope,
    intrinsics: Intrinsics,
    call_depth: usize,
    instruction_count: u64,
    observer: Option<InstructionObserver>,
    interrupt_flag: Arc<AtomicBool>,
    hooks: Option<Arc<dyn DebugHooks>>,
}

impl Context {
    /// Create a context with the default configuration
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with explicit limits
    pub fn with_config(config: ContextConfig) -> Self {
        let intrinsics = Intrinsics::new();
        let global = Arc::new(JsObject::ordinary(Some(intrinsics.object_prototype.clone())));
        let ctx = Self {
            config,
            global_scope: Scope::global(global.clone()),
            global,
            intrinsics,
            call_depth: 0,
            instruction_count: 0,
            observer: None,
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            hooks: None,
        };
        ctx.install_globals();
        ctx
    }

    fn install_globals(&self) {
        let global = Value::Object(self.global.clone());
        self.define_global("globalThis", global);
        self.define_global("undefined", Value::Undefined);
        self.define_global("NaN", Value::Number(f64::NAN));
        self.define_global("Infinity", Value::Number(f64::INFINITY));

        let object = self.native_constructor(
            "Object",
            &self.intrinsics.object_prototype,
            |ctx, _this, args| match args.into_iter().next() {
                Some(value @ Value::Object(_)) => Ok(value),
                _ => Ok(Value::Object(ctx.new_object())),
            },
        );
        self.define_global("Object", object);

        let array = self.native_constructor(
            "Array",
            &self.intrinsics.array_prototype,
            |ctx, _this, args| {
                if let [Value::Number(n)] = args.as_slice() {
                    let len = *n;
                    if len < 0.0 || len.fract() != 0.0 || len > u32::MAX as f64 {
                        return Err(VmError::range_error("Invalid array length"));
                    }
                    let array = ctx.new_array(Vec::new());
                    array.set("length".into(), Value::Number(len));
                    return Ok(Value::Object(array));
                }
                Ok(Value::Object(ctx.new_array(args)))
            },
        );
        self.define_global("Array", array);

        for name in ["Error", "TypeError", "ReferenceError", "RangeError"] {
            let proto = self.intrinsics.error_prototype_for(name).clone();
            let ctor_proto = proto.clone();
            let ctor = self.native_constructor(name, &ctor_proto, move |ctx, _this, args| {
                let error = Arc::new(JsObject::new(ObjectKind::Error, Some(proto.clone())));
                if let Some(message) = args.first().filter(|m| !m.is_undefined()) {
                    let message = convert::to_string(ctx, message)?;
                    error.define("message".into(), Value::String(message), PropertyAttributes::hidden());
                }
                Ok(Value::Object(error))
            });
            self.define_global(name, ctor);
        }
    }

    /// Create a host function whose `prototype` property is `proto`
    fn native_constructor<F>(&self, name: &str, proto: &Arc<JsObject>, func: F) -> Value
    where
        F: Fn(&mut Context, Value, Vec<Value>) -> VmResult<Value> + Send + Sync + 'static,
    {
        let ctor = self.new_native(NativeFunction::new(name, func));
        ctor.define(
            "prototype".into(),
            Value::Object(proto.clone()),
            PropertyAttributes::permanent(),
        );
        proto.define("constructor".into(), Value::Object(ctor.clone()), PropertyAttributes::hidden());
        Value::Object(ctor)
    }

    /// Configured limits
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// The global object
    pub fn global(&self) -> &Arc<JsObject> {
        &self.global
    }

    /// Scope chain holding only the global object
    pub fn global_scope(&self) -> &Scope {
        &self.global_scope
    }

    /// Built-in prototypes
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// Define a property on the global object
    pub fn define_global(&self, name: &str, value: Value) {
        self.global
            .define(PropertyKey::from(name), value, PropertyAttributes::hidden());
    }

    /// Define a global host function
    pub fn define_native<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut Context, Value, Vec<Value>) -> VmResult<Value> + Send + Sync + 'static,
    {
        let native = self.new_native(NativeFunction::new(name, func));
        self.define_global(name, Value::Object(native));
    }

    /// Install the instruction budget callback
    pub fn set_instruction_observer<F>(&mut self, observer: F)
    where
        F: Fn(u64) -> VmResult<()> + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
    }

    /// Install debugger callbacks
    pub fn set_debug_hooks(&mut self, hooks: Arc<dyn DebugHooks>) {
        self.hooks = Some(hooks);
    }

    /// Installed debugger callbacks
    pub fn debug_hooks(&self) -> Option<&Arc<dyn DebugHooks>> {
        self.hooks.as_ref()
    }

    /// Get the interrupt flag for external timeout/cancellation
    ///
    /// Call `flag.store(true, Ordering::Relaxed)` to interrupt execution.
    /// The interpreter checks it at every branch and call.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    /// Check if execution was interrupted
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::Relaxed)
    }

    /// Request interruption of execution
    pub fn interrupt(&self) {
        self.interrupt_flag.store(true, Ordering::Relaxed);
    }

    /// Clear the interrupt flag
    pub fn clear_interrupt(&self) {
        self.interrupt_flag.store(false, Ordering::Relaxed);
    }

    /// Bytes executed since the observer last ran
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Current nesting of interpreted calls
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Cooperative preemption point: charge `executed` bytes to the budget
    pub(crate) fn observe_instructions(&mut self, executed: u64) -> VmResult<()> {
        if self.is_interrupted() {
            return Err(VmError::Interrupted);
        }
        let Some(threshold) = self.config.instruction_threshold else {
            return Ok(());
        };
        self.instruction_count += executed;
        if self.instruction_count >= threshold {
            let count = std::mem::take(&mut self.instruction_count);
            if let Some(observer) = self.observer.clone() {
                observer(count)?;
            }
        }
        Ok(())
    }

    pub(crate) fn enter_call(&mut self) -> VmResult<()> {
        if self.call_depth >= self.config.max_call_depth {
            return Err(VmError::StackOverflow);
        }
        self.call_depth += 1;
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.call_depth -= 1;
    }

    // ==================== Object creation ====================

    /// Create a plain object inheriting from `Object.prototype`
    pub fn new_object(&self) -> Arc<JsObject> {
        Arc::new(JsObject::ordinary(Some(self.intrinsics.object_prototype.clone())))
    }

    /// Create an array
    pub fn new_array(&self, elements: Vec<Value>) -> Arc<JsObject> {
        Arc::new(JsObject::array(
            Some(self.intrinsics.array_prototype.clone()),
            elements,
        ))
    }

    /// Create an error object with the prototype of constructor `name`
    pub fn new_error(&self, name: &str, message: &str) -> Arc<JsObject> {
        let error = Arc::new(JsObject::new(
            ObjectKind::Error,
            Some(self.intrinsics.error_prototype_for(name).clone()),
        ));
        error.define("message".into(), Value::from(message), PropertyAttributes::hidden());
        error
    }

    /// Create a regular expression object
    pub fn new_regexp(&self, pattern: &str, flags: &str) -> Arc<JsObject> {
        let regexp = Arc::new(JsObject::new(
            ObjectKind::RegExp,
            Some(self.intrinsics.regexp_prototype.clone()),
        ));
        regexp.define("source".into(), Value::from(pattern), PropertyAttributes::hidden());
        regexp.define("flags".into(), Value::from(flags), PropertyAttributes::hidden());
        regexp.define(
            "global".into(),
            Value::from(flags.contains('g')),
            PropertyAttributes::hidden(),
        );
        regexp.define("lastIndex".into(), Value::from(0), PropertyAttributes::hidden());
        regexp
    }

    /// Create a host function object
    pub fn new_native(&self, native: NativeFunction) -> Arc<JsObject> {
        Arc::new(JsObject::new(
            ObjectKind::Native(native),
            Some(self.intrinsics.function_prototype.clone()),
        ))
    }

    /// Create a script function closing over `scope`, with a fresh
    /// `prototype` object for use as a constructor
    pub fn new_function(&self, unit: Arc<FunctionUnit>, scope: Scope) -> Arc<JsObject> {
        let function = Arc::new(JsObject::new(
            ObjectKind::Function(Closure { unit, scope }),
            Some(self.intrinsics.function_prototype.clone()),
        ));
        function.define(
            "prototype".into(),
            Value::Object(self.new_object()),
            PropertyAttributes::permanent(),
        );
        function
    }

    // ==================== Execution ====================

    /// Run a compiled script against the global scope and return its
    /// completion value
    pub fn execute_script(&mut self, unit: Arc<FunctionUnit>) -> VmResult<Value> {
        if !unit.is_script() {
            return Err(VmError::host(format!(
                "{} is a function unit, not a script",
                unit.display_name()
            )));
        }
        let closure = Closure {
            unit,
            scope: self.global_scope.clone(),
        };
        let this = Value::Object(self.global.clone());
        let result = interpreter::call_closure(self, &closure, this, &[]);
        if let Err(err) = &result {
            warn!(source = %closure.unit.source_name, error = %err, "Script failed");
        }
        result
    }

    /// Call any callable value
    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        match callee.as_object().map(|obj| obj.kind()) {
            Some(ObjectKind::Function(closure)) => {
                let closure = closure.clone();
                interpreter::call_closure(self, &closure, this, args)
            }
            Some(ObjectKind::Native(native)) => {
                let native = native.clone();
                native.call(self, this, args.to_vec())
            }
            _ => {
                let shown = convert::describe(self, callee);
                Err(VmError::type_error(format!("{} is not a function", shown)))
            }
        }
    }

    /// `new callee(...args)`; `name` is the callee's source name for
    /// diagnostics
    pub fn construct(&mut self, callee: &Value, args: &[Value], name: Option<&str>) -> VmResult<Value> {
        let Some(ctor) = callee.as_object() else {
            return Err(self.not_a_constructor(callee, name));
        };
        match ctor.kind() {
            ObjectKind::Function(closure) => {
                let closure = closure.clone();
                let proto = match ctor.get(&"prototype".into()) {
                    Value::Object(proto) => proto,
                    _ => self.intrinsics.object_prototype.clone(),
                };
                let object = Value::Object(Arc::new(JsObject::ordinary(Some(proto))));
                let result = interpreter::call_closure(self, &closure, object.clone(), args)?;
                Ok(match result {
                    Value::Object(_) => result,
                    _ => object,
                })
            }
            ObjectKind::Native(native) => {
                let native = native.clone();
                native.call(self, Value::Undefined, args.to_vec())
            }
            _ => Err(self.not_a_constructor(callee, name)),
        }
    }

    fn not_a_constructor(&mut self, callee: &Value, name: Option<&str>) -> VmError {
        let shown = match name {
            Some(name) => name.to_string(),
            None => convert::describe(self, callee),
        };
        VmError::type_error(format!("{} is not a constructor", shown))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("call_depth", &self.call_depth)
            .field("instruction_count", &self.instruction_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globals_are_installed() {
        let ctx = Context::new();
        for name in ["Object", "Array", "Error", "TypeError", "ReferenceError", "RangeError"] {
            let ctor = ctx.global().get(&PropertyKey::from(name));
            assert!(ctor.is_callable(), "{} is not callable", name);
        }
        assert!(ctx.global().own_enumerable_keys().is_empty());
    }

    #[test]
    fn test_native_call_and_construct() {
        let mut ctx = Context::new();
        ctx.define_native("twice", |ctx, _this, args| {
            let n = convert::to_number(ctx, args.first().unwrap_or(&Value::Undefined))?;
            Ok(Value::from(n * 2.0))
        });
        let twice = ctx.global().get(&"twice".into());
        let result = ctx.call(&twice, Value::Undefined, &[Value::from("21")]).unwrap();
        assert_eq!(result, Value::from(42));

        let type_error = ctx.global().get(&"TypeError".into());
        let err = ctx.construct(&type_error, &[Value::from("bad")], None).unwrap();
        let err_obj = err.as_object().unwrap();
        assert!(err_obj.inherits_from(&ctx.intrinsics().error_prototype));
        assert_eq!(convert::describe(&mut ctx, &err), "TypeError: bad");
    }

    #[test]
    fn test_calling_a_non_function() {
        let mut ctx = Context::new();
        let err = ctx.call(&Value::from(3), Value::Undefined, &[]).unwrap_err();
        assert!(matches!(err, VmError::TypeError(msg) if msg == "3 is not a function"));
        let err = ctx.construct(&Value::Null, &[], Some("Foo")).unwrap_err();
        assert!(matches!(err, VmError::TypeError(msg) if msg == "Foo is not a constructor"));
    }

    #[test]
    fn test_budget_and_interrupt() {
        let mut ctx = Context::with_config(ContextConfig {
            instruction_threshold: Some(10),
            ..ContextConfig::default()
        });
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = seen.clone();
        ctx.set_instruction_observer(move |count| {
            log.lock().push(count);
            Ok(())
        });
        ctx.observe_instructions(4).unwrap();
        ctx.observe_instructions(7).unwrap();
        assert_eq!(ctx.instruction_count(), 0);
        assert_eq!(*seen.lock(), vec![11]);

        ctx.interrupt();
        assert!(matches!(ctx.observe_instructions(1), Err(VmError::Interrupted)));
        ctx.clear_interrupt();
        assert!(ctx.observe_instructions(1).is_ok());
    }
}
