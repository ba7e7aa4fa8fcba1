//! Debugger callbacks

use heron_vm_bytecode::FunctionUnit;

use crate::error::VmError;

/// Observer of interpreter events.
///
/// Every method has an empty default, so implementors only override the
/// events they care about. Hooks run on the interpreting thread and must not
/// re-enter the context.
pub trait DebugHooks: Send + Sync {
    /// A frame for `unit` is about to run its first instruction
    fn on_enter(&self, _unit: &FunctionUnit) {}

    /// Execution reached a new source line
    fn on_line(&self, _unit: &FunctionUnit, _line: u32) {}

    /// An error reached the frame's handler lookup
    fn on_exception(&self, _unit: &FunctionUnit, _error: &VmError) {}

    /// The frame finished; `completed` is false when it exits by an error.
    /// Called exactly once per entered frame.
    fn on_exit(&self, _unit: &FunctionUnit, _completed: bool) {}
}
