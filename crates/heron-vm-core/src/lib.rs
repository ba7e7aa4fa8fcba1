//! # Heron VM Core
//!
//! Execution engine for compiled Heron units.
//!
//! ## Design Principles
//!
//! - **Thread-safe**: Values are `Send + Sync`; compiled units are shared read-only
//! - **Unboxed numbers**: Numbers live directly in the [`Value`] enum
//! - **Explicit context**: Every entry point takes the [`Context`] it runs in
//! - **Stack-based**: Frames are sized from the unit's [`FrameLayout`](heron_vm_bytecode::FrameLayout)

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod convert;
pub mod debug;
pub mod error;
mod frame;
mod interpreter;
pub mod object;
pub mod scope;
pub mod value;

pub use context::{Context, ContextConfig, InstructionObserver, Intrinsics};
pub use debug::DebugHooks;
pub use error::{ErrorKind, ThrownValue, VmError, VmResult};
pub use object::{Closure, JsObject, NativeFunction, ObjectKind, PropertyAttributes, PropertyKey};
pub use scope::{Scope, ScopeKind};
pub use value::Value;
