//! # Heron VM Compiler
//!
//! Compiles resolved syntax trees to stack bytecode.
//!
//! ## Pipeline
//!
//! 1. Resolve scopes (or accept a tree resolved upstream)
//! 2. Walk the tree, tracking operand-stack depth per unit
//! 3. Resolve labels and verify stack balance
//! 4. Produce one immutable [`FunctionUnit`] per function and script

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod error;
pub mod resolve;

pub use compiler::{CompileOptions, Compiler};
pub use error::{CompileError, CompileResult};
pub use heron_vm_bytecode::FunctionUnit;
pub use resolve::{resolve_function, resolve_script};
