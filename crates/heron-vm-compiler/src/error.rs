//! Compilation errors

use heron_vm_bytecode::BytecodeError;
use thiserror::Error;

/// Compilation errors.
///
/// Every variant is fatal: a failed compilation never yields a unit.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Encoding limits exceeded (constant tables, jump distance)
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),

    /// Tree shape the compiler does not handle
    #[error("Unhandled tree shape at line {line}: {shape}")]
    UnhandledTree {
        /// Description of the node
        shape: String,
        /// Source line of the enclosing statement
        line: u32,
    },

    /// Invalid assignment target
    #[error("Invalid assignment target at line {0}")]
    InvalidAssignmentTarget(u32),

    /// `break` outside a loop, switch or matching label
    #[error("Illegal break{} at line {line}", label.as_ref().map(|l| format!(" {}", l)).unwrap_or_default())]
    IllegalBreak {
        /// Target label
        label: Option<String>,
        /// Source line
        line: u32,
    },

    /// `continue` outside a loop or naming a non-loop label
    #[error("Illegal continue{} at line {line}", label.as_ref().map(|l| format!(" {}", l)).unwrap_or_default())]
    IllegalContinue {
        /// Target label
        label: Option<String>,
        /// Source line
        line: u32,
    },

    /// Too many locals
    #[error("Too many local variables (max 65535)")]
    TooManyLocals,

    /// Call site with more arguments than the encoding allows
    #[error("Too many arguments ({0}, max 65535)")]
    TooManyArguments(usize),

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create an unhandled tree shape error
    pub fn unhandled(shape: impl Into<String>, line: u32) -> Self {
        Self::UnhandledTree {
            shape: shape.into(),
            line,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
