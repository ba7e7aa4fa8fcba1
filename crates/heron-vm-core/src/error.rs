//! VM error types

use heron_vm_bytecode::BytecodeError;
use thiserror::Error;

use crate::value::Value;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Value thrown by script `throw`
    #[error("Uncaught exception: {0}")]
    Exception(Box<ThrownValue>),

    /// Type error (e.g., calling non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (undefined variable)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Failure raised by the embedding that scripts cannot observe
    #[error("Host error: {0}")]
    Host(String),

    /// Call depth limit exceeded
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Execution was interrupted (timeout/cancellation)
    #[error("Execution interrupted")]
    Interrupted,

    /// Malformed code in a unit
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),
}

/// How an error interacts with script exception handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A script-thrown value; catchable
    Thrown,
    /// A runtime error object (TypeError, ...); catchable
    Runtime,
    /// A host failure with no script representation; never caught
    Host,
    /// Stack exhaustion, interruption or malformed code; never caught
    Fatal,
}

/// A thrown value with its origin
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// String form of the value, captured when thrown
    pub message: String,
    /// Source name of the frame the exception escaped from
    pub source_name: Option<String>,
    /// Line last executed in that frame
    pub line: Option<u32>,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(source) = &self.source_name {
            write!(f, " ({}", source)?;
            if let Some(line) = self.line {
                write!(f, ":{}", line)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a reference error
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create a host error
    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    /// Create an exception carrying a thrown value
    pub fn exception(value: Value, message: impl Into<String>) -> Self {
        Self::Exception(Box::new(ThrownValue {
            value,
            message: message.into(),
            source_name: None,
            line: None,
        }))
    }

    /// Classify the error for unwinding
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Exception(_) => ErrorKind::Thrown,
            Self::TypeError(_) | Self::ReferenceError(_) | Self::RangeError(_) => {
                ErrorKind::Runtime
            }
            Self::Host(_) => ErrorKind::Host,
            Self::StackOverflow | Self::Interrupted | Self::Bytecode(_) => ErrorKind::Fatal,
        }
    }

    /// Whether script `catch` and `finally` handlers see this error
    #[inline]
    pub fn is_catchable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Thrown | ErrorKind::Runtime)
    }

    /// The thrown value, for script exceptions
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Self::Exception(thrown) => Some(&thrown.value),
            _ => None,
        }
    }

    /// Constructor name and message of a runtime error
    pub fn runtime_parts(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::TypeError(msg) => Some(("TypeError", msg)),
            Self::ReferenceError(msg) => Some(("ReferenceError", msg)),
            Self::RangeError(msg) => Some(("RangeError", msg)),
            _ => None,
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
