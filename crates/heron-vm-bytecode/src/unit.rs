//! Compiled units

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constant::RegExpLiteral;
use crate::decode::Instructions;
use crate::layout::FrameLayout;

/// Unit flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    /// Top-level script rather than a function body
    pub is_script: bool,
    /// Variables live in a heap activation object instead of frame slots
    pub needs_activation: bool,
}

/// One compiled function or script.
///
/// Immutable once built; the interpreter shares it read-only across every
/// invocation and closure created from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionUnit {
    /// Function name (None for anonymous functions and scripts)
    pub name: Option<String>,

    /// Number of declared parameters
    pub param_count: u16,

    /// Names of the variable slots, parameters first
    pub var_names: Vec<String>,

    /// Instruction stream
    pub code: Box<[u8]>,

    /// String table
    pub strings: Vec<String>,

    /// Number table
    pub numbers: Vec<f64>,

    /// Nested function templates
    pub functions: Vec<Arc<FunctionUnit>>,

    /// Regular expression literal templates
    pub regexps: Vec<RegExpLiteral>,

    /// Frame region sizes
    pub layout: FrameLayout,

    /// Largest argument count of any call site
    pub max_call_args: u16,

    /// Unit flags
    pub flags: UnitFlags,

    /// Source file name
    pub source_name: String,

    /// Source text kept for decompilation, if requested
    pub source: Option<Arc<str>>,

    /// Line of the function's first statement
    pub first_line: u32,
}

impl FunctionUnit {
    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        match (&self.name, self.flags.is_script) {
            (Some(name), _) => name,
            (None, true) => "<script>",
            (None, false) => "<anonymous>",
        }
    }

    /// Whether this unit is a top-level script
    #[inline]
    pub fn is_script(&self) -> bool {
        self.flags.is_script
    }

    /// Whether invocations need an activation object
    #[inline]
    pub fn needs_activation(&self) -> bool {
        self.flags.needs_activation
    }

    /// String table entry
    #[inline]
    pub fn string(&self, idx: u16) -> &str {
        &self.strings[idx as usize]
    }

    /// Number table entry
    #[inline]
    pub fn number(&self, idx: u16) -> f64 {
        self.numbers[idx as usize]
    }

    /// Nested function template
    #[inline]
    pub fn function(&self, idx: u16) -> &Arc<FunctionUnit> {
        &self.functions[idx as usize]
    }

    /// Regular expression template
    #[inline]
    pub fn regexp(&self, idx: u16) -> &RegExpLiteral {
        &self.regexps[idx as usize]
    }

    /// Names of the non-parameter variables
    pub fn local_names(&self) -> &[String] {
        &self.var_names[self.param_count as usize..]
    }

    /// Decode the instruction stream
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions::new(&self.code)
    }
}
