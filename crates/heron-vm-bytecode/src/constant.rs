//! De-duplicating side tables referenced from the instruction stream

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::MAX_TABLE_ENTRIES;
use crate::error::{BytecodeError, Result};

fn next_index(len: usize, table: &'static str) -> Result<u16> {
    if len >= MAX_TABLE_ENTRIES {
        return Err(BytecodeError::TooManyConstants { table });
    }
    Ok(len as u16)
}

/// Interned strings: property names, variable names and string literals
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<String>,
    index: FxHashMap<String, u16>,
}

impl StringTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `s`, adding it if not present
    pub fn add(&mut self, s: &str) -> Result<u16> {
        if let Some(&idx) = self.index.get(s) {
            return Ok(idx);
        }
        let idx = next_index(self.strings.len(), "string")?;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        Ok(idx)
    }

    /// Number of distinct strings
    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Hand out the strings in index order
    pub fn into_vec(self) -> Vec<String> {
        self.strings
    }
}

/// Numeric literals that cannot be encoded inline.
///
/// Keys are the IEEE-754 bit patterns, so `0.0` and `-0.0` stay distinct and
/// every NaN literal shares one entry per bit pattern.
#[derive(Debug, Default)]
pub struct NumberTable {
    numbers: Vec<f64>,
    index: FxHashMap<u64, u16>,
}

impl NumberTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `n`, adding it if not present
    pub fn add(&mut self, n: f64) -> Result<u16> {
        let bits = n.to_bits();
        if let Some(&idx) = self.index.get(&bits) {
            return Ok(idx);
        }
        let idx = next_index(self.numbers.len(), "number")?;
        self.numbers.push(n);
        self.index.insert(bits, idx);
        Ok(idx)
    }

    /// Number of distinct numbers
    #[inline]
    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    /// Hand out the numbers in index order
    pub fn into_vec(self) -> Vec<f64> {
        self.numbers
    }
}

/// A regular expression literal template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegExpLiteral {
    /// The regex pattern
    pub pattern: String,
    /// The regex flags (e.g., "gi")
    pub flags: String,
}

impl RegExpLiteral {
    /// Create a regexp literal
    pub fn new(pattern: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }
}
