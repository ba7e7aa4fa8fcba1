//! Activation frame layout
//!
//! One invocation's storage is a single index space split into four
//! contiguous regions: declared variables, temporaries, try-region saves and
//! the operand stack. The region sizes are fixed when a unit is compiled.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Slots reserved per active try region (saved scope, saved resume pc)
pub const TRY_SAVE_SLOTS: usize = 2;

/// Region sizes of a unit's activation frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Declared parameters and `var`s
    pub var_count: u16,
    /// Compiler temporaries (switch values, enumerators, finally state)
    pub temp_count: u16,
    /// Maximum nesting of try regions
    pub try_depth: u16,
    /// Maximum operand stack depth
    pub max_stack: u16,
}

impl FrameLayout {
    /// Create a layout from its four region sizes
    pub fn new(var_count: u16, temp_count: u16, try_depth: u16, max_stack: u16) -> Self {
        let layout = Self {
            var_count,
            temp_count,
            try_depth,
            max_stack,
        };
        let regions = layout.variables().len()
            + layout.temporaries().len()
            + layout.try_saves().len()
            + layout.stack().len();
        assert_eq!(
            regions,
            layout.total(),
            "frame regions do not partition the frame"
        );
        layout
    }

    /// Slot range of declared variables
    #[inline]
    pub fn variables(&self) -> Range<usize> {
        0..self.var_count as usize
    }

    /// Slot range of temporaries
    #[inline]
    pub fn temporaries(&self) -> Range<usize> {
        let start = self.variables().end;
        start..start + self.temp_count as usize
    }

    /// Slot range of try-region saves
    #[inline]
    pub fn try_saves(&self) -> Range<usize> {
        let start = self.temporaries().end;
        start..start + self.try_depth as usize * TRY_SAVE_SLOTS
    }

    /// Slot range of the operand stack
    #[inline]
    pub fn stack(&self) -> Range<usize> {
        let start = self.try_saves().end;
        start..start + self.max_stack as usize
    }

    /// Total slots of one activation
    #[inline]
    pub fn total(&self) -> usize {
        self.var_count as usize
            + self.temp_count as usize
            + self.try_depth as usize * TRY_SAVE_SLOTS
            + self.max_stack as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_are_contiguous() {
        let layout = FrameLayout::new(3, 2, 1, 4);
        assert_eq!(layout.variables(), 0..3);
        assert_eq!(layout.temporaries(), 3..5);
        assert_eq!(layout.try_saves(), 5..7);
        assert_eq!(layout.stack(), 7..11);
        assert_eq!(layout.total(), 11);
    }

    #[test]
    fn test_empty_layout() {
        let layout = FrameLayout::new(0, 0, 0, 0);
        assert_eq!(layout.total(), 0);
        assert!(layout.stack().is_empty());
    }
}
