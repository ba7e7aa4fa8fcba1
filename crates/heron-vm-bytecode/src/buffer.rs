//! Growable instruction buffer

/// Initial capacity of a fresh buffer
const INITIAL_CAPACITY: usize = 256;

/// Append-only byte buffer holding one unit's instruction stream.
///
/// Capacity doubles when exhausted, or grows to exactly the required size when
/// doubling is not enough. [`CodeBuffer::finish`] trims it to its used length.
#[derive(Debug, Default, Clone)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Number of bytes written so far
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Written bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn ensure(&mut self, extra: usize) {
        let needed = self.bytes.len() + extra;
        let capacity = self.bytes.capacity();
        if needed > capacity {
            let target = (capacity * 2).max(needed);
            self.bytes.reserve_exact(target - self.bytes.len());
        }
    }

    /// Append one byte
    pub fn push_u8(&mut self, value: u8) {
        self.ensure(1);
        self.bytes.push(value);
    }

    /// Append a big-endian u16
    pub fn push_u16(&mut self, value: u16) {
        self.ensure(2);
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a big-endian i16
    pub fn push_i16(&mut self, value: i16) {
        self.ensure(2);
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a big-endian i32
    pub fn push_i32(&mut self, value: i32) {
        self.ensure(4);
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Overwrite a previously written i16 (jump backpatching)
    pub fn patch_i16(&mut self, at: usize, value: i16) {
        assert!(
            at + 2 <= self.bytes.len(),
            "patch at {} past end of code ({})",
            at,
            self.bytes.len()
        );
        self.bytes[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Trim to the used length and hand out the bytes
    pub fn finish(mut self) -> Box<[u8]> {
        self.bytes.shrink_to_fit();
        self.bytes.into_boxed_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operands_are_big_endian() {
        let mut buf = CodeBuffer::new();
        buf.push_u8(0xAA);
        buf.push_u16(0x0102);
        buf.push_i32(-1);
        assert_eq!(buf.as_slice(), &[0xAA, 0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_growth_past_initial_capacity() {
        let mut buf = CodeBuffer::new();
        for i in 0..10_000u32 {
            buf.push_u8(i as u8);
        }
        assert_eq!(buf.len(), 10_000);
        let code = buf.finish();
        assert_eq!(code.len(), 10_000);
        assert_eq!(code[9_999], (9_999u32 as u8));
    }

    #[test]
    fn test_patch() {
        let mut buf = CodeBuffer::new();
        buf.push_u8(0);
        buf.push_i16(0);
        buf.patch_i16(1, -300);
        assert_eq!(&buf.as_slice()[1..], &(-300i16).to_be_bytes());
    }
}
