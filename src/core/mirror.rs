//! In-memory copy of the exposed Modbus-TCP register space.
//!
//! The poll engine is the only writer. TCP clients and the `/value` endpoint
//! read from here and never touch the serial bus.

use parking_lot::RwLock;

/// Number of addressable registers in the 16-bit Modbus space.
pub const REGISTER_SPACE: usize = u16::MAX as usize + 1;

pub struct RegisterMirror {
    registers: RwLock<Vec<u16>>,
}

impl Default for RegisterMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMirror {
    pub fn new() -> Self {
        Self {
            registers: RwLock::new(vec![0u16; REGISTER_SPACE]),
        }
    }

    fn span(start: u16, count: u16) -> Option<std::ops::Range<usize>> {
        let begin = start as usize;
        let end = begin + count as usize;
        (count > 0 && end <= REGISTER_SPACE).then_some(begin..end)
    }

    /// Copies `count` cached registers starting at `start`.
    ///
    /// Returns `None` for an empty range or one running past offset 65535.
    pub fn read(&self, start: u16, count: u16) -> Option<Vec<u16>> {
        let span = Self::span(start, count)?;
        Some(self.registers.read()[span].to_vec())
    }

    /// Stores freshly polled values. Values that would run past the end of
    /// the space are dropped.
    pub fn write(&self, start: u16, values: &[u16]) {
        let begin = start as usize;
        let end = (begin + values.len()).min(REGISTER_SPACE);
        if begin >= end {
            return;
        }
        self.registers.write()[begin..end].copy_from_slice(&values[..end - begin]);
    }

    /// Zeroes a range, used when a mapping is removed from the table.
    pub fn clear(&self, start: u16, count: u16) {
        if let Some(span) = Self::span(start, count) {
            self.registers.write()[span].fill(0);
        }
    }
}
