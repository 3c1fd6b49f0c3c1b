//! Register mapping model
//!
//! A [`MappingEntry`] exposes a contiguous range of registers read from one
//! RS485 slave at a fixed offset of the gateway's Modbus-TCP register space.
//! A [`MappingTable`] is the ordered list of entries making up one device
//! configuration. Order is presentation order only; it carries no meaning for
//! polling but is kept stable so the operator sees the table the way it was
//! saved.
//!
//! Overlap checking only looks at the TCP side. Two entries may read the same
//! slave registers as long as they land on disjoint TCP ranges.

use serde::{Deserialize, Serialize};

use crate::core::error::ValidationError;

/// Highest unicast station address on an RTU bus.
pub const MAX_SLAVE_ID: u8 = 247;

/// One rule translating an RS485 slave/register range into a TCP-exposed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingEntry {
    /// RS485 bus address of the source device.
    #[serde(rename = "s")]
    pub slave_id: u8,
    /// Starting register offset on the slave.
    #[serde(rename = "r")]
    pub register_address: u16,
    /// Count of consecutive registers covered.
    ///
    /// Files written by the oldest firmware do not carry a length; those
    /// entries map a single register.
    #[serde(rename = "n", default = "default_length")]
    pub length: u16,
    /// Starting offset in the exposed Modbus-TCP register space.
    #[serde(rename = "t")]
    pub tcp_address: u16,
}

fn default_length() -> u16 {
    1
}

impl MappingEntry {
    pub fn new(slave_id: u8, register_address: u16, length: u16, tcp_address: u16) -> Self {
        Self {
            slave_id,
            register_address,
            length,
            tcp_address,
        }
    }

    /// Inclusive end offset of the TCP range.
    ///
    /// Computed as `tcp_address + length - 1` in 32 bits so that an invalid
    /// entry reports its real end instead of wrapping. Zero-length entries
    /// return `tcp_address`; they are rejected by [`MappingEntry::validate`].
    pub fn tcp_end(&self) -> u32 {
        u32::from(self.tcp_address) + u32::from(self.length.max(1)) - 1
    }

    /// Inclusive end register on the slave side.
    pub fn register_end(&self) -> u32 {
        u32::from(self.register_address) + u32::from(self.length.max(1)) - 1
    }

    /// Closed-interval intersection on the TCP side. A single shared offset
    /// counts as a collision.
    pub fn overlaps(&self, other: &MappingEntry) -> bool {
        u32::from(self.tcp_address) <= other.tcp_end()
            && u32::from(other.tcp_address) <= self.tcp_end()
    }

    /// Checks the entry on its own, without looking at its neighbours.
    pub fn validate(&self, index: usize) -> Result<(), ValidationError> {
        if self.slave_id == 0 || self.slave_id > MAX_SLAVE_ID {
            return Err(ValidationError::SlaveIdOutOfRange {
                index,
                slave_id: self.slave_id,
            });
        }
        if self.length == 0 {
            return Err(ValidationError::ZeroLength { index });
        }
        if self.tcp_end() > u32::from(u16::MAX) {
            return Err(ValidationError::RangeOverflow {
                index,
                space: "tcp",
                end: self.tcp_end(),
            });
        }
        if self.register_end() > u32::from(u16::MAX) {
            return Err(ValidationError::RangeOverflow {
                index,
                space: "slave",
                end: self.register_end(),
            });
        }
        Ok(())
    }
}

/// Ordered collection of mapping entries forming one configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
}

impl MappingTable {
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MappingEntry> {
        self.entries.iter()
    }

    /// Returns the entry whose TCP range contains `tcp_address`.
    pub fn entry_at(&self, tcp_address: u16) -> Option<&MappingEntry> {
        let addr = u32::from(tcp_address);
        self.entries
            .iter()
            .find(|e| u32::from(e.tcp_address) <= addr && addr <= e.tcp_end())
    }

    /// Finds the first pair of entries whose TCP ranges intersect.
    ///
    /// Entries are visited in ascending `tcp_address` order while tracking the
    /// furthest end seen so far, so a collision is found in `O(n log n)`. The
    /// returned indices refer to table order, lowest first.
    pub fn find_overlap(&self) -> Option<(usize, usize)> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&i| (self.entries[i].tcp_address, i));

        let mut widest: Option<usize> = None;
        for &i in &order {
            if let Some(w) = widest {
                if self.entries[w].overlaps(&self.entries[i]) {
                    return Some((w.min(i), w.max(i)));
                }
                if self.entries[i].tcp_end() > self.entries[w].tcp_end() {
                    widest = Some(i);
                }
            } else {
                widest = Some(i);
            }
        }
        None
    }

    /// Full check of a candidate table: every entry on its own, then the
    /// pairwise TCP overlap test. The first problem found is reported.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (index, entry) in self.entries.iter().enumerate() {
            entry.validate(index)?;
        }
        if let Some((first, second)) = self.find_overlap() {
            let a = &self.entries[first];
            let b = &self.entries[second];
            return Err(ValidationError::Overlap {
                first,
                second,
                first_start: a.tcp_address,
                first_end: a.tcp_end(),
                second_start: b.tcp_address,
                second_end: b.tcp_end(),
            });
        }
        Ok(())
    }
}

impl From<Vec<MappingEntry>> for MappingTable {
    fn from(entries: Vec<MappingEntry>) -> Self {
        Self::new(entries)
    }
}

impl<'a> IntoIterator for &'a MappingTable {
    type Item = &'a MappingEntry;
    type IntoIter = std::slice::Iter<'a, MappingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
