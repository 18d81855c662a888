use crate::core::constants::{PageNum, SlotId};
use std::fmt;

/// Logical address of a stored value: page number in the upper 48 bits,
/// slot id in the lower 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address {
    /// Reserved value meaning "not found".
    pub const UNKNOWN: Address = Address(u64::MAX);

    const PAGE_MASK: u64 = (1 << 48) - 1;

    pub fn new(page_num: PageNum, slot: SlotId) -> Self {
        Address(((page_num & Self::PAGE_MASK) << 16) | slot as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Address(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn page_num(self) -> PageNum {
        self.0 >> 16
    }

    pub fn slot(self) -> SlotId {
        (self.0 & 0xFFFF) as SlotId
    }

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.page_num(), self.slot())
        }
    }
}
