//! Guest identifiers.
//!
//! A `VmId` names one slot in the static guest array. "No guest" is always
//! `Option<VmId>` at the call sites; there is no sentinel value.

use crate::config::NUM_GUESTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct VmId(u8);

impl VmId {
    pub const fn new(raw: u8) -> Self {
        VmId(raw)
    }

    /// First guest in the static round-robin order.
    pub const fn first() -> Self {
        VmId(0)
    }

    /// Last guest in the static round-robin order.
    pub const fn last() -> Self {
        VmId(NUM_GUESTS as u8 - 1)
    }

    /// Whether this id names one of the statically configured guests.
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < NUM_GUESTS
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

impl core::fmt::Display for VmId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "vmid[{}]", self.0)
    }
}
