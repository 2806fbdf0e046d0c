//! Scheduler policy: static round robin over the guest id range.
//!
//! The policy is a pure function; the periodic tick and the cooperative
//! yield both feed its result into `ContextManager::switch_to`.

use crate::vmid::VmId;

/// Next guest in round-robin order. `None` (nothing has run yet) selects
/// the first guest; the last guest wraps to the first.
pub fn next_vmid(current: Option<VmId>) -> VmId {
    match current {
        Some(cur) if cur.is_valid() && cur != VmId::last() => VmId::new(cur.raw() + 1),
        _ => VmId::first(),
    }
}
