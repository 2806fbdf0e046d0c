//! Interface to the stage-2 memory virtualization collaborator.
//!
//! Page-table construction lives outside the core; the context manager
//! only swaps which table is active and gates stage-2 translation around
//! a transplant.

use crate::vmid::VmId;

/// Opaque handle to a guest's stage-2 translation table. The table itself
/// is owned by the memory subsystem; contexts hold the handle only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TtblHandle(pub u64);

pub trait StageTwo {
    /// Translation-table handle for a guest, built at boot.
    fn translation_table(&self, vmid: VmId) -> TtblHandle;

    /// Make `ttbl` the active stage-2 table (VTTBR + VMID tag).
    fn activate_table(&mut self, vmid: VmId, ttbl: TtblHandle);

    /// Gate stage-2 translation (HCR.VM).
    fn set_enabled(&mut self, enabled: bool);
}
