//! Interface to the virtual-device MMIO emulation registry.
//!
//! Devices themselves are external; the trap dispatcher hands a decoded
//! data abort to the bus and expects it to emulate the access and advance
//! the guest PC via `post`.

use crate::arch::armv7::Registers;
use crate::error::Result;

/// Access width of a trapped load/store, from the ISS SAS field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    Byte,
    Half,
    Word,
}

impl AccessSize {
    /// Decode the two SAS bits; 0b11 is reserved on ARMv7.
    pub fn from_sas(sas: u32) -> Option<Self> {
        match sas {
            0 => Some(AccessSize::Byte),
            1 => Some(AccessSize::Half),
            2 => Some(AccessSize::Word),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            AccessSize::Byte => 8,
            AccessSize::Half => 16,
            AccessSize::Word => 32,
        }
    }
}

/// Device lookup priority. The dispatcher probes levels in declaration
/// order so e.g. the virtual distributor can shadow a wider region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdevLevel {
    High,
    Middle,
    Low,
}

impl VdevLevel {
    pub const ALL: [VdevLevel; 3] = [VdevLevel::High, VdevLevel::Middle, VdevLevel::Low];
}

/// A decoded, syndrome-valid guest data abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioFault {
    /// Faulting intermediate physical address.
    pub ipa: u64,
    /// True for a store, false for a load.
    pub write: bool,
    pub size: AccessSize,
    /// Guest register transferring the data (ISS SRT).
    pub reg: u8,
    /// Sign-extend the loaded value (ISS SSE).
    pub sign_extend: bool,
}

/// Identifier a bus hands back from `find_device`, opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle(pub usize);

pub trait DeviceBus {
    /// Device claiming this fault at the given priority level, if any.
    fn find_device(
        &self,
        level: VdevLevel,
        fault: &MmioFault,
        regs: &Registers,
    ) -> Option<DeviceHandle>;

    /// Emulate a load; writes the result into `regs.gpr[fault.reg]`.
    fn read(&mut self, dev: DeviceHandle, fault: &MmioFault, regs: &mut Registers) -> Result<()>;

    /// Emulate a store from `regs.gpr[fault.reg]`.
    fn write(&mut self, dev: DeviceHandle, fault: &MmioFault, regs: &mut Registers) -> Result<()>;

    /// Completion hook: advances the guest PC past the faulting instruction.
    fn post(&mut self, dev: DeviceHandle, fault: &MmioFault, regs: &mut Registers) -> Result<()>;
}
