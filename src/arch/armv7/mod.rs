//! ARMv7-A register state for the Virtualization Extensions.
//!
//! The structures here are plain data: the trap vector stub captures the
//! live register file into `Registers`, and the context manager copies
//! between these structures and the hardware through [`world::WorldSwitch`].

#[cfg(target_arch = "arm")]
pub mod cp15;
pub mod world;

use log::error;

/// CPSR mode field.
pub const PSR_MODE_MASK: u32 = 0x1F;
pub const PSR_MODE_USR: u32 = 0x10;
pub const PSR_MODE_FIQ: u32 = 0x11;
pub const PSR_MODE_IRQ: u32 = 0x12;
pub const PSR_MODE_SVC: u32 = 0x13;
pub const PSR_MODE_MON: u32 = 0x16;
pub const PSR_MODE_ABT: u32 = 0x17;
pub const PSR_MODE_HYP: u32 = 0x1A;
pub const PSR_MODE_UND: u32 = 0x1B;
pub const PSR_MODE_SYS: u32 = 0x1F;

pub const NUM_GPR: usize = 13;

/// The register file captured at trap entry: r0-r12, lr, pc, cpsr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub gpr: [u32; NUM_GPR],
    pub lr: u32,
    pub pc: u32,
    pub cpsr: u32,
}

impl Registers {
    /// CPSR mode field of the trapped context.
    pub fn mode(&self) -> u32 {
        self.cpsr & PSR_MODE_MASK
    }
}

/// Banked registers for every guest-visible mode. Cortex-A15 does not
/// implement sp_fiq.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BankedRegs {
    pub sp_usr: u32,
    pub spsr_svc: u32,
    pub sp_svc: u32,
    pub lr_svc: u32,
    pub spsr_abt: u32,
    pub sp_abt: u32,
    pub lr_abt: u32,
    pub spsr_und: u32,
    pub sp_und: u32,
    pub lr_und: u32,
    pub spsr_irq: u32,
    pub sp_irq: u32,
    pub lr_irq: u32,
    pub spsr_fiq: u32,
    pub lr_fiq: u32,
    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
}

/// Guest system-control registers accessed through CP15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopRegs {
    pub vbar: u32,
    pub ttbr0: u32,
    pub ttbr1: u32,
    pub ttbcr: u32,
    pub sctlr: u32,
}

pub fn mode_name(mode: u32) -> &'static str {
    match mode {
        PSR_MODE_USR => "User",
        PSR_MODE_FIQ => "FIQ",
        PSR_MODE_IRQ => "IRQ",
        PSR_MODE_SVC => "Supervisor",
        PSR_MODE_MON => "Monitor",
        PSR_MODE_ABT => "Abort",
        PSR_MODE_HYP => "Hyp",
        PSR_MODE_UND => "Undefined",
        PSR_MODE_SYS => "System",
        _ => "Unknown",
    }
}

/// Full register dump for internal-invariant violations.
pub fn dump_registers(regs: &Registers) {
    error!(
        "cpsr: {:#010x} ({})  pc: {:#010x}  lr: {:#010x}",
        regs.cpsr,
        mode_name(regs.mode()),
        regs.pc,
        regs.lr
    );
    for (i, gpr) in regs.gpr.iter().enumerate() {
        error!("  r{:<2}: {:#010x}", i, gpr);
    }
}

/// Index of the physical core this code runs on (MPIDR Aff0). Host builds
/// report core 0.
pub fn core_id() -> u32 {
    #[cfg(target_arch = "arm")]
    {
        cp15::read_mpidr() & 0x3
    }
    #[cfg(not(target_arch = "arm"))]
    {
        0
    }
}
