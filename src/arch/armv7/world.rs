//! The world-switch seam between the context manager and the CPU.
//!
//! The context manager decides *what* to copy and in which order; this
//! trait is *how* the copies reach the hardware. On the target the
//! implementation is banked-register and CP15 moves; tests substitute a
//! recording mock.

use super::{BankedRegs, CopRegs, Registers};

pub trait WorldSwitch {
    /// Copy the live banked registers into `out`.
    fn save_banked(&mut self, out: &mut BankedRegs);

    /// Load the live banked registers from `regs`.
    fn restore_banked(&mut self, regs: &BankedRegs);

    /// Copy the guest-visible CP15 registers into `out`.
    fn save_cop(&mut self, out: &mut CopRegs);

    /// Load the guest-visible CP15 registers from `regs`.
    fn restore_cop(&mut self, regs: &CopRegs);

    /// One-way first entry: load `regs` and ERET into the guest. The
    /// register file never comes back through this call; later guest state
    /// arrives via the trap vector.
    fn enter_guest(&mut self, regs: &Registers) -> !;
}

#[cfg(target_arch = "arm")]
pub use target::Armv7WorldSwitch;

#[cfg(target_arch = "arm")]
mod target {
    use super::*;
    use core::arch::asm;

    extern "C" {
        /// Provided by the platform boot code: loads a saved register file
        /// and performs the Hyp-to-guest exception return.
        fn __guest_entry(regs: *const Registers) -> !;
    }

    macro_rules! banked_read {
        ($field:expr, $reg:literal) => {
            unsafe {
                asm!(concat!("mrs {v}, ", $reg), v = out(reg) $field,
                     options(nomem, nostack));
            }
        };
    }

    macro_rules! banked_write {
        ($field:expr, $reg:literal) => {
            unsafe {
                asm!(concat!("msr ", $reg, ", {v}"), v = in(reg) $field,
                     options(nomem, nostack));
            }
        };
    }

    /// Register plumbing for an ARMv7-A core in Hyp mode.
    pub struct Armv7WorldSwitch;

    impl WorldSwitch for Armv7WorldSwitch {
        fn save_banked(&mut self, out: &mut BankedRegs) {
            banked_read!(out.sp_usr, "sp_usr");
            banked_read!(out.spsr_svc, "spsr_svc");
            banked_read!(out.sp_svc, "sp_svc");
            banked_read!(out.lr_svc, "lr_svc");
            banked_read!(out.spsr_abt, "spsr_abt");
            banked_read!(out.sp_abt, "sp_abt");
            banked_read!(out.lr_abt, "lr_abt");
            banked_read!(out.spsr_und, "spsr_und");
            banked_read!(out.sp_und, "sp_und");
            banked_read!(out.lr_und, "lr_und");
            banked_read!(out.spsr_irq, "spsr_irq");
            banked_read!(out.sp_irq, "sp_irq");
            banked_read!(out.lr_irq, "lr_irq");
            banked_read!(out.spsr_fiq, "spsr_fiq");
            banked_read!(out.lr_fiq, "lr_fiq");
            banked_read!(out.r8_fiq, "r8_fiq");
            banked_read!(out.r9_fiq, "r9_fiq");
            banked_read!(out.r10_fiq, "r10_fiq");
            banked_read!(out.r11_fiq, "r11_fiq");
            banked_read!(out.r12_fiq, "r12_fiq");
        }

        fn restore_banked(&mut self, regs: &BankedRegs) {
            banked_write!(regs.sp_usr, "sp_usr");
            banked_write!(regs.spsr_svc, "spsr_svc");
            banked_write!(regs.sp_svc, "sp_svc");
            banked_write!(regs.lr_svc, "lr_svc");
            banked_write!(regs.spsr_abt, "spsr_abt");
            banked_write!(regs.sp_abt, "sp_abt");
            banked_write!(regs.lr_abt, "lr_abt");
            banked_write!(regs.spsr_und, "spsr_und");
            banked_write!(regs.sp_und, "sp_und");
            banked_write!(regs.lr_und, "lr_und");
            banked_write!(regs.spsr_irq, "spsr_irq");
            banked_write!(regs.sp_irq, "sp_irq");
            banked_write!(regs.lr_irq, "lr_irq");
            banked_write!(regs.spsr_fiq, "spsr_fiq");
            banked_write!(regs.lr_fiq, "lr_fiq");
            banked_write!(regs.r8_fiq, "r8_fiq");
            banked_write!(regs.r9_fiq, "r9_fiq");
            banked_write!(regs.r10_fiq, "r10_fiq");
            banked_write!(regs.r11_fiq, "r11_fiq");
            banked_write!(regs.r12_fiq, "r12_fiq");
        }

        fn save_cop(&mut self, out: &mut CopRegs) {
            use crate::arch::armv7::cp15;
            out.vbar = cp15::read_vbar();
            out.ttbr0 = cp15::read_ttbr0();
            out.ttbr1 = cp15::read_ttbr1();
            out.ttbcr = cp15::read_ttbcr();
            out.sctlr = cp15::read_sctlr();
        }

        fn restore_cop(&mut self, regs: &CopRegs) {
            use crate::arch::armv7::cp15;
            cp15::write_vbar(regs.vbar);
            cp15::write_ttbr0(regs.ttbr0);
            cp15::write_ttbr1(regs.ttbr1);
            cp15::write_ttbcr(regs.ttbcr);
            cp15::write_sctlr(regs.sctlr);
        }

        fn enter_guest(&mut self, regs: &Registers) -> ! {
            unsafe { __guest_entry(regs as *const Registers) }
        }
    }
}
