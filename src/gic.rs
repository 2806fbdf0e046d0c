//! Physical GICv2 driver (distributor + CPU interface).
//!
//! The CPU interface runs with split EOI (EOImode = 1): EOIR only drops
//! running priority, and the line stays active until an explicit DIR
//! write. That keeps a guest-forwarded interrupt active while the guest
//! handles its virtual copy; the vGIC maintenance path performs the final
//! deactivation.

use log::{debug, info};

use crate::arch::armv7::Registers;
use crate::config::MAX_IRQS;
use crate::error::{HvError, Result};
use crate::vgic::PirqDeactivate;

// Distributor register offsets, in bytes.
const GICD_CTLR: usize = 0x000;
const GICD_TYPER: usize = 0x004;
const GICD_ISENABLER: usize = 0x100;
const GICD_ICENABLER: usize = 0x180;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ITARGETSR: usize = 0x800;
const GICD_ICFGR: usize = 0xC00;

// CPU-interface register offsets, in bytes.
const GICC_CTLR: usize = 0x0000;
const GICC_PMR: usize = 0x0004;
const GICC_IAR: usize = 0x000C;
const GICC_EOIR: usize = 0x0010;
const GICC_DIR: usize = 0x1000;

const GICD_CTLR_ENABLE: u32 = 1;
const GICC_CTLR_ENABLE: u32 = 1;
const GICC_CTLR_EOIMODE_NS: u32 = 1 << 9;
const GICC_PMR_LOWEST: u32 = 0xFF;

/// IAR value meaning "nothing pending".
pub const SPURIOUS_IRQ: u32 = 0x3FF;
pub const IAR_IRQ_MASK: u32 = 0x3FF;

/// Hypervisor-owned handler for an unrouted physical interrupt.
pub type IrqHandler = fn(irq: u32, regs: &mut Registers);

/// Trigger configuration for a shared peripheral interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqPolarity {
    Level,
    Edge,
}

pub struct Gic {
    gicd: *mut u32,
    gicc: *mut u32,
    lines: u32,
    handlers: [Option<IrqHandler>; MAX_IRQS],
}

impl Gic {
    /// # Safety
    /// `gicd` and `gicc` must be the mapped distributor and CPU-interface
    /// register blocks, exclusively owned by this driver.
    pub unsafe fn new(gicd: *mut u32, gicc: *mut u32) -> Self {
        Gic {
            gicd,
            gicc,
            lines: 0,
            handlers: [None; MAX_IRQS],
        }
    }

    fn gicd_read(&self, offset: usize) -> u32 {
        unsafe { self.gicd.add(offset / 4).read_volatile() }
    }

    fn gicd_write(&mut self, offset: usize, value: u32) {
        unsafe { self.gicd.add(offset / 4).write_volatile(value) }
    }

    fn gicd_write_byte(&mut self, offset: usize, value: u8) {
        unsafe { (self.gicd as *mut u8).add(offset).write_volatile(value) }
    }

    fn gicc_read(&self, offset: usize) -> u32 {
        unsafe { self.gicc.add(offset / 4).read_volatile() }
    }

    fn gicc_write(&mut self, offset: usize, value: u32) {
        unsafe { self.gicc.add(offset / 4).write_volatile(value) }
    }

    /// Probe the line count and bring up distributor and CPU interface in
    /// split-EOI mode.
    pub fn init(&mut self) -> Result<()> {
        let typer = self.gicd_read(GICD_TYPER);
        self.lines = ((typer & 0x1F) + 1) * 32;
        if self.lines as usize > MAX_IRQS {
            return Err(HvError::UnsupportedFeature);
        }
        self.gicd_write(GICD_CTLR, GICD_CTLR_ENABLE);
        self.gicc_write(GICC_PMR, GICC_PMR_LOWEST);
        self.gicc_write(GICC_CTLR, GICC_CTLR_ENABLE | GICC_CTLR_EOIMODE_NS);
        info!("gic: {} interrupt lines, split EOI", self.lines);
        Ok(())
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn enable_irq(&mut self, irq: u32) {
        let reg = GICD_ISENABLER + (irq as usize / 32) * 4;
        self.gicd_write(reg, 1 << (irq % 32));
    }

    pub fn disable_irq(&mut self, irq: u32) {
        let reg = GICD_ICENABLER + (irq as usize / 32) * 4;
        self.gicd_write(reg, 1 << (irq % 32));
    }

    /// Read IAR: acknowledges the highest-priority pending interrupt and
    /// returns its raw value (interrupt ID in the low bits, or
    /// [`SPURIOUS_IRQ`]).
    pub fn acknowledge(&mut self) -> u32 {
        self.gicc_read(GICC_IAR)
    }

    /// Priority drop only; the line remains active until
    /// [`Gic::deactivate_irq`].
    pub fn priority_drop(&mut self, iar: u32) {
        self.gicc_write(GICC_EOIR, iar);
    }

    pub fn deactivate_irq(&mut self, irq: u32) {
        self.gicc_write(GICC_DIR, irq);
    }

    /// Reconfigure one line: trigger mode, target CPUs, priority. The
    /// line is held disabled across the register writes and re-enabled
    /// afterwards.
    pub fn configure_irq(
        &mut self,
        irq: u32,
        polarity: IrqPolarity,
        target_mask: u8,
        priority: u8,
    ) -> Result<()> {
        if irq >= self.lines {
            return Err(HvError::UnsupportedFeature);
        }
        self.disable_irq(irq);

        let cfg_reg = GICD_ICFGR + (irq as usize / 16) * 4;
        let cfg_shift = (irq % 16) * 2 + 1;
        let mut cfg = self.gicd_read(cfg_reg);
        match polarity {
            IrqPolarity::Edge => cfg |= 1 << cfg_shift,
            IrqPolarity::Level => cfg &= !(1 << cfg_shift),
        }
        self.gicd_write(cfg_reg, cfg);

        self.gicd_write_byte(GICD_ITARGETSR + irq as usize, target_mask);
        self.gicd_write_byte(GICD_IPRIORITYR + irq as usize, priority);

        self.enable_irq(irq);
        debug!(
            "gic: irq {} configured {:?} targets {:#x} prio {:#x}",
            irq, polarity, target_mask, priority
        );
        Ok(())
    }

    /// Claim an unrouted interrupt for a hypervisor-side handler. A line
    /// already claimed stays with its first owner.
    pub fn set_handler(&mut self, irq: u32, handler: IrqHandler) -> Result<()> {
        let slot = self
            .handlers
            .get_mut(irq as usize)
            .ok_or(HvError::UnsupportedFeature)?;
        if slot.is_some() {
            return Err(HvError::Busy);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn handler(&self, irq: u32) -> Option<IrqHandler> {
        self.handlers.get(irq as usize).copied().flatten()
    }
}

impl PirqDeactivate for Gic {
    fn deactivate(&mut self, pirq: u32) {
        self.deactivate_irq(pirq);
    }
}
