//! The hypervisor object: one per core, built once at boot, threaded by
//! reference through the trap dispatcher. Owns the context manager, the
//! vGIC, the physical GIC driver, and the route map; borrows the
//! stage-2 memory, MMIO-emulation, and world-switch collaborators.

use log::{info, warn};

use crate::arch::armv7::world::WorldSwitch;
use crate::arch::armv7::{core_id, Registers};
use crate::config::{DEFAULT_PRIORITY, MAINTENANCE_IRQ, ROUTE_TABLE, SCHED_TIMER_IRQ};
use crate::context::ContextManager;
use crate::error::{HvError, Result};
use crate::gic::{Gic, IrqPolarity, IAR_IRQ_MASK, SPURIOUS_IRQ};
use crate::mm::StageTwo;
use crate::scheduler;
use crate::vdev::{DeviceBus, MmioFault, VdevLevel};
use crate::vgic::{Vgic, VirtIface};
use crate::virqmap::VirqMap;
use crate::vmid::VmId;

pub struct Hypervisor<'a, V: VirtIface> {
    ctx: ContextManager,
    vgic: Vgic<V>,
    gic: Gic,
    virqmap: VirqMap,
    mm: &'a mut dyn StageTwo,
    bus: &'a mut dyn DeviceBus,
    world: &'a mut dyn WorldSwitch,
}

impl<'a, V: VirtIface> Hypervisor<'a, V> {
    pub fn new(
        vgic: Vgic<V>,
        gic: Gic,
        mm: &'a mut dyn StageTwo,
        bus: &'a mut dyn DeviceBus,
        world: &'a mut dyn WorldSwitch,
    ) -> Self {
        Hypervisor {
            ctx: ContextManager::new(),
            vgic,
            gic,
            virqmap: VirqMap::from_table(ROUTE_TABLE),
            mm,
            bus,
            world,
        }
    }

    /// Bring up the interrupt plumbing and seed every guest context.
    pub fn init(&mut self) -> Result<()> {
        self.gic.init()?;
        self.gic
            .configure_irq(MAINTENANCE_IRQ, IrqPolarity::Level, 1 << core_id(), DEFAULT_PRIORITY)?;
        self.gic
            .configure_irq(SCHED_TIMER_IRQ, IrqPolarity::Level, 1 << core_id(), DEFAULT_PRIORITY)?;
        self.ctx.init_guests(&*self.mm);
        Ok(())
    }

    pub fn current_vmid(&self) -> Option<VmId> {
        self.ctx.current_vmid()
    }

    /// Request a guest switch at the next safe point.
    pub fn switch_to(&mut self, vmid: VmId) -> Result<()> {
        self.ctx.switch_to(vmid)
    }

    /// Honor a pending switch request (or flush the running guest's
    /// queued interrupts when staying put).
    pub fn perform_switch(&mut self, regs: Option<&mut Registers>) -> Result<()> {
        self.ctx
            .perform_switch(regs, &mut self.vgic, &mut *self.mm, &mut *self.world)
    }

    /// Boot handoff: enter the first guest. Does not return; if entry
    /// fails the core parks.
    pub fn switch_to_initial_guest(&mut self) -> ! {
        info!("hypervisor: entering initial guest");
        let _ = self.ctx.switch_to(VmId::first());
        let _ = self.perform_switch(None);
        log::error!("hypervisor: initial guest entry failed, parking core");
        loop {
            core::hint::spin_loop();
        }
    }

    /// Periodic tick: pick the round-robin successor and commit a locked
    /// switch request; the switch itself happens on trap exit.
    pub fn on_sched_tick(&mut self) {
        let next = scheduler::next_vmid(self.ctx.current_vmid());
        let _ = self.ctx.switch_to_locked(next, true);
    }

    /// Top-level physical interrupt handler: acknowledge, then either
    /// forward to the routed guest as a virtual interrupt or consume the
    /// line in the hypervisor.
    pub fn dispatch_physical_irq(&mut self, regs: &mut Registers) {
        let iar = self.gic.acknowledge();
        let irq = iar & IAR_IRQ_MASK;
        if irq == SPURIOUS_IRQ {
            return;
        }
        let current = self.ctx.current_vmid();
        if let Some(route) = self.virqmap.lookup(irq) {
            // Priority drop now; the guest's EOI deactivates the line
            // through the list register's hardware back-reference.
            self.gic.priority_drop(iar);
            if let Err(err) = self
                .vgic
                .inject_virq(route.vmid, route.virq, irq, true, current)
            {
                warn!(
                    "hypervisor: dropped pirq {} for {} virq {}: {}",
                    irq, route.vmid, route.virq, err
                );
            }
        } else {
            match irq {
                MAINTENANCE_IRQ => self.vgic.handle_maintenance(current, &mut self.gic),
                SCHED_TIMER_IRQ => self.on_sched_tick(),
                _ => {
                    if let Some(handler) = self.gic.handler(irq) {
                        handler(irq, regs);
                    } else {
                        warn!("hypervisor: unrouted, unhandled pirq {}", irq);
                    }
                }
            }
            self.gic.priority_drop(iar);
            self.gic.deactivate_irq(irq);
        }
    }

    /// Route a decoded guest MMIO access through the emulation bus,
    /// highest priority level first. No claiming device means the guest
    /// touched an address nothing emulates.
    pub fn emulate_mmio(&mut self, fault: &MmioFault, regs: &mut Registers) -> Result<()> {
        for level in VdevLevel::ALL {
            let Some(dev) = self.bus.find_device(level, fault, regs) else {
                continue;
            };
            if fault.write {
                self.bus.write(dev, fault, regs)?;
            } else {
                self.bus.read(dev, fault, regs)?;
            }
            return self.bus.post(dev, fault, regs);
        }
        Err(HvError::BadAccess)
    }

    /// A guest rewrote one word of its virtual interrupt-enable state;
    /// mirror the flips onto the backing physical lines.
    pub fn guest_enable_status_changed(&mut self, vmid: VmId, status: u32, word_index: usize) {
        self.virqmap
            .enable_status_changed(vmid, status, word_index, &mut self.gic);
    }

    pub fn vgic(&self) -> &Vgic<V> {
        &self.vgic
    }

    pub fn vgic_mut(&mut self) -> &mut Vgic<V> {
        &mut self.vgic
    }

    pub fn gic_mut(&mut self) -> &mut Gic {
        &mut self.gic
    }

    pub fn context_manager(&self) -> &ContextManager {
        &self.ctx
    }

    pub fn context_manager_mut(&mut self) -> &mut ContextManager {
        &mut self.ctx
    }

    pub fn virqmap(&self) -> &VirqMap {
        &self.virqmap
    }
}
