//! Guest context management: the saved execution state of every guest
//! and the switch machinery that moves the CPU between them.
//!
//! Switching is split in two. `switch_to` only *requests* a switch by
//! recording the target; `perform_switch` later carries it out at a safe
//! point (trap exit), where the trapped guest's register file is in hand.
//! The save/restore sequence is fixed: stage-2 translation goes off
//! before any state moves and comes back on before the vGIC is restored,
//! so no guest ever runs a single instruction under another guest's
//! mappings or interrupt state.

use log::{debug, info, warn};

use crate::arch::armv7::world::WorldSwitch;
use crate::arch::armv7::{BankedRegs, CopRegs, Registers, PSR_MODE_HYP};
use crate::config::{GUEST_CONFIGS, NUM_GUESTS};
use crate::error::{HvError, Result};
use crate::mm::{StageTwo, TtblHandle};
use crate::vgic::{Vgic, VgicSnapshot, VirtIface};
use crate::vmid::VmId;

/// Everything that defines one guest when it is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuestContext {
    pub regs: Registers,
    pub banked: BankedRegs,
    pub cop: CopRegs,
    pub ttbl: TtblHandle,
    pub vgic: VgicSnapshot,
    pub vmid: VmId,
}

pub struct ContextManager {
    contexts: [GuestContext; NUM_GUESTS],
    /// Guest owning the CPU; `None` until the first entry.
    current: Option<VmId>,
    /// Switch request waiting for the next safe point.
    next: Option<VmId>,
    /// Set while a switch is committed and not yet performed.
    locked: bool,
}

impl ContextManager {
    pub fn new() -> Self {
        ContextManager {
            contexts: [GuestContext::default(); NUM_GUESTS],
            current: None,
            next: None,
            locked: false,
        }
    }

    /// Seed every guest context from the static images and bind its
    /// stage-2 translation table.
    pub fn init_guests(&mut self, mm: &dyn StageTwo) {
        for (i, cfg) in GUEST_CONFIGS.iter().enumerate() {
            let vmid = VmId::new(i as u8);
            let ctx = &mut self.contexts[i];
            ctx.vmid = vmid;
            ctx.regs = Registers::default();
            ctx.regs.pc = cfg.entry_pc;
            ctx.regs.cpsr = cfg.initial_psr;
            ctx.ttbl = mm.translation_table(vmid);
            info!("context: {} at pc {:#010x}", vmid, cfg.entry_pc);
        }
    }

    pub fn current_vmid(&self) -> Option<VmId> {
        self.current
    }

    /// Guest a committed switch is waiting to run, if any.
    pub fn waiting_vmid(&self) -> Option<VmId> {
        self.next
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn context(&self, vmid: VmId) -> &GuestContext {
        &self.contexts[vmid.index()]
    }

    pub fn context_mut(&mut self, vmid: VmId) -> &mut GuestContext {
        &mut self.contexts[vmid.index()]
    }

    /// Request a switch to `vmid` at the next safe point.
    pub fn switch_to(&mut self, vmid: VmId) -> Result<()> {
        self.switch_to_locked(vmid, false)
    }

    /// Like [`ContextManager::switch_to`], optionally locking out further
    /// requests until the switch is performed. A request made while
    /// locked is dropped.
    pub fn switch_to_locked(&mut self, vmid: VmId, lock: bool) -> Result<()> {
        if self.locked {
            debug!("context: switch to {} ignored, switch in flight", vmid);
            return Err(HvError::Ignored);
        }
        if !vmid.is_valid() {
            warn!("context: switch to invalid {}", vmid);
            return Err(HvError::BadAccess);
        }
        self.next = Some(vmid);
        if lock {
            self.locked = true;
        }
        Ok(())
    }

    /// Carry out a pending switch at a safe point, with `regs` being the
    /// trapped guest's register file (or `None` on the very first entry,
    /// when there is no guest state to save).
    ///
    /// Three cases:
    /// - first entry: restore the requested guest and enter it (never
    ///   returns);
    /// - a different guest is requested and the trap came from guest
    ///   mode: full save/restore through `regs`;
    /// - otherwise: nothing to switch, but drain the running guest's
    ///   queued virtual interrupts so it does not sit on stale state.
    pub fn perform_switch<V: VirtIface>(
        &mut self,
        regs: Option<&mut Registers>,
        vgic: &mut Vgic<V>,
        mm: &mut dyn StageTwo,
        world: &mut dyn WorldSwitch,
    ) -> Result<()> {
        let result = match (self.current, regs) {
            (None, _) => {
                let Some(next) = self.next.take() else {
                    self.locked = false;
                    return Err(HvError::Ignored);
                };
                self.current = Some(next);
                self.enter_first(next, vgic, mm, world)
            }
            (Some(current), Some(regs)) => {
                match self.next {
                    Some(next) if next != current && regs.mode() != PSR_MODE_HYP => {
                        self.transplant(current, next, regs, vgic, mm, world);
                        self.current = Some(next);
                        self.next = None;
                        Ok(())
                    }
                    _ => {
                        // Staying put; give queued virqs a chance to land.
                        vgic.flush_pending(current);
                        Ok(())
                    }
                }
            }
            (Some(current), None) => {
                vgic.flush_pending(current);
                Ok(())
            }
        };
        self.locked = false;
        result
    }

    /// First guest entry: no outgoing state exists, so only the restore
    /// half of the sequence runs, then the CPU drops into the guest.
    fn enter_first<V: VirtIface>(
        &mut self,
        next: VmId,
        vgic: &mut Vgic<V>,
        mm: &mut dyn StageTwo,
        world: &mut dyn WorldSwitch,
    ) -> ! {
        let ctx = self.contexts[next.index()];
        info!("context: first entry into {}", next);
        mm.activate_table(next, ctx.ttbl);
        mm.set_enabled(true);
        vgic.restore_snapshot(&ctx.vgic, next);
        world.enter_guest(&ctx.regs)
    }

    /// The full ordered save/restore between two live guests. `regs` is
    /// the outgoing guest's file on entry and the incoming guest's on
    /// return.
    fn transplant<V: VirtIface>(
        &mut self,
        from: VmId,
        to: VmId,
        regs: &mut Registers,
        vgic: &mut Vgic<V>,
        mm: &mut dyn StageTwo,
        world: &mut dyn WorldSwitch,
    ) {
        debug!("context: switching {} -> {}", from, to);

        mm.set_enabled(false);

        let out = &mut self.contexts[from.index()];
        out.regs = *regs;
        world.save_cop(&mut out.cop);
        world.save_banked(&mut out.banked);
        vgic.save_snapshot(&mut out.vgic);

        let inc = self.contexts[to.index()];
        mm.activate_table(to, inc.ttbl);
        mm.set_enabled(true);
        vgic.restore_snapshot(&inc.vgic, to);
        world.restore_cop(&inc.cop);
        world.restore_banked(&inc.banked);
        *regs = inc.regs;
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        ContextManager::new()
    }
}
