//! Per-guest virtual interrupt controller over the GICv2 virtual
//! interface (GICH).
//!
//! Each guest sees a private distributor/CPU interface; the hypervisor
//! multiplexes them onto the hardware's small set of list registers. A
//! virq for the running guest goes straight into a free list register; a
//! virq for anyone else is parked in that guest's bounded FIFO queue and
//! flushed when its context is restored (or when the scheduler decides to
//! stay on the same guest, which skips the restore path).
//!
//! List-register slots are freed in exactly one place: the maintenance
//! interrupt handler, once per guest EOI.

use bitflags::bitflags;
use log::{debug, warn};

use crate::arch::armv7::core_id;
use crate::config::{DEFAULT_PRIORITY, NUM_GUESTS, VGIC_MAX_SLOTS, VIRQ_QUEUE_CAPACITY};
use crate::error::{HvError, Result};
use crate::vmid::VmId;

// GICH register offsets, in words.
pub const GICH_HCR: usize = 0x00 / 4;
pub const GICH_VTR: usize = 0x04 / 4;
pub const GICH_VMCR: usize = 0x08 / 4;
pub const GICH_MISR: usize = 0x10 / 4;
pub const GICH_EISR0: usize = 0x20 / 4;
pub const GICH_EISR1: usize = 0x24 / 4;
pub const GICH_ELSR0: usize = 0x30 / 4;
pub const GICH_ELSR1: usize = 0x34 / 4;
pub const GICH_APR: usize = 0xF0 / 4;
pub const GICH_LR: usize = 0x100 / 4;

pub const GICH_VTR_LISTREGS_MASK: u32 = 0x3F;

bitflags! {
    /// GICH_HCR control bits the vGIC manages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GichHcr: u32 {
        const EN = 1 << 0;
        const UIE = 1 << 1;
        const LRENPIE = 1 << 2;
        const NPIE = 1 << 3;
    }
}

bitflags! {
    /// GICH_MISR maintenance causes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GichMisr: u32 {
        const EOI = 1 << 0;
        const U = 1 << 1;
        const LRENP = 1 << 2;
        const NP = 1 << 3;
    }
}

/// List-register field layout (GICv2).
pub mod lr {
    pub const VIRTUALID_MASK: u32 = 0x3FF;
    pub const PHYSICALID_SHIFT: u32 = 10;
    pub const PHYSICALID_MASK: u32 = 0x3FF << PHYSICALID_SHIFT;
    pub const CPUID_MASK: u32 = 0x7;
    pub const EOI_MAINTENANCE: u32 = 1 << 19;
    pub const PRIORITY_SHIFT: u32 = 23;
    pub const PRIORITY_MASK: u32 = 0x1F << PRIORITY_SHIFT;
    pub const STATE_SHIFT: u32 = 28;
    pub const STATE_MASK: u32 = 0x3 << STATE_SHIFT;
    pub const STATE_PENDING: u32 = 0x1 << STATE_SHIFT;
    pub const STATE_ACTIVE: u32 = 0x2 << STATE_SHIFT;
    pub const HW: u32 = 1 << 31;

    /// A pending hardware-backed virq: EOI deactivates `pirq` directly.
    pub fn pending_hw(virq: u32, pirq: u32, priority: u8) -> u32 {
        HW | STATE_PENDING
            | priority_field(priority)
            | ((pirq << PHYSICALID_SHIFT) & PHYSICALID_MASK)
            | (virq & VIRTUALID_MASK)
    }

    /// A pending software virq: EOI raises a maintenance interrupt on the
    /// requesting core so the hypervisor can clean up.
    pub fn pending_sw(virq: u32, cpuid: u32, priority: u8) -> u32 {
        STATE_PENDING
            | EOI_MAINTENANCE
            | priority_field(priority)
            | ((cpuid & CPUID_MASK) << PHYSICALID_SHIFT)
            | (virq & VIRTUALID_MASK)
    }

    fn priority_field(priority: u8) -> u32 {
        (((priority as u32) >> 3) << PRIORITY_SHIFT) & PRIORITY_MASK
    }
}

/// Fixed bitset over the two 32-bit slot-status words (ELRSR/EISR).
/// Free-slot search always prefers the lowest-numbered set bit, first
/// word before the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotBitmap(u64);

impl SlotBitmap {
    pub fn from_words(lo: u32, hi: u32) -> Self {
        SlotBitmap((hi as u64) << 32 | lo as u64)
    }

    pub fn empty() -> Self {
        SlotBitmap(0)
    }

    /// Lowest-numbered set bit, if any.
    pub fn lowest_set(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    pub fn get(self, slot: usize) -> bool {
        slot < 64 && self.0 & (1u64 << slot) != 0
    }

    pub fn set(&mut self, slot: usize) {
        if slot < 64 {
            self.0 |= 1u64 << slot;
        }
    }

    pub fn clear(&mut self, slot: usize) {
        if slot < 64 {
            self.0 &= !(1u64 << slot);
        }
    }

    /// Drop bits at or above `count` (slots the hardware does not
    /// implement).
    pub fn truncate(self, count: usize) -> Self {
        if count >= 64 {
            self
        } else {
            SlotBitmap(self.0 & ((1u64 << count) - 1))
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// The GICv2 virtual-interface register block, bit-exact. Implemented by
/// [`GichMmio`] on hardware and by a behavioral fake in the tests.
pub trait VirtIface {
    /// Number of implemented list registers (VTR.ListRegs + 1).
    fn num_lr(&self) -> usize;

    fn read_lr(&self, slot: usize) -> u32;
    fn write_lr(&mut self, slot: usize, value: u32);

    /// Empty-slot status (ELRSR0/1): a set bit marks a free list register.
    fn empty_slots(&self) -> SlotBitmap;

    /// End-of-interrupt status (EISR0/1): a set bit marks a slot whose
    /// interrupt the guest completed.
    fn eoi_slots(&self) -> SlotBitmap;

    fn misr(&self) -> u32;

    fn hcr(&self) -> u32;
    fn set_hcr(&mut self, value: u32);
    fn apr(&self) -> u32;
    fn set_apr(&mut self, value: u32);
    fn vmcr(&self) -> u32;
    fn set_vmcr(&mut self, value: u32);
}

/// MMIO implementation over the GICH block of a GICv2.
pub struct GichMmio {
    base: *mut u32,
}

impl GichMmio {
    /// # Safety
    /// `base` must be the virtual address of the GICH register block,
    /// mapped device-memory, and exclusively owned by this driver.
    pub unsafe fn new(base: *mut u32) -> Self {
        GichMmio { base }
    }

    fn rd(&self, word: usize) -> u32 {
        unsafe { self.base.add(word).read_volatile() }
    }

    fn wr(&mut self, word: usize, value: u32) {
        unsafe { self.base.add(word).write_volatile(value) }
    }
}

impl VirtIface for GichMmio {
    fn num_lr(&self) -> usize {
        ((self.rd(GICH_VTR) & GICH_VTR_LISTREGS_MASK) + 1) as usize
    }

    fn read_lr(&self, slot: usize) -> u32 {
        self.rd(GICH_LR + slot)
    }

    fn write_lr(&mut self, slot: usize, value: u32) {
        self.wr(GICH_LR + slot, value);
    }

    fn empty_slots(&self) -> SlotBitmap {
        SlotBitmap::from_words(self.rd(GICH_ELSR0), self.rd(GICH_ELSR1))
    }

    fn eoi_slots(&self) -> SlotBitmap {
        SlotBitmap::from_words(self.rd(GICH_EISR0), self.rd(GICH_EISR1))
    }

    fn misr(&self) -> u32 {
        self.rd(GICH_MISR)
    }

    fn hcr(&self) -> u32 {
        self.rd(GICH_HCR)
    }

    fn set_hcr(&mut self, value: u32) {
        self.wr(GICH_HCR, value);
    }

    fn apr(&self) -> u32 {
        self.rd(GICH_APR)
    }

    fn set_apr(&mut self, value: u32) {
        self.wr(GICH_APR, value);
    }

    fn vmcr(&self) -> u32 {
        self.rd(GICH_VMCR)
    }

    fn set_vmcr(&mut self, value: u32) {
        self.wr(GICH_VMCR, value);
    }
}

/// Saved virtual-interface state for one guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgicSnapshot {
    pub hcr: u32,
    pub apr: u32,
    pub vmcr: u32,
    pub lr: [u32; VGIC_MAX_SLOTS],
    /// Set on the first save; a never-saved snapshot holds boot defaults.
    pub saved_once: bool,
}

impl Default for VgicSnapshot {
    fn default() -> Self {
        VgicSnapshot {
            hcr: 0,
            apr: 0,
            vmcr: 0,
            lr: [0; VGIC_MAX_SLOTS],
            saved_once: false,
        }
    }
}

/// One deferred virtual interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingVirq {
    pub virq: u32,
    pub pirq: u32,
    pub hw: bool,
}

/// Bounded FIFO of deferred virqs for one guest. Strictly ordered: flush
/// re-injects oldest first and stops at the first failure.
#[derive(Debug, Clone, Copy)]
pub struct VirqQueue {
    entries: [PendingVirq; VIRQ_QUEUE_CAPACITY],
    head: usize,
    len: usize,
}

impl VirqQueue {
    pub const fn new() -> Self {
        VirqQueue {
            entries: [PendingVirq {
                virq: 0,
                pirq: 0,
                hw: false,
            }; VIRQ_QUEUE_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, entry: PendingVirq) -> Result<()> {
        if self.len == VIRQ_QUEUE_CAPACITY {
            return Err(HvError::Busy);
        }
        let tail = (self.head + self.len) % VIRQ_QUEUE_CAPACITY;
        self.entries[tail] = entry;
        self.len += 1;
        Ok(())
    }

    pub fn front(&self) -> Option<PendingVirq> {
        if self.len == 0 {
            None
        } else {
            Some(self.entries[self.head])
        }
    }

    pub fn pop_front(&mut self) -> Option<PendingVirq> {
        let entry = self.front()?;
        self.head = (self.head + 1) % VIRQ_QUEUE_CAPACITY;
        self.len -= 1;
        Some(entry)
    }

    pub fn contains_virq(&self, virq: u32) -> bool {
        (0..self.len)
            .map(|i| self.entries[(self.head + i) % VIRQ_QUEUE_CAPACITY])
            .any(|e| e.virq == virq)
    }
}

/// Physical-interrupt deactivation, needed by the maintenance handler to
/// retire hardware-forwarded interrupts. Implemented by the GIC driver.
pub trait PirqDeactivate {
    fn deactivate(&mut self, pirq: u32);
}

/// Where an accepted injection ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Programmed into the given list register of the running guest.
    Delivered(usize),
    /// Parked in the target guest's pending queue.
    Queued,
}

pub struct Vgic<V: VirtIface> {
    iface: V,
    num_lr: usize,
    /// Slot -> physical IRQ awaiting deactivation (hardware path only).
    slot_pirq: [[Option<u32>; VGIC_MAX_SLOTS]; NUM_GUESTS],
    /// Slot -> virtual IRQ currently occupying it.
    slot_virq: [[Option<u32>; VGIC_MAX_SLOTS]; NUM_GUESTS],
    queues: [VirqQueue; NUM_GUESTS],
}

impl<V: VirtIface> Vgic<V> {
    /// Take ownership of the virtual-interface block. Rejects hardware
    /// reporting more list registers than the state model covers.
    pub fn new(iface: V) -> Result<Self> {
        let num_lr = iface.num_lr();
        if num_lr == 0 || num_lr > VGIC_MAX_SLOTS {
            return Err(HvError::UnsupportedFeature);
        }
        Ok(Vgic {
            iface,
            num_lr,
            slot_pirq: [[None; VGIC_MAX_SLOTS]; NUM_GUESTS],
            slot_virq: [[None; VGIC_MAX_SLOTS]; NUM_GUESTS],
            queues: [VirqQueue::new(); NUM_GUESTS],
        })
    }

    pub fn num_lr(&self) -> usize {
        self.num_lr
    }

    pub fn iface(&self) -> &V {
        &self.iface
    }

    pub fn iface_mut(&mut self) -> &mut V {
        &mut self.iface
    }

    /// Gate virtual-interrupt signaling to the guest (GICH_HCR.EN).
    pub fn set_signaling(&mut self, enabled: bool) {
        let mut hcr = GichHcr::from_bits_retain(self.iface.hcr());
        hcr.set(GichHcr::EN, enabled);
        self.iface.set_hcr(hcr.bits());
    }

    /// Deliver `virq` to `vmid`, backed by physical `pirq` when `hw` is
    /// set. The running guest gets a list register; anyone else gets a
    /// queue entry. Duplicates (already queued, or already occupying a
    /// slot) are rejected, not coalesced.
    pub fn inject_virq(
        &mut self,
        vmid: VmId,
        virq: u32,
        pirq: u32,
        hw: bool,
        current: Option<VmId>,
    ) -> Result<InjectOutcome> {
        if !vmid.is_valid() {
            return Err(HvError::BadAccess);
        }
        let entry = PendingVirq { virq, pirq, hw };
        if current == Some(vmid) {
            let slot = self.slot_inject(vmid, entry)?;
            Ok(InjectOutcome::Delivered(slot))
        } else {
            if self.slot_of(vmid, virq).is_some() || self.queues[vmid.index()].contains_virq(virq)
            {
                warn!("vgic: rejected duplicate virq {} for {}", virq, vmid);
                return Err(HvError::Ignored);
            }
            self.queues[vmid.index()].push(entry)?;
            debug!("vgic: queued virq {} pirq {} for {}", virq, pirq, vmid);
            Ok(InjectOutcome::Queued)
        }
    }

    /// Re-inject `vmid`'s queued virqs, oldest first, until the list
    /// registers fill up. Called when the guest's context is restored and
    /// when a scheduling pass keeps the same guest running.
    pub fn flush_pending(&mut self, vmid: VmId) {
        if !vmid.is_valid() {
            return;
        }
        let mut count = 0;
        while let Some(entry) = self.queues[vmid.index()].front() {
            if self.slot_inject(vmid, entry).is_err() {
                break;
            }
            self.queues[vmid.index()].pop_front();
            count += 1;
        }
        if count > 0 {
            debug!("vgic: flushed {} queued virqs to {}", count, vmid);
        }
    }

    /// Program one pending virq into the lowest free list register.
    fn slot_inject(&mut self, vmid: VmId, entry: PendingVirq) -> Result<usize> {
        let free = self.iface.empty_slots().truncate(self.num_lr);
        let slot = free.lowest_set().ok_or(HvError::Busy)?;
        let desc = if entry.hw {
            lr::pending_hw(entry.virq, entry.pirq, DEFAULT_PRIORITY)
        } else {
            lr::pending_sw(entry.virq, core_id(), DEFAULT_PRIORITY)
        };
        self.iface.write_lr(slot, desc);
        self.slot_virq[vmid.index()][slot] = Some(entry.virq);
        self.slot_pirq[vmid.index()][slot] = if entry.hw { Some(entry.pirq) } else { None };
        debug!(
            "vgic: injected virq {} at slot {} for {} ({})",
            entry.virq,
            slot,
            vmid,
            if entry.hw { "hw" } else { "sw" }
        );
        Ok(slot)
    }

    /// Slot currently holding `virq` for `vmid`, if any.
    pub fn slot_of(&self, vmid: VmId, virq: u32) -> Option<usize> {
        self.slot_virq[vmid.index()]
            .iter()
            .position(|&v| v == Some(virq))
    }

    pub fn pirq_at_slot(&self, vmid: VmId, slot: usize) -> Option<u32> {
        self.slot_pirq[vmid.index()][slot]
    }

    pub fn queue_len(&self, vmid: VmId) -> usize {
        self.queues[vmid.index()].len()
    }

    /// Maintenance interrupt: the guest completed one or more virtual
    /// interrupts. Clear each signaled list register and, for a
    /// hardware-forwarded interrupt, deactivate the physical line — the
    /// one and only place a slot is freed.
    pub fn handle_maintenance(&mut self, current: Option<VmId>, pirqs: &mut dyn PirqDeactivate) {
        if !GichMisr::from_bits_retain(self.iface.misr()).contains(GichMisr::EOI) {
            return;
        }
        let Some(vmid) = current else {
            warn!("vgic: maintenance EOI with no current guest");
            return;
        };
        let mut eisr = self.iface.eoi_slots().truncate(self.num_lr);
        while let Some(slot) = eisr.lowest_set() {
            eisr.clear(slot);
            self.iface.write_lr(slot, 0);
            if let Some(pirq) = self.slot_pirq[vmid.index()][slot].take() {
                pirqs.deactivate(pirq);
                debug!("vgic: deactivated pirq {} at slot {}", pirq, slot);
            } else {
                debug!("vgic: completed sw virq at slot {}", slot);
            }
            self.slot_virq[vmid.index()][slot] = None;
        }
    }

    /// Copy the live virtual-interface state into `snapshot` and disable
    /// signaling; part of the fixed context-save sequence.
    pub fn save_snapshot(&mut self, snapshot: &mut VgicSnapshot) {
        for slot in 0..self.num_lr {
            snapshot.lr[slot] = self.iface.read_lr(slot);
        }
        snapshot.hcr = self.iface.hcr();
        snapshot.apr = self.iface.apr();
        snapshot.vmcr = self.iface.vmcr();
        snapshot.saved_once = true;
        self.set_signaling(false);
    }

    /// Write `snapshot` back, flush the guest's pending queue into the
    /// freshly-restored list registers, and re-enable signaling; part of
    /// the fixed context-restore sequence.
    pub fn restore_snapshot(&mut self, snapshot: &VgicSnapshot, vmid: VmId) {
        for slot in 0..self.num_lr {
            self.iface.write_lr(slot, snapshot.lr[slot]);
        }
        self.iface.set_apr(snapshot.apr);
        self.iface.set_vmcr(snapshot.vmcr);
        self.iface.set_hcr(snapshot.hcr);
        self.flush_pending(vmid);
        self.set_signaling(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_prefers_lowest_bit_across_words() {
        assert_eq!(SlotBitmap::from_words(0, 0).lowest_set(), None);
        assert_eq!(SlotBitmap::from_words(0b1100, 0).lowest_set(), Some(2));
        // First word fully occupied: fall through to the second.
        assert_eq!(SlotBitmap::from_words(0, 0b10).lowest_set(), Some(33));
    }

    #[test]
    fn bitmap_truncate_hides_unimplemented_slots() {
        let bm = SlotBitmap::from_words(0xFFFF_0000, 0xFFFF_FFFF);
        assert_eq!(bm.truncate(4).lowest_set(), None);
        assert_eq!(bm.truncate(20).lowest_set(), Some(16));
    }

    #[test]
    fn queue_is_fifo_and_bounded() {
        let mut q = VirqQueue::new();
        for i in 0..VIRQ_QUEUE_CAPACITY as u32 {
            q.push(PendingVirq {
                virq: i,
                pirq: 0,
                hw: false,
            })
            .unwrap();
        }
        assert_eq!(
            q.push(PendingVirq {
                virq: 999,
                pirq: 0,
                hw: false
            }),
            Err(HvError::Busy)
        );
        assert_eq!(q.pop_front().unwrap().virq, 0);
        assert_eq!(q.pop_front().unwrap().virq, 1);
        // Space freed by pops is reusable (ring wrap).
        q.push(PendingVirq {
            virq: 500,
            pirq: 0,
            hw: false,
        })
        .unwrap();
        assert!(q.contains_virq(500));
        assert!(!q.contains_virq(0));
    }

    #[test]
    fn lr_encoding_round_trips_fields() {
        let hw = lr::pending_hw(27, 42, 0xA0);
        assert_eq!(hw & lr::VIRTUALID_MASK, 27);
        assert_eq!((hw & lr::PHYSICALID_MASK) >> lr::PHYSICALID_SHIFT, 42);
        assert_eq!(hw & lr::STATE_MASK, lr::STATE_PENDING);
        assert_ne!(hw & lr::HW, 0);
        assert_eq!(hw & lr::EOI_MAINTENANCE, 0);

        let sw = lr::pending_sw(27, 1, 0xA0);
        assert_eq!(sw & lr::HW, 0);
        assert_ne!(sw & lr::EOI_MAINTENANCE, 0);
        assert_eq!((sw & lr::PHYSICALID_MASK) >> lr::PHYSICALID_SHIFT, 1);
    }
}
