//! Static routing between physical interrupt lines and per-guest
//! virtual interrupt numbers.
//!
//! The table is fixed at build time ([`crate::config::ROUTE_TABLE`]);
//! each physical line routes to at most one (guest, virq) pair. The map
//! also shadows every guest's view of its distributor enable bits so
//! that a guest toggling ISENABLER/ICENABLER lands on the corresponding
//! physical line.

use log::debug;

use crate::arch::armv7::core_id;
use crate::config::{
    RouteSpec, DEFAULT_PRIORITY, MAX_IRQS, NUM_GUESTS, VIRQ_STATUS_WORDS,
};
use crate::gic::{Gic, IrqPolarity};
use crate::vmid::VmId;

/// Destination of one routed physical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub vmid: VmId,
    pub virq: u32,
}

pub struct VirqMap {
    entries: [Option<RouteEntry>; MAX_IRQS],
    /// Last-observed guest enable words, one set per guest.
    old_status: [[u32; VIRQ_STATUS_WORDS]; NUM_GUESTS],
}

impl VirqMap {
    pub fn from_table(table: &[RouteSpec]) -> Self {
        let mut entries = [None; MAX_IRQS];
        for route in table {
            entries[route.pirq as usize] = Some(RouteEntry {
                vmid: route.vmid,
                virq: route.virq,
            });
        }
        VirqMap {
            entries,
            old_status: [[0; VIRQ_STATUS_WORDS]; NUM_GUESTS],
        }
    }

    /// Route for a physical line, if one exists.
    pub fn lookup(&self, pirq: u32) -> Option<RouteEntry> {
        self.entries.get(pirq as usize).copied().flatten()
    }

    /// Reverse lookup: the physical line delivering `virq` to `vmid`.
    pub fn pirq_for(&self, vmid: VmId, virq: u32) -> Option<u32> {
        self.entries.iter().enumerate().find_map(|(pirq, entry)| {
            match entry {
                Some(e) if e.vmid == vmid && e.virq == virq => Some(pirq as u32),
                _ => None,
            }
        })
    }

    /// A guest wrote one word of its virtual enable state. Diff it
    /// against the shadow copy and apply each flipped bit to the backing
    /// physical line, highest bit first.
    pub fn enable_status_changed(
        &mut self,
        vmid: VmId,
        status: u32,
        word_index: usize,
        gic: &mut Gic,
    ) {
        if !vmid.is_valid() || word_index >= VIRQ_STATUS_WORDS {
            return;
        }
        let old = self.old_status[vmid.index()][word_index];
        let mut changed = old ^ status;
        while changed != 0 {
            let bit = 31 - changed.leading_zeros();
            changed &= !(1 << bit);
            let virq = word_index as u32 * 32 + bit;
            let Some(pirq) = self.pirq_for(vmid, virq) else {
                debug!("virqmap: {} toggled unmapped virq {}", vmid, virq);
                continue;
            };
            if status & (1 << bit) != 0 {
                debug!("virqmap: {} enabled virq {} -> pirq {}", vmid, virq, pirq);
                let _ = gic.configure_irq(
                    pirq,
                    IrqPolarity::Level,
                    1 << core_id(),
                    DEFAULT_PRIORITY,
                );
            } else {
                debug!("virqmap: {} disabled virq {} -> pirq {}", vmid, virq, pirq);
                gic.disable_irq(pirq);
            }
        }
        self.old_status[vmid.index()][word_index] = status;
    }

    /// Forget the shadowed enable state for a guest without touching
    /// hardware.
    pub fn reset_status(&mut self, vmid: VmId) {
        if vmid.is_valid() {
            self.old_status[vmid.index()] = [0; VIRQ_STATUS_WORDS];
        }
    }
}
