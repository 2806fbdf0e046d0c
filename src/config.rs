//! Static platform configuration.
//!
//! Everything here is consumed, never computed: the hypervisor does not
//! discover guests or interrupt routing at runtime. The values match a
//! two-guest Cortex-A15 "virt" layout with a GICv2.

use crate::vmid::VmId;

/// Number of statically configured guests.
pub const NUM_GUESTS: usize = 2;

/// Upper bound on GICv2 interrupt lines the driver models.
pub const MAX_IRQS: usize = 1024;

/// List-register slots the vGIC state model covers (ELRSR/EISR are two
/// 32-bit words; real hardware implements far fewer).
pub const VGIC_MAX_SLOTS: usize = 64;

/// Capacity of each guest's deferred-virq ring.
pub const VIRQ_QUEUE_CAPACITY: usize = 128;

/// Virtual interrupts tracked by the enable-status shadow (32 per word).
pub const VIRQ_STATUS_WORDS: usize = 4;

/// GIC maintenance interrupt (PPI 6 on Cortex-A15).
pub const MAINTENANCE_IRQ: u32 = 25;

/// Hypervisor timer PPI driving the scheduling tick.
pub const SCHED_TIMER_IRQ: u32 = 26;

/// Default priority programmed for guest-bound interrupts.
pub const DEFAULT_PRIORITY: u8 = 0xA0;

/// Initial register state for one guest.
#[derive(Debug, Clone, Copy)]
pub struct GuestConfig {
    /// Entry point of the guest image.
    pub entry_pc: u32,
    /// Initial CPSR: Supervisor mode, IRQ/FIQ masked.
    pub initial_psr: u32,
}

pub const GUEST_CONFIGS: [GuestConfig; NUM_GUESTS] = [
    GuestConfig {
        entry_pc: 0x8000_0000,
        initial_psr: 0x1D3,
    },
    GuestConfig {
        entry_pc: 0x8000_0000,
        initial_psr: 0x1D3,
    },
];

/// One physical-to-virtual interrupt route.
#[derive(Debug, Clone, Copy)]
pub struct RouteSpec {
    pub pirq: u32,
    pub vmid: VmId,
    pub virq: u32,
}

const fn route(pirq: u32, vmid: u8, virq: u32) -> RouteSpec {
    RouteSpec {
        pirq,
        vmid: VmId::new(vmid),
        virq,
    }
}

/// Physical IRQ routing for the RTSM/virt platform: timers and per-guest
/// UARTs, plus the shared peripherals owned by guest 0.
pub const ROUTE_TABLE: &[RouteSpec] = &[
    route(1, 0, 1),
    route(16, 0, 16),
    route(17, 0, 17),
    route(18, 0, 18),
    route(19, 0, 19),
    route(31, 0, 31),
    route(32, 0, 32),
    route(33, 0, 33),
    route(34, 0, 34),
    route(35, 0, 35),
    route(36, 0, 36),
    route(38, 0, 37),
    route(39, 1, 37),
    route(43, 0, 43),
    route(44, 0, 44),
    route(45, 0, 45),
    route(69, 0, 69),
];
