//! A minimal type-1 hypervisor core for ARMv7-A with the Virtualization
//! Extensions: guest context switching, trap dispatch, a per-guest
//! virtual GICv2, the physical GICv2 driver, static interrupt routing,
//! and a round-robin scheduler.
//!
//! All hardware access sits behind traits ([`mm::StageTwo`],
//! [`vdev::DeviceBus`], [`arch::armv7::world::WorldSwitch`],
//! [`vgic::VirtIface`]) or injected register-block addresses, so the
//! whole core runs under the host test harness with mock collaborators.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod context;
pub mod error;
pub mod gic;
pub mod hypervisor;
pub mod mm;
pub mod scheduler;
pub mod trap;
pub mod uart;
pub mod vdev;
pub mod vgic;
pub mod virqmap;
pub mod vmid;

pub use error::{HvError, Result};
pub use hypervisor::Hypervisor;
pub use vmid::VmId;
