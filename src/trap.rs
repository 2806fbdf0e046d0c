//! Trap classification and dispatch.
//!
//! Every Hyp-mode trap lands here with the guest's register file and the
//! syndrome captured by the vector stub. Each exception class maps to a
//! terminal action; guest-recoverable classes end in a scheduling pass
//! so a pending switch request is honored on the way out.
//!
//! Policy per class: guest-originated faults are never fatal (worst case
//! the faulting instruction is skipped and logged); any abort taken from
//! hypervisor code itself is an internal-invariant violation and halts.

use log::{debug, info, warn};

use crate::arch::armv7::{dump_registers, Registers};
use crate::error::{HvError, Result};
use crate::hypervisor::Hypervisor;
use crate::scheduler;
use crate::vdev::{AccessSize, MmioFault};
use crate::vgic::VirtIface;

// HSR field layout.
const HSR_EC_SHIFT: u32 = 26;
const HSR_IL: u32 = 1 << 25;
const HSR_ISS_MASK: u32 = 0x01FF_FFFF;

// Data-abort ISS fields.
const ISS_ISV: u32 = 1 << 24;
const ISS_SAS_SHIFT: u32 = 22;
const ISS_SSE: u32 = 1 << 21;
const ISS_SRT_SHIFT: u32 = 16;
const ISS_SRT_MASK: u32 = 0xF << ISS_SRT_SHIFT;
const ISS_WNR: u32 = 1 << 6;
const ISS_FSC_MASK: u32 = 0x3F;

// Hypervisor-call payloads.
const HVC_STAY_IN_HYP: u32 = 0xFFFF;
const HVC_PING: u32 = 0xFFFE;
const HVC_YIELD: u32 = 0xFFFD;

/// Exception classes this hypervisor distinguishes (HSR.EC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionClass {
    Unknown,
    WfiWfe,
    Cp15Access,
    Cp14Access,
    CpOtherAccess,
    Svc,
    Hvc,
    Smc,
    PrefetchAbortGuest,
    PrefetchAbortHyp,
    DataAbortGuest,
    DataAbortHyp,
    Other(u8),
}

impl ExceptionClass {
    pub fn from_hsr(hsr: u32) -> Self {
        match (hsr >> HSR_EC_SHIFT) as u8 {
            0x00 => ExceptionClass::Unknown,
            0x01 => ExceptionClass::WfiWfe,
            0x03 | 0x04 => ExceptionClass::Cp15Access,
            0x05 | 0x06 | 0x0C => ExceptionClass::Cp14Access,
            0x07 | 0x08 | 0x0A => ExceptionClass::CpOtherAccess,
            0x11 => ExceptionClass::Svc,
            0x12 => ExceptionClass::Hvc,
            0x13 => ExceptionClass::Smc,
            0x20 => ExceptionClass::PrefetchAbortGuest,
            0x21 => ExceptionClass::PrefetchAbortHyp,
            0x24 => ExceptionClass::DataAbortGuest,
            0x25 => ExceptionClass::DataAbortHyp,
            ec => ExceptionClass::Other(ec),
        }
    }
}

/// State captured by the trap vector: the interrupted register file plus
/// the syndrome and fault-address registers read on entry.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub regs: Registers,
    pub hsr: u32,
    pub hdfar: u32,
    pub hpfar: u32,
}

/// What the vector stub should do after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Exception return to the (possibly switched) guest.
    Resume,
    /// Remain in Hyp mode; control goes to the hypervisor main loop.
    StayInHyp,
    /// Internal-invariant violation; the caller must halt the core.
    Fatal,
}

/// Step past the instruction the trap syndrome describes (HSR.IL gives
/// its width).
pub fn skip_instruction(regs: &mut Registers, hsr: u32) {
    regs.pc = regs.pc.wrapping_add(if hsr & HSR_IL != 0 { 4 } else { 2 });
}

/// Decode a guest data-abort syndrome into an MMIO fault description.
///
/// Only syndromes the architecture fully describes are accepted: the
/// ISV bit must be set, the fault must be a translation fault (status
/// code below 8), and the access size must not be the reserved encoding.
pub fn decode_dabort(iss: u32, hdfar: u32, hpfar: u32) -> Result<MmioFault> {
    if iss & ISS_ISV == 0 {
        return Err(HvError::BadAccess);
    }
    if iss & ISS_FSC_MASK >= 8 {
        return Err(HvError::BadAccess);
    }
    let size = AccessSize::from_sas((iss >> ISS_SAS_SHIFT) & 0x3).ok_or(HvError::BadAccess)?;
    let ipa = (((hpfar & 0xFFFF_FFF0) as u64) >> 4) << 12 | (hdfar & 0xFFF) as u64;
    Ok(MmioFault {
        ipa,
        write: iss & ISS_WNR != 0,
        size,
        reg: ((iss & ISS_SRT_MASK) >> ISS_SRT_SHIFT) as u8,
        sign_extend: iss & ISS_SSE != 0,
    })
}

/// Dispatch one trap. Non-fatal classes finish with a switch pass so any
/// pending scheduling decision takes effect before the exception return.
pub fn handle_trap<V: VirtIface>(hv: &mut Hypervisor<'_, V>, frame: &mut TrapFrame) -> TrapOutcome {
    let ec = ExceptionClass::from_hsr(frame.hsr);
    let iss = frame.hsr & HSR_ISS_MASK;
    let outcome = match ec {
        ExceptionClass::Unknown => {
            warn!("trap: unknown exception class, hsr {:#010x}", frame.hsr);
            skip_instruction(&mut frame.regs, frame.hsr);
            TrapOutcome::Resume
        }
        ExceptionClass::WfiWfe => {
            debug!("trap: wfi/wfe, hsr {:#010x}", frame.hsr);
            skip_instruction(&mut frame.regs, frame.hsr);
            TrapOutcome::Resume
        }
        ExceptionClass::Cp15Access
        | ExceptionClass::Cp14Access
        | ExceptionClass::CpOtherAccess => {
            debug!("trap: coprocessor access {:?}, hsr {:#010x}", ec, frame.hsr);
            skip_instruction(&mut frame.regs, frame.hsr);
            TrapOutcome::Resume
        }
        ExceptionClass::Svc => {
            warn!("trap: svc routed to hyp, hsr {:#010x}", frame.hsr);
            TrapOutcome::Resume
        }
        ExceptionClass::Hvc => handle_hvc(hv, frame, iss),
        ExceptionClass::Smc => {
            warn!("trap: smc not forwarded, hsr {:#010x}", frame.hsr);
            skip_instruction(&mut frame.regs, frame.hsr);
            TrapOutcome::Resume
        }
        ExceptionClass::PrefetchAbortGuest => {
            warn!(
                "trap: guest prefetch abort at pc {:#010x}, hsr {:#010x}",
                frame.regs.pc, frame.hsr
            );
            TrapOutcome::Resume
        }
        ExceptionClass::DataAbortGuest => handle_guest_dabort(hv, frame, iss),
        ExceptionClass::PrefetchAbortHyp
        | ExceptionClass::DataAbortHyp
        | ExceptionClass::Other(_) => {
            log::error!("trap: unrecoverable {:?}, hsr {:#010x}", ec, frame.hsr);
            dump_registers(&frame.regs);
            TrapOutcome::Fatal
        }
    };
    if outcome == TrapOutcome::Resume {
        // Ignored/BadAccess from a dropped switch request is not a
        // dispatch failure.
        let _ = hv.perform_switch(Some(&mut frame.regs));
    }
    outcome
}

fn handle_hvc<V: VirtIface>(
    hv: &mut Hypervisor<'_, V>,
    frame: &mut TrapFrame,
    iss: u32,
) -> TrapOutcome {
    match iss & 0xFFFF {
        HVC_STAY_IN_HYP => {
            info!("trap: hvc stay-in-hyp");
            dump_registers(&frame.regs);
            TrapOutcome::StayInHyp
        }
        HVC_PING => {
            info!("trap: hvc ping from {:?}", hv.current_vmid());
            dump_registers(&frame.regs);
            TrapOutcome::Resume
        }
        HVC_YIELD => {
            let next = scheduler::next_vmid(hv.current_vmid());
            debug!("trap: hvc yield to {}", next);
            let _ = hv.switch_to(next);
            TrapOutcome::Resume
        }
        payload => {
            warn!("trap: unhandled hvc payload {:#06x}", payload);
            TrapOutcome::Resume
        }
    }
}

/// Guest data abort: decode the syndrome and hand the access to the
/// MMIO-emulation bus. Failures are recoverable; the faulting instruction
/// is skipped so the guest cannot wedge the core in a fault loop.
fn handle_guest_dabort<V: VirtIface>(
    hv: &mut Hypervisor<'_, V>,
    frame: &mut TrapFrame,
    iss: u32,
) -> TrapOutcome {
    let emulated = decode_dabort(iss, frame.hdfar, frame.hpfar)
        .and_then(|fault| hv.emulate_mmio(&fault, &mut frame.regs));
    if let Err(err) = emulated {
        warn!(
            "trap: unhandled dabort at pc {:#010x} (iss {:#010x}): {}, skipping",
            frame.regs.pc, iss, err
        );
        skip_instruction(&mut frame.regs, frame.hsr);
    }
    TrapOutcome::Resume
}

/// Physical interrupt taken in Hyp mode: acknowledge and route, then run
/// the switch pass the interrupt may have requested.
pub fn handle_irq<V: VirtIface>(hv: &mut Hypervisor<'_, V>, regs: &mut Registers) -> TrapOutcome {
    hv.dispatch_physical_irq(regs);
    let _ = hv.perform_switch(Some(regs));
    TrapOutcome::Resume
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_documented_exception_codes() {
        assert_eq!(ExceptionClass::from_hsr(0x12 << 26), ExceptionClass::Hvc);
        assert_eq!(
            ExceptionClass::from_hsr(0x24 << 26),
            ExceptionClass::DataAbortGuest
        );
        assert_eq!(
            ExceptionClass::from_hsr(0x25 << 26),
            ExceptionClass::DataAbortHyp
        );
        assert_eq!(
            ExceptionClass::from_hsr(0x2A << 26),
            ExceptionClass::Other(0x2A)
        );
    }

    #[test]
    fn dabort_decode_rejects_invalid_syndromes() {
        // ISV clear.
        assert_eq!(decode_dabort(0, 0, 0), Err(HvError::BadAccess));
        // Fault status code 8 (access flag fault).
        assert_eq!(
            decode_dabort(ISS_ISV | 8, 0, 0),
            Err(HvError::BadAccess)
        );
        // Reserved access-size encoding.
        assert_eq!(
            decode_dabort(ISS_ISV | (0x3 << ISS_SAS_SHIFT) | 5, 0, 0),
            Err(HvError::BadAccess)
        );
    }

    #[test]
    fn dabort_decode_reconstructs_fault_address() {
        // Word write of r3 to IPA 0x3FFF_1008.
        let iss = ISS_ISV | (0x2 << ISS_SAS_SHIFT) | (3 << ISS_SRT_SHIFT) | ISS_WNR | 5;
        let fault = decode_dabort(iss, 0x0000_1008, 0x0003_FFF1 << 4).unwrap();
        assert_eq!(fault.ipa, 0x3FFF_1008);
        assert!(fault.write);
        assert_eq!(fault.size, AccessSize::Word);
        assert_eq!(fault.reg, 3);
        assert!(!fault.sign_extend);
    }

    #[test]
    fn skip_respects_instruction_length() {
        let mut regs = Registers::default();
        regs.pc = 0x8000_0000;
        skip_instruction(&mut regs, HSR_IL);
        assert_eq!(regs.pc, 0x8000_0004);
        skip_instruction(&mut regs, 0);
        assert_eq!(regs.pc, 0x8000_0006);
    }
}
