//! Trap dispatch through a fully assembled hypervisor: hypervisor
//! calls, guest data aborts against the MMIO bus, and the fatal
//! hypervisor-originated classes.

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};

use armvisor::trap::{handle_trap, TrapFrame, TrapOutcome};
use armvisor::vgic::Vgic;
use armvisor::{Hypervisor, VmId};

use common::{
    guest_regs, FakeGich, GicBlocks, MockDeviceBus, MockStageTwo, MockWorldSwitch,
    GUEST_ENTRY_PANIC,
};

const EC_HVC: u32 = 0x12 << 26;
const EC_DABORT_GUEST: u32 = 0x24 << 26;
const EC_DABORT_HYP: u32 = 0x25 << 26;
const EC_WFI: u32 = 0x01 << 26;
const IL: u32 = 1 << 25;
const ISV: u32 = 1 << 24;

/// Word access, translation fault, register in `srt`, optional write.
fn dabort_iss(srt: u32, write: bool) -> u32 {
    ISV | (0x2 << 22) | (srt << 16) | if write { 1 << 6 } else { 0 } | 0x5
}

fn frame(hsr: u32) -> TrapFrame {
    TrapFrame {
        regs: guest_regs(0x8000_1000),
        hsr,
        hdfar: 0,
        hpfar: 0,
    }
}

macro_rules! rig {
    ($hv:ident, $bus:ident) => {
        let mut blocks = GicBlocks::new();
        let mut mm = MockStageTwo::default();
        let mut $bus = MockDeviceBus::claiming(0x3FFF_0000, 0x1000);
        let mut world = MockWorldSwitch::default();
        let mut $hv = Hypervisor::new(
            Vgic::new(FakeGich::new(4)).unwrap(),
            blocks.driver(),
            &mut mm,
            &mut $bus,
            &mut world,
        );
        $hv.init().unwrap();
        // First entry diverges; the mock's panic stands in for the ERET.
        $hv.switch_to(VmId::new(0)).unwrap();
        let entry = catch_unwind(AssertUnwindSafe(|| {
            let _ = $hv.perform_switch(None);
        }));
        assert_eq!(
            entry.unwrap_err().downcast_ref::<String>().unwrap(),
            GUEST_ENTRY_PANIC
        );
        assert_eq!($hv.current_vmid(), Some(VmId::new(0)));
    };
}

#[test]
fn hvc_yield_hands_cpu_to_round_robin_successor() {
    rig!(hv, bus);
    let mut f = frame(EC_HVC | 0xFFFD);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(hv.current_vmid(), Some(VmId::new(1)));
    // The register file now carries guest 1's boot state.
    assert_eq!(f.regs.pc, 0x8000_0000);
}

#[test]
fn hvc_stay_in_hyp_returns_without_switching() {
    rig!(hv, bus);
    let mut f = frame(EC_HVC | 0xFFFF);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::StayInHyp);
    assert_eq!(hv.current_vmid(), Some(VmId::new(0)));
    assert_eq!(f.regs.pc, 0x8000_1000);
}

#[test]
fn hvc_ping_resumes_same_guest() {
    rig!(hv, bus);
    let mut f = frame(EC_HVC | 0xFFFE);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(hv.current_vmid(), Some(VmId::new(0)));
}

#[test]
fn guest_store_reaches_emulation_bus() {
    rig!(hv, bus);
    let mut f = frame(EC_DABORT_GUEST | IL | dabort_iss(3, true));
    f.hdfar = 0x0000_0010;
    f.hpfar = 0x0003_FFF0 << 4; // IPA page 0x3FFF_0000
    f.regs.gpr[3] = 0xDEAD_BEEF;

    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(bus.writes, 1);
    assert_eq!(bus.last_written, Some(0xDEAD_BEEF));
    assert_eq!(bus.posts, 1);
    // post() advanced past the faulting store.
    assert_eq!(f.regs.pc, 0x8000_1004);
}

#[test]
fn guest_load_writes_back_into_trap_frame() {
    rig!(hv, bus);
    let mut f = frame(EC_DABORT_GUEST | IL | dabort_iss(5, false));
    f.hdfar = 0x0000_0020;
    f.hpfar = 0x0003_FFF0 << 4;

    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(bus.reads, 1);
    assert_eq!(f.regs.gpr[5], 0x1234_5678);
    assert_eq!(f.regs.pc, 0x8000_1004);
}

#[test]
fn invalid_dabort_syndrome_skips_instruction_without_bus_call() {
    rig!(hv, bus);
    // ISV clear: the syndrome describes nothing decodable.
    let mut f = frame(EC_DABORT_GUEST | IL | 0x5);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(bus.reads + bus.writes + bus.posts, 0);
    assert_eq!(f.regs.pc, 0x8000_1004);
}

#[test]
fn unclaimed_address_skips_instruction() {
    rig!(hv, bus);
    let mut f = frame(EC_DABORT_GUEST | IL | dabort_iss(0, false));
    f.hdfar = 0x0000_0000;
    f.hpfar = 0x0009_0000 << 4; // outside the bus window
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(bus.posts, 0);
    assert_eq!(f.regs.pc, 0x8000_1004);
}

#[test]
fn hyp_originated_abort_is_fatal() {
    rig!(hv, bus);
    let mut f = frame(EC_DABORT_HYP | IL);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Fatal);
    // An unknown class is equally unrecoverable.
    let mut f = frame((0x2Au32) << 26);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Fatal);
}

#[test]
fn wfi_is_stubbed_by_skipping_the_instruction() {
    rig!(hv, bus);
    let mut f = frame(EC_WFI | IL);
    assert_eq!(handle_trap(&mut hv, &mut f), TrapOutcome::Resume);
    assert_eq!(f.regs.pc, 0x8000_1004);
    assert_eq!(hv.current_vmid(), Some(VmId::new(0)));
}
