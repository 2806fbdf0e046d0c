//! Mock collaborators shared by the integration tests: a behavioral
//! fake of the GICH virtual-interface block, register-backed GICD/GICC
//! memory for the physical driver, and recording stand-ins for the
//! stage-2, MMIO-bus, and world-switch seams.

#![allow(dead_code)]

use armvisor::arch::armv7::world::WorldSwitch;
use armvisor::arch::armv7::{BankedRegs, CopRegs, Registers};
use armvisor::config::VGIC_MAX_SLOTS;
use armvisor::gic::Gic;
use armvisor::mm::{StageTwo, TtblHandle};
use armvisor::vdev::{DeviceBus, DeviceHandle, MmioFault, VdevLevel};
use armvisor::vgic::{lr, GichMisr, PirqDeactivate, SlotBitmap, VirtIface};
use armvisor::VmId;

/// Behavioral model of the GICH block: ELRSR is derived from list-register
/// state, EISR/MISR are raised by simulated guest EOIs.
pub struct FakeGich {
    num_lr: usize,
    lr: [u32; VGIC_MAX_SLOTS],
    hcr: u32,
    apr: u32,
    vmcr: u32,
    misr: u32,
    eisr: u64,
}

impl FakeGich {
    pub fn new(num_lr: usize) -> Self {
        FakeGich {
            num_lr,
            lr: [0; VGIC_MAX_SLOTS],
            hcr: 0,
            apr: 0,
            vmcr: 0,
            misr: 0,
            eisr: 0,
        }
    }

    /// Simulate the guest completing the interrupt in `slot`: the state
    /// goes invalid and, for maintenance-flagged entries, EISR/MISR fire.
    pub fn guest_eoi(&mut self, slot: usize) {
        let desc = self.lr[slot];
        if desc & lr::EOI_MAINTENANCE != 0 {
            self.lr[slot] &= !lr::STATE_MASK;
            self.eisr |= 1 << slot;
            self.misr |= GichMisr::EOI.bits();
        } else {
            self.lr[slot] = 0;
        }
    }

    /// Raise EISR/MISR directly, as if the guest had completed `slot`.
    pub fn raise_eoi(&mut self, slot: usize) {
        self.lr[slot] &= !lr::STATE_MASK;
        self.eisr |= 1 << slot;
        self.misr |= GichMisr::EOI.bits();
    }

    pub fn occupied_slots(&self) -> usize {
        (0..self.num_lr)
            .filter(|&s| self.lr[s] & lr::STATE_MASK != 0)
            .count()
    }
}

impl VirtIface for FakeGich {
    fn num_lr(&self) -> usize {
        self.num_lr
    }

    fn read_lr(&self, slot: usize) -> u32 {
        self.lr[slot]
    }

    fn write_lr(&mut self, slot: usize, value: u32) {
        self.lr[slot] = value;
        if value == 0 {
            self.eisr &= !(1u64 << slot);
            if self.eisr == 0 {
                self.misr &= !GichMisr::EOI.bits();
            }
        }
    }

    fn empty_slots(&self) -> SlotBitmap {
        let mut free = SlotBitmap::empty();
        for slot in 0..self.num_lr {
            if self.lr[slot] == 0 {
                free.set(slot);
            }
        }
        free
    }

    fn eoi_slots(&self) -> SlotBitmap {
        SlotBitmap::from_words(self.eisr as u32, (self.eisr >> 32) as u32)
    }

    fn misr(&self) -> u32 {
        self.misr
    }

    fn hcr(&self) -> u32 {
        self.hcr
    }

    fn set_hcr(&mut self, value: u32) {
        self.hcr = value;
    }

    fn apr(&self) -> u32 {
        self.apr
    }

    fn set_apr(&mut self, value: u32) {
        self.apr = value;
    }

    fn vmcr(&self) -> u32 {
        self.vmcr
    }

    fn set_vmcr(&mut self, value: u32) {
        self.vmcr = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage2Event {
    Activate(VmId, TtblHandle),
    Enable(bool),
}

/// Records the stage-2 call sequence so tests can assert ordering.
#[derive(Default)]
pub struct MockStageTwo {
    pub events: Vec<Stage2Event>,
}

impl StageTwo for MockStageTwo {
    fn translation_table(&self, vmid: VmId) -> TtblHandle {
        TtblHandle(0x4000_0000 + vmid.index() as u64 * 0x1000)
    }

    fn activate_table(&mut self, vmid: VmId, ttbl: TtblHandle) {
        self.events.push(Stage2Event::Activate(vmid, ttbl));
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.events.push(Stage2Event::Enable(enabled));
    }
}

/// Holds a "live" banked/CP15 register file; save copies it out, restore
/// copies in. `enter_guest` panics with a recognizable message so tests
/// can drive the diverging first-entry path under `catch_unwind`.
#[derive(Default)]
pub struct MockWorldSwitch {
    pub banked: BankedRegs,
    pub cop: CopRegs,
}

pub const GUEST_ENTRY_PANIC: &str = "mock guest entry";

impl WorldSwitch for MockWorldSwitch {
    fn save_banked(&mut self, out: &mut BankedRegs) {
        *out = self.banked;
    }

    fn restore_banked(&mut self, regs: &BankedRegs) {
        self.banked = *regs;
    }

    fn save_cop(&mut self, out: &mut CopRegs) {
        *out = self.cop;
    }

    fn restore_cop(&mut self, regs: &CopRegs) {
        self.cop = *regs;
    }

    fn enter_guest(&mut self, _regs: &Registers) -> ! {
        panic!("{}", GUEST_ENTRY_PANIC);
    }
}

/// Claims a single address window and emulates loads as a fixed value.
pub struct MockDeviceBus {
    pub window: Option<(u64, u64)>,
    pub read_value: u32,
    pub fail_access: bool,
    pub finds: usize,
    pub reads: usize,
    pub writes: usize,
    pub posts: usize,
    pub last_written: Option<u32>,
}

impl MockDeviceBus {
    pub fn claiming(start: u64, len: u64) -> Self {
        MockDeviceBus {
            window: Some((start, len)),
            read_value: 0x1234_5678,
            fail_access: false,
            finds: 0,
            reads: 0,
            writes: 0,
            posts: 0,
            last_written: None,
        }
    }

    pub fn empty() -> Self {
        MockDeviceBus {
            window: None,
            read_value: 0,
            fail_access: false,
            finds: 0,
            reads: 0,
            writes: 0,
            posts: 0,
            last_written: None,
        }
    }
}

impl DeviceBus for MockDeviceBus {
    fn find_device(
        &self,
        level: VdevLevel,
        fault: &MmioFault,
        _regs: &Registers,
    ) -> Option<DeviceHandle> {
        // Mutated through interior bookkeeping in tests via counters on
        // read/write/post; find itself is counted per top level only.
        if level != VdevLevel::High {
            return None;
        }
        let (start, len) = self.window?;
        if fault.ipa >= start && fault.ipa < start + len {
            Some(DeviceHandle(1))
        } else {
            None
        }
    }

    fn read(
        &mut self,
        _dev: DeviceHandle,
        fault: &MmioFault,
        regs: &mut Registers,
    ) -> armvisor::Result<()> {
        self.reads += 1;
        if self.fail_access {
            return Err(armvisor::HvError::BadAccess);
        }
        regs.gpr[fault.reg as usize] = self.read_value;
        Ok(())
    }

    fn write(
        &mut self,
        _dev: DeviceHandle,
        fault: &MmioFault,
        regs: &mut Registers,
    ) -> armvisor::Result<()> {
        self.writes += 1;
        if self.fail_access {
            return Err(armvisor::HvError::BadAccess);
        }
        self.last_written = Some(regs.gpr[fault.reg as usize]);
        Ok(())
    }

    fn post(
        &mut self,
        _dev: DeviceHandle,
        _fault: &MmioFault,
        regs: &mut Registers,
    ) -> armvisor::Result<()> {
        self.posts += 1;
        regs.pc = regs.pc.wrapping_add(4);
        Ok(())
    }
}

/// Records every physical deactivation the vGIC requests.
#[derive(Default)]
pub struct MockDeactivator {
    pub deactivated: Vec<u32>,
}

impl PirqDeactivate for MockDeactivator {
    fn deactivate(&mut self, pirq: u32) {
        self.deactivated.push(pirq);
    }
}

/// Plain-memory backing for the physical GICD/GICC blocks. The driver's
/// volatile accesses land in these buffers, so tests can seed IAR and
/// inspect enable/priority/target writes.
pub struct GicBlocks {
    gicd: Vec<u32>,
    gicc: Vec<u32>,
}

// GICD_TYPER ITLinesNumber = 2 -> 96 lines.
const TYPER_SEED: u32 = 2;

impl GicBlocks {
    pub fn new() -> Self {
        let mut gicd = vec![0u32; 1024];
        gicd[1] = TYPER_SEED;
        GicBlocks {
            gicd,
            gicc: vec![0u32; 1025],
        }
    }

    pub fn driver(&mut self) -> Gic {
        unsafe { Gic::new(self.gicd.as_mut_ptr(), self.gicc.as_mut_ptr()) }
    }

    pub fn gicd_word(&self, byte_offset: usize) -> u32 {
        self.gicd[byte_offset / 4]
    }

    pub fn gicd_byte(&self, byte_offset: usize) -> u8 {
        (self.gicd[byte_offset / 4] >> ((byte_offset % 4) * 8)) as u8
    }

    pub fn gicc_word(&self, byte_offset: usize) -> u32 {
        self.gicc[byte_offset / 4]
    }

    pub fn clear_gicd_word(&mut self, byte_offset: usize) {
        self.gicd[byte_offset / 4] = 0;
    }

    /// Seed the next acknowledge result (GICC_IAR).
    pub fn set_pending(&mut self, irq: u32) {
        self.gicc[0xC / 4] = irq;
    }
}

/// A register file that looks like a guest trapped from Supervisor mode.
pub fn guest_regs(pc: u32) -> Registers {
    let mut regs = Registers::default();
    regs.pc = pc;
    regs.cpsr = 0x1D3;
    for (i, g) in regs.gpr.iter_mut().enumerate() {
        *g = 0x1000 + i as u32;
    }
    regs
}
