//! CP15 accessors used by the hypervisor on the target.
//!
//! Trap syndrome registers (HSR/HDFAR/HPFAR) are read here by the vector
//! glue and passed into the dispatcher as plain data.

use core::arch::asm;

macro_rules! cp15_read {
    ($name:ident, $op1:literal, $crn:ident, $crm:ident, $op2:literal) => {
        #[inline]
        pub fn $name() -> u32 {
            let value: u32;
            unsafe {
                asm!(
                    concat!(
                        "mrc p15, ", $op1, ", {v}, ",
                        stringify!($crn), ", ", stringify!($crm), ", ", $op2
                    ),
                    v = out(reg) value,
                    options(nomem, nostack),
                );
            }
            value
        }
    };
}

macro_rules! cp15_write {
    ($name:ident, $op1:literal, $crn:ident, $crm:ident, $op2:literal) => {
        #[inline]
        pub fn $name(value: u32) {
            unsafe {
                asm!(
                    concat!(
                        "mcr p15, ", $op1, ", {v}, ",
                        stringify!($crn), ", ", stringify!($crm), ", ", $op2
                    ),
                    v = in(reg) value,
                    options(nomem, nostack),
                );
            }
        }
    };
}

cp15_read!(read_midr, "0", c0, c0, "0");
cp15_read!(read_mpidr, "0", c0, c0, "5");

cp15_read!(read_sctlr, "0", c1, c0, "0");
cp15_write!(write_sctlr, "0", c1, c0, "0");

cp15_read!(read_ttbr0, "0", c2, c0, "0");
cp15_write!(write_ttbr0, "0", c2, c0, "0");
cp15_read!(read_ttbr1, "0", c2, c0, "1");
cp15_write!(write_ttbr1, "0", c2, c0, "1");
cp15_read!(read_ttbcr, "0", c2, c0, "2");
cp15_write!(write_ttbcr, "0", c2, c0, "2");

cp15_read!(read_vbar, "0", c12, c0, "0");
cp15_write!(write_vbar, "0", c12, c0, "0");

// Hyp-mode trap reporting.
cp15_read!(read_hcr, "4", c1, c1, "0");
cp15_write!(write_hcr, "4", c1, c1, "0");
cp15_read!(read_hsr, "4", c5, c2, "0");
cp15_read!(read_hdfar, "4", c6, c0, "0");
cp15_read!(read_hpfar, "4", c6, c0, "4");

// Stage-2 control.
cp15_read!(read_vtcr, "4", c2, c1, "2");
cp15_write!(write_vtcr, "4", c2, c1, "2");

/// Configuration Base Address Register: locates the GIC register file.
cp15_read!(read_cbar, "4", c15, c0, "0");
