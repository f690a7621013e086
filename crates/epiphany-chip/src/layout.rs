// SPDX-License-Identifier: AGPL-3.0-only

//! Per-core local memory map and the in-core configuration ABI.
//!
//! ```text
//! 0x00000 ┌──────────────────────────────┐
//!         │ interrupt vector table (10×4)│
//! 0x00028 ├──────────────────────────────┤
//!         │ group config block (40 B)    │  written by the host loader
//! 0x00050 ├──────────────────────────────┤
//!         │ external-memory config (8 B) │  written by the host loader
//! 0x00058 ├──────────────────────────────┤
//!         │ program code / data          │
//! 0x08000 └──────────────────────────────┘  end of SRAM (32 KiB)
//!          …
//! 0xF0000 ┌──────────────────────────────┐
//!         │ memory-mapped registers      │
//! 0xF1000 └──────────────────────────────┘
//! ```
//!
//! The two config records are the contract between the host loader and
//! on-core runtime code: fixed address, fixed size, little-endian words.

/// Start of core SRAM.
pub const SRAM_BASE: u32 = 0x0000_0000;

/// Size of the SRAM window the host maps per core.
pub const SRAM_SIZE: u32 = 0x8000;

/// Start of the memory-mapped register window.
pub const REGS_BASE: u32 = 0x000F_0000;

/// Size of the register window the host maps per core.
pub const REGS_SIZE: u32 = 0x1000;

/// Size of the interrupt vector table at the bottom of SRAM.
pub const IVT_SIZE: u32 = 0x28;

/// Local address of the group configuration record.
pub const GROUP_CONFIG_ADDR: u32 = IVT_SIZE;

/// Size of the group configuration record.
pub const GROUP_CONFIG_SIZE: u32 = 0x28;

/// Local address of the external-memory configuration record.
pub const EMEM_CONFIG_ADDR: u32 = GROUP_CONFIG_ADDR + GROUP_CONFIG_SIZE;

/// Size of the external-memory configuration record.
pub const EMEM_CONFIG_SIZE: u32 = 0x8;

/// Object type tags stored in the first word of each config record.
pub mod objtype {
    /// Workgroup descriptor.
    pub const GROUP: u32 = 3;
    /// External memory descriptor.
    pub const EXT_MEM: u32 = 5;
}

/// Which host-mapped window of a core a local offset falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalRegion {
    /// Core SRAM.
    Sram,
    /// Register file.
    Regs,
}

/// Locate `[offset, offset + len)` in the per-core windows.
///
/// Returns the region and the offset relative to its base, or `None` if the
/// range is not wholly inside one mapped window.
#[must_use]
pub const fn local_region(offset: u32, len: u32) -> Option<(LocalRegion, u32)> {
    let end = offset as u64 + len as u64;
    if end <= (SRAM_BASE + SRAM_SIZE) as u64 {
        Some((LocalRegion::Sram, offset - SRAM_BASE))
    } else if offset >= REGS_BASE && end <= (REGS_BASE + REGS_SIZE) as u64 {
        Some((LocalRegion::Regs, offset - REGS_BASE))
    } else {
        None
    }
}

/// Parallella board constants (E16G301 and E64G401 variants).
pub mod parallella {
    /// Mesh row of the chip's first core.
    pub const CHIP_ROW: u32 = 32;
    /// Mesh column of the chip's first core.
    pub const CHIP_COL: u32 = 8;
    /// Host-side physical base of the shared DRAM window.
    pub const EMEM_PHY_BASE: u32 = 0x3E00_0000;
    /// Device-side physical base of the shared DRAM window.
    pub const EMEM_EPHY_BASE: u32 = 0x8E00_0000;
    /// Shared DRAM window size (32 MiB).
    pub const EMEM_SIZE: u32 = 0x0200_0000;
    /// FPGA e-link system registers.
    pub const ESYS_REGS_BASE: u32 = 0x808F_0000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_records_follow_vector_table() {
        assert_eq!(GROUP_CONFIG_ADDR, 0x28);
        assert_eq!(EMEM_CONFIG_ADDR, 0x50);
        assert!(EMEM_CONFIG_ADDR + EMEM_CONFIG_SIZE <= SRAM_SIZE);
    }

    #[test]
    fn local_region_lookup() {
        assert_eq!(local_region(0, 16), Some((LocalRegion::Sram, 0)));
        assert_eq!(local_region(0x7FF0, 16), Some((LocalRegion::Sram, 0x7FF0)));
        assert_eq!(local_region(0x7FF0, 17), None);
        assert_eq!(local_region(0xF_042C, 4), Some((LocalRegion::Regs, 0x42C)));
        assert_eq!(local_region(0x1_0000, 4), None);
    }
}
