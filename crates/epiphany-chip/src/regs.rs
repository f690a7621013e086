// SPDX-License-Identifier: AGPL-3.0-only

//! Core register map.
//!
//! Offsets are local (core-relative) addresses inside the register window
//! at `0xF0000`. Combine with a core ID via [`crate::CoreId::global`] to
//! reach another core's registers over the mesh.

// ── eCore registers ─────────────────────────────────────────────────────────

/// Core configuration.
pub const CONFIG: u32 = 0xF_0400;
/// Core status (bit 0: active).
pub const STATUS: u32 = 0xF_0404;
/// Program counter.
pub const PC: u32 = 0xF_0408;
/// Debug status (bit 0: halted).
pub const DEBUGSTATUS: u32 = 0xF_040C;
/// Hardware loop counter.
pub const LC: u32 = 0xF_0414;
/// Hardware loop start.
pub const LS: u32 = 0xF_0418;
/// Hardware loop end.
pub const LE: u32 = 0xF_041C;
/// Interrupt return address.
pub const IRET: u32 = 0xF_0420;
/// Interrupt mask.
pub const IMASK: u32 = 0xF_0424;
/// Interrupt latch.
pub const ILAT: u32 = 0xF_0428;
/// Interrupt latch set: writing a 1 bit raises that interrupt.
pub const ILATST: u32 = 0xF_042C;
/// Interrupt latch clear.
pub const ILATCL: u32 = 0xF_0430;
/// Interrupts pending.
pub const IPEND: u32 = 0xF_0434;
/// Core timer 0.
pub const CTIMER0: u32 = 0xF_0438;
/// Core timer 1.
pub const CTIMER1: u32 = 0xF_043C;
/// Floating-point status.
pub const FSTATUS: u32 = 0xF_0440;
/// Debug command: write [`debugcmd::HALT`] or [`debugcmd::RESUME`].
pub const DEBUGCMD: u32 = 0xF_0448;

// ── DMA ─────────────────────────────────────────────────────────────────────

/// DMA channel 0 configuration.
pub const DMA0CONFIG: u32 = 0xF_0500;
/// DMA channel 0 status.
pub const DMA0STATUS: u32 = 0xF_051C;
/// DMA channel 1 configuration.
pub const DMA1CONFIG: u32 = 0xF_0520;
/// DMA channel 1 status.
pub const DMA1STATUS: u32 = 0xF_053C;

// ── Memory protection ───────────────────────────────────────────────────────

/// Memory status.
pub const MEMSTATUS: u32 = 0xF_0604;
/// Memory protection.
pub const MEMPROTECT: u32 = 0xF_0608;

// ── Mesh node ───────────────────────────────────────────────────────────────

/// Mesh node configuration.
pub const MESHCONFIG: u32 = 0xF_0700;
/// Read-only core ID.
pub const COREID: u32 = 0xF_0704;
/// Multicast ID.
pub const MULTICAST: u32 = 0xF_0708;
/// Core reset: write 1 to assert, 0 to release.
pub const RESETCORE: u32 = 0xF_070C;
/// C-mesh routing.
pub const CMESHROUTE: u32 = 0xF_0710;
/// X-mesh routing.
pub const XMESHROUTE: u32 = 0xF_0714;
/// R-mesh routing.
pub const RMESHROUTE: u32 = 0xF_0718;

/// Interrupt latch bit positions.
pub mod irq {
    /// Sync / reset: starts a loaded program at the reset vector.
    pub const SYNC: u32 = 0;
    /// Software exception.
    pub const SW_EXCEPTION: u32 = 1;
    /// Memory fault.
    pub const MEM_FAULT: u32 = 2;
    /// Timer 0 expired.
    pub const TIMER0: u32 = 3;
    /// Timer 1 expired.
    pub const TIMER1: u32 = 4;
    /// Message interrupt.
    pub const MESSAGE: u32 = 5;
    /// DMA channel 0 done.
    pub const DMA0: u32 = 6;
    /// DMA channel 1 done.
    pub const DMA1: u32 = 7;
    /// Wired-AND barrier.
    pub const WAND: u32 = 8;
    /// User interrupt: what the host raises with a signal.
    pub const USER: u32 = 9;
}

/// `DEBUGCMD` values.
pub mod debugcmd {
    /// Halt the core.
    pub const HALT: u32 = 1;
    /// Resume a halted core.
    pub const RESUME: u32 = 0;
}

/// `DEBUGSTATUS` bits.
pub mod debugstatus {
    /// Core is halted.
    pub const HALTED: u32 = 1 << 0;
}

/// Named registers, in address order, for register dumps.
pub const CORE_REGISTERS: &[(&str, u32)] = &[
    ("CONFIG", CONFIG),
    ("STATUS", STATUS),
    ("PC", PC),
    ("DEBUGSTATUS", DEBUGSTATUS),
    ("LC", LC),
    ("LS", LS),
    ("LE", LE),
    ("IRET", IRET),
    ("IMASK", IMASK),
    ("ILAT", ILAT),
    ("IPEND", IPEND),
    ("CTIMER0", CTIMER0),
    ("CTIMER1", CTIMER1),
    ("FSTATUS", FSTATUS),
    ("DMA0CONFIG", DMA0CONFIG),
    ("DMA0STATUS", DMA0STATUS),
    ("DMA1CONFIG", DMA1CONFIG),
    ("DMA1STATUS", DMA1STATUS),
    ("MEMSTATUS", MEMSTATUS),
    ("MEMPROTECT", MEMPROTECT),
    ("MESHCONFIG", MESHCONFIG),
    ("COREID", COREID),
    ("MULTICAST", MULTICAST),
    ("CMESHROUTE", CMESHROUTE),
    ("XMESHROUTE", XMESHROUTE),
    ("RMESHROUTE", RMESHROUTE),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{REGS_BASE, REGS_SIZE};

    #[test]
    fn registers_sit_in_register_window() {
        for &(name, offset) in CORE_REGISTERS {
            assert!(
                offset >= REGS_BASE && offset + 4 <= REGS_BASE + REGS_SIZE,
                "{name} at {offset:#x} outside register window"
            );
            assert_eq!(offset % 4, 0, "{name} misaligned");
        }
    }

    #[test]
    fn dump_table_is_sorted() {
        assert!(CORE_REGISTERS.windows(2).all(|w| w[0].1 < w[1].1));
    }
}
