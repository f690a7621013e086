// SPDX-License-Identifier: AGPL-3.0-only

//! Simulator backend
//!
//! An in-process model of the mesh memory: every core's local space and the
//! platform's external DRAM live in one sparse store keyed by global
//! (device) address. No hardware, no host pointers; this is the backend CI
//! runs against.
//!
//! The register file is modelled only as far as the host drives it:
//!
//! | Register | Write effect |
//! |----------|--------------|
//! | `ILATST` | ORed into `ILAT`; the SYNC bit marks the core started |
//! | `ILATCL` | Bits cleared from `ILAT` |
//! | `DEBUGCMD` | HALT sets, RESUME clears `DEBUGSTATUS.HALTED` |
//! | `RESETCORE` | 1 clears the core's run state and interrupt latch |
//!
//! `COREID` always reads back the core's own ID. Every other register is
//! plain storage.

use crate::backend::{Backend, BackendType, Target};
use crate::backends::store::SparseMemory;
use crate::error::{HalError, Result};
use crate::memory::{MemSegment, SegmentHandle};
use crate::platform::{ExtMemDesc, Platform};
use crate::workgroup::Workgroup;
use epiphany_chip::layout::{local_region, LocalRegion};
use epiphany_chip::regs::{self, debugcmd, debugstatus, irq};
use epiphany_chip::{CoreId, ExtWindow, MeshRect};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Run state of one simulated core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreState {
    /// SYNC has been raised since the last reset
    pub started: bool,
    /// Number of SYNC interrupts raised
    pub starts: u32,
    /// Number of resets
    pub resets: u32,
}

/// In-process mesh memory model
#[derive(Debug)]
pub struct SimulatorBackend {
    chips: Vec<MeshRect>,
    emems: Vec<ExtMemDesc>,
    memory: SparseMemory,
    cores: BTreeMap<CoreId, CoreState>,
}

impl SimulatorBackend {
    /// Simulate the chips and external memories of `platform`.
    pub fn new(platform: &Platform) -> Self {
        Self {
            chips: platform.chip_rects(),
            emems: platform.emems.clone(),
            memory: SparseMemory::new(),
            cores: BTreeMap::new(),
        }
    }

    /// Copy of `len` bytes of a core's local space.
    pub fn core_memory(&self, id: CoreId, offset: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.memory.read(u64::from(id.global(offset)), &mut buf);
        buf
    }

    /// Copy of `len` bytes of external memory at device address `addr`.
    pub fn ext_memory(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.memory.read(u64::from(addr), &mut buf);
        buf
    }

    /// Run state of a core (default if never touched).
    pub fn core_state(&self, id: CoreId) -> CoreState {
        self.cores.get(&id).copied().unwrap_or_default()
    }

    /// True once SYNC has been raised on the core since its last reset.
    pub fn is_started(&self, id: CoreId) -> bool {
        self.core_state(id).started
    }

    fn check_core(&self, id: CoreId, offset: u32, len: usize) -> Result<(LocalRegion, u32)> {
        let (row, col) = id.coords();
        if !self.chips.iter().any(|chip| chip.contains(row, col)) {
            return Err(HalError::invalid_group(format!("core {id} is not on any chip")));
        }
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        local_region(offset, len).ok_or_else(|| {
            HalError::address_range(id.global(offset), len, format!("local memory of core {id}"))
        })
    }

    fn check_segment(segment: &MemSegment, offset: u32, len: usize) -> Result<u64> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if !matches!(segment.handle(), SegmentHandle::Store) {
            return Err(HalError::invalid_state(format!(
                "segment {:#010x} was not allocated by the simulator",
                segment.ephy_base()
            )));
        }
        if u64::from(offset) + u64::from(len) > u64::from(segment.size()) {
            return Err(HalError::address_range(
                segment.ephy_base().wrapping_add(offset),
                len,
                format!("segment {:#010x}+{:#x}", segment.ephy_base(), segment.size()),
            ));
        }
        Ok(u64::from(segment.ephy_base()) + u64::from(offset))
    }

    fn write_register(&mut self, id: CoreId, reg: u32, value: u32) {
        let ilat = u64::from(id.global(regs::ILAT));
        let status = u64::from(id.global(regs::DEBUGSTATUS));
        let state = self.cores.entry(id).or_default();

        match reg {
            regs::ILATST => {
                let latched = self.memory.read_u32(ilat) | value;
                self.memory.write_u32(ilat, latched);
                if value & (1 << irq::SYNC) != 0 {
                    state.started = true;
                    state.starts += 1;
                    debug!("Core {id} started");
                }
            }
            regs::ILATCL => {
                let latched = self.memory.read_u32(ilat) & !value;
                self.memory.write_u32(ilat, latched);
            }
            regs::DEBUGCMD => {
                let halted = self.memory.read_u32(status);
                let halted = if value == debugcmd::HALT {
                    halted | debugstatus::HALTED
                } else {
                    halted & !debugstatus::HALTED
                };
                self.memory.write_u32(status, halted);
            }
            regs::RESETCORE => {
                if value & 1 != 0 {
                    state.started = false;
                    state.resets += 1;
                    self.memory.write_u32(ilat, 0);
                    self.memory.write_u32(status, 0);
                    debug!("Core {id} reset");
                }
                self.memory.write_u32(u64::from(id.global(reg)), value);
            }
            _ => self.memory.write_u32(u64::from(id.global(reg)), value),
        }
    }
}

impl Backend for SimulatorBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Simulator
    }

    fn attach(&mut self, group: &Workgroup) -> Result<()> {
        for id in group.core_ids() {
            self.check_core(id, 0, 0)?;
            self.cores.entry(id).or_default();
        }
        Ok(())
    }

    fn detach(&mut self, _group: &Workgroup) -> Result<()> {
        Ok(())
    }

    fn alloc(&mut self, window: ExtWindow) -> Result<MemSegment> {
        let emem = self
            .emems
            .iter()
            .find(|m| {
                u64::from(window.ephy_base) >= u64::from(m.ephy_base)
                    && u64::from(window.ephy_base) + u64::from(window.size)
                        <= u64::from(m.ephy_base) + u64::from(m.size)
            })
            .ok_or_else(|| {
                HalError::resource(format!(
                    "no simulated external memory at {:#010x}+{:#x}",
                    window.ephy_base, window.size
                ))
            })?;
        debug!(
            "Simulated segment {:#010x}+{:#x} in '{}'",
            window.ephy_base, window.size, emem.name
        );
        let window = ExtWindow {
            host_base: u64::from(window.ephy_base - emem.ephy_base),
            ..window
        };
        Ok(MemSegment::new(window, SegmentHandle::Store))
    }

    fn write_bytes(&mut self, target: Target<'_>, offset: u32, data: &[u8]) -> Result<usize> {
        match target {
            Target::Core(id) => {
                let (region, rel) = self.check_core(id, offset, data.len())?;
                trace!("sim write core {id} @ {offset:#07x} ({} bytes)", data.len());
                if region == LocalRegion::Regs && data.len() == 4 && rel % 4 == 0 {
                    let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    self.write_register(id, offset, value);
                } else {
                    self.memory.write(u64::from(id.global(offset)), data);
                }
            }
            Target::Segment(segment) => {
                let addr = Self::check_segment(segment, offset, data.len())?;
                trace!("sim write ext @ {addr:#010x} ({} bytes)", data.len());
                self.memory.write(addr, data);
            }
        }
        Ok(data.len())
    }

    fn read_bytes(&mut self, target: Target<'_>, offset: u32, buf: &mut [u8]) -> Result<usize> {
        match target {
            Target::Core(id) => {
                self.check_core(id, offset, buf.len())?;
                self.memory.read(u64::from(id.global(offset)), buf);
                if offset == regs::COREID && buf.len() == 4 {
                    buf.copy_from_slice(&id.raw().to_le_bytes());
                }
            }
            Target::Segment(segment) => {
                let addr = Self::check_segment(segment, offset, buf.len())?;
                self.memory.read(addr, buf);
            }
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimulatorBackend {
        SimulatorBackend::new(&Platform::parallella16())
    }

    #[test]
    fn core_memory_round_trip() {
        let mut sim = sim();
        let id = CoreId::from_coords(32, 9);
        sim.write_bytes(Target::Core(id), 0x200, b"mesh").unwrap();
        assert_eq!(sim.core_memory(id, 0x200, 4), b"mesh");
        assert_eq!(sim.core_memory(CoreId::from_coords(32, 8), 0x200, 4), [0; 4]);
    }

    #[test]
    fn rejects_off_chip_core_and_bad_offset() {
        let mut sim = sim();
        let off_chip = CoreId::from_coords(0, 0);
        assert!(sim.write_bytes(Target::Core(off_chip), 0, &[1]).is_err());

        let id = CoreId::from_coords(32, 8);
        let err = sim.write_bytes(Target::Core(id), 0x1_0000, &[1]).unwrap_err();
        assert!(matches!(err, HalError::AddressRange { .. }));
    }

    #[test]
    fn sync_starts_core_and_reset_clears() {
        let mut sim = sim();
        let id = CoreId::from_coords(33, 10);
        sim.write_word(Target::Core(id), regs::ILATST, 1 << irq::SYNC).unwrap();
        assert!(sim.is_started(id));
        assert_eq!(sim.read_word(Target::Core(id), regs::ILAT).unwrap(), 1);

        sim.write_word(Target::Core(id), regs::RESETCORE, 1).unwrap();
        sim.write_word(Target::Core(id), regs::RESETCORE, 0).unwrap();
        let state = sim.core_state(id);
        assert!(!state.started);
        assert_eq!((state.starts, state.resets), (1, 1));
        assert_eq!(sim.read_word(Target::Core(id), regs::ILAT).unwrap(), 0);
    }

    #[test]
    fn user_interrupt_latches_without_start() {
        let mut sim = sim();
        let id = CoreId::from_coords(32, 8);
        sim.write_word(Target::Core(id), regs::ILATST, 1 << irq::USER).unwrap();
        assert!(!sim.is_started(id));
        sim.write_word(Target::Core(id), regs::ILATCL, 1 << irq::USER).unwrap();
        assert_eq!(sim.read_word(Target::Core(id), regs::ILAT).unwrap(), 0);
    }

    #[test]
    fn halt_and_resume() {
        let mut sim = sim();
        let id = CoreId::from_coords(32, 8);
        sim.write_word(Target::Core(id), regs::DEBUGCMD, debugcmd::HALT).unwrap();
        assert_eq!(
            sim.read_word(Target::Core(id), regs::DEBUGSTATUS).unwrap() & debugstatus::HALTED,
            debugstatus::HALTED
        );
        sim.write_word(Target::Core(id), regs::DEBUGCMD, debugcmd::RESUME).unwrap();
        assert_eq!(sim.read_word(Target::Core(id), regs::DEBUGSTATUS).unwrap(), 0);
    }

    #[test]
    fn coreid_reads_back() {
        let mut sim = sim();
        let id = CoreId::from_coords(35, 11);
        assert_eq!(sim.read_word(Target::Core(id), regs::COREID).unwrap(), id.raw());
    }

    #[test]
    fn external_segment_bounds() {
        let mut sim = sim();
        let emem = Platform::parallella16().emem().unwrap().clone();
        let mut seg = sim.alloc(emem.window(0x100, 0x40).unwrap()).unwrap();
        assert_eq!(seg.host_base(), 0x100);

        sim.write_bytes(Target::Segment(&mut seg), 0x3C, &[7; 4]).unwrap();
        assert_eq!(sim.ext_memory(0x8E00_013C, 4), [7; 4]);
        assert!(sim.write_bytes(Target::Segment(&mut seg), 0x3D, &[7; 4]).is_err());
        assert!(sim
            .alloc(ExtWindow {
                phy_base: 0,
                ephy_base: 0x1000_0000,
                size: 4,
                host_base: 0
            })
            .is_err());
    }
}
