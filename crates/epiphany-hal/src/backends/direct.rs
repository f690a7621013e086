// SPDX-License-Identifier: AGPL-3.0-only

//! Direct hardware backend
//!
//! Maps core SRAM, core register files and shared DRAM through the Epiphany
//! device file and copies with plain (or volatile, for registers) memory
//! accesses. Core windows are mapped when a workgroup is attached, or on
//! first use of a core outside any attached group, and unmapped on detach.

use crate::backend::{Backend, BackendType, Target};
use crate::backends::mmap::MmapRegion;
use crate::error::{HalError, Result};
use crate::memory::{MemSegment, SegmentHandle};
use crate::workgroup::Workgroup;
use epiphany_chip::layout::{local_region, LocalRegion, REGS_BASE, REGS_SIZE, SRAM_BASE, SRAM_SIZE};
use epiphany_chip::{CoreId, ExtWindow};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the device file.
pub const DEVICE_ENV: &str = "EHAL_DEVICE";

/// Device file of the Epiphany kernel driver.
pub const EPIPHANY_DEVICE: &str = "/dev/epiphany";

/// Fallback when the driver is not loaded.
pub const MEM_DEVICE: &str = "/dev/mem";

/// Mapped windows of one core
#[derive(Debug)]
struct CoreMapping {
    sram: MmapRegion,
    regs: MmapRegion,
}

impl CoreMapping {
    fn map(file: &File, id: CoreId) -> Result<Self> {
        debug!("Mapping core {id}");
        Ok(Self {
            sram: MmapRegion::new(file, u64::from(id.global(SRAM_BASE)), SRAM_SIZE as usize)?,
            regs: MmapRegion::new(file, u64::from(id.global(REGS_BASE)), REGS_SIZE as usize)?,
        })
    }

    fn region(&mut self, region: LocalRegion) -> &mut MmapRegion {
        match region {
            LocalRegion::Sram => &mut self.sram,
            LocalRegion::Regs => &mut self.regs,
        }
    }
}

/// Memory-mapped hardware backend
#[derive(Debug)]
pub struct DirectBackend {
    path: PathBuf,
    file: File,
    cores: BTreeMap<CoreId, CoreMapping>,
}

impl DirectBackend {
    /// Open the device file.
    ///
    /// `device`, then `EHAL_DEVICE`, then `/dev/epiphany` falling back to
    /// `/dev/mem`.
    ///
    /// # Errors
    ///
    /// Returns error if no device file can be opened read-write.
    pub fn open(device: Option<&Path>) -> Result<Self> {
        let explicit = device
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(DEVICE_ENV).map(PathBuf::from));

        let (path, file) = match explicit {
            Some(path) => {
                let file = open_rw(&path)?;
                (path, file)
            }
            None => match open_rw(Path::new(EPIPHANY_DEVICE)) {
                Ok(file) => (PathBuf::from(EPIPHANY_DEVICE), file),
                Err(e) => {
                    warn!("{e}; falling back to {MEM_DEVICE}");
                    (PathBuf::from(MEM_DEVICE), open_rw(Path::new(MEM_DEVICE))?)
                }
            },
        };

        info!("Direct backend on {}", path.display());
        Ok(Self {
            path,
            file,
            cores: BTreeMap::new(),
        })
    }

    /// Device file in use.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cores currently mapped.
    pub fn mapped_cores(&self) -> usize {
        self.cores.len()
    }

    fn core(&mut self, id: CoreId) -> Result<&mut CoreMapping> {
        if !self.cores.contains_key(&id) {
            let mapping = CoreMapping::map(&self.file, id)?;
            self.cores.insert(id, mapping);
        }
        self.cores
            .get_mut(&id)
            .ok_or_else(|| HalError::resource(format!("core {id} not mapped")))
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| HalError::resource(format!("Cannot open {}: {e}", path.display())))
}

fn core_window(id: CoreId, offset: u32, len: usize) -> Result<(LocalRegion, usize)> {
    let len32 = u32::try_from(len)
        .map_err(|_| HalError::address_range(id.global(offset), u32::MAX, format!("core {id}")))?;
    local_region(offset, len32)
        .map(|(region, rel)| (region, rel as usize))
        .ok_or_else(|| {
            HalError::address_range(
                id.global(offset),
                len32,
                format!("mapped windows of core {id}"),
            )
        })
}

/// Mapping of `segment` and the position of `[offset, offset + len)` in it,
/// found by translating the device address to the host mapping.
fn segment_access(
    segment: &mut MemSegment,
    offset: u32,
    len: usize,
) -> Result<(&mut MmapRegion, usize)> {
    let (base, size) = (segment.ephy_base(), segment.size());
    let len32 = u32::try_from(len).unwrap_or(u32::MAX);
    let outside = || {
        HalError::address_range(
            base.wrapping_add(offset),
            len32,
            format!("segment {base:#010x}+{size:#x}"),
        )
    };
    let addr = base.checked_add(offset).ok_or_else(outside)?;
    let host = segment.host_addr(addr, len32).ok_or_else(outside)?;
    let rel = host
        .checked_sub(segment.host_base())
        .and_then(|rel| usize::try_from(rel).ok())
        .ok_or_else(outside)?;

    match segment.handle_mut() {
        SegmentHandle::Mapped(region) => Ok((region, rel)),
        SegmentHandle::Store => Err(HalError::invalid_state(format!(
            "segment {base:#010x} was not allocated by the direct backend"
        ))),
    }
}

impl Backend for DirectBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Direct
    }

    fn attach(&mut self, group: &Workgroup) -> Result<()> {
        for id in group.core_ids() {
            self.core(id)?;
        }
        debug!("Attached {} core(s)", group.rect().len());
        Ok(())
    }

    fn detach(&mut self, group: &Workgroup) -> Result<()> {
        for id in group.core_ids() {
            self.cores.remove(&id);
        }
        Ok(())
    }

    fn alloc(&mut self, window: ExtWindow) -> Result<MemSegment> {
        let region = MmapRegion::new(&self.file, u64::from(window.phy_base), window.size as usize)
            .map_err(|e| {
                HalError::resource(format!(
                    "Cannot map external memory {:#010x}+{:#x}: {e}",
                    window.phy_base, window.size
                ))
            })?;
        let window = ExtWindow {
            host_base: region.host_addr(),
            ..window
        };
        Ok(MemSegment::new(window, SegmentHandle::Mapped(region)))
    }

    fn write_bytes(&mut self, target: Target<'_>, offset: u32, data: &[u8]) -> Result<usize> {
        match target {
            Target::Core(id) => {
                let (region, rel) = core_window(id, offset, data.len())?;
                let map = self.core(id)?.region(region);
                if region == LocalRegion::Regs && data.len() == 4 && rel % 4 == 0 {
                    let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    map.write_u32(rel, value)?;
                } else {
                    map.write_bytes(rel, data)?;
                }
            }
            Target::Segment(segment) => {
                let (map, rel) = segment_access(segment, offset, data.len())?;
                map.write_bytes(rel, data)?;
            }
        }
        Ok(data.len())
    }

    fn read_bytes(&mut self, target: Target<'_>, offset: u32, buf: &mut [u8]) -> Result<usize> {
        match target {
            Target::Core(id) => {
                let (region, rel) = core_window(id, offset, buf.len())?;
                let map = self.core(id)?.region(region);
                if region == LocalRegion::Regs && buf.len() == 4 && rel % 4 == 0 {
                    buf.copy_from_slice(&map.read_u32(rel)?.to_le_bytes());
                } else {
                    map.read_bytes(rel, buf)?;
                }
            }
            Target::Segment(segment) => {
                let (map, rel) = segment_access(segment, offset, buf.len())?;
                map.read_bytes(rel, buf)?;
            }
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use epiphany_chip::regs;
    use std::io::Write;

    /// Scratch file large enough to hold core (0,1)'s windows at their
    /// global addresses, standing in for the device file.
    fn scratch_device() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let len = CoreId::from_coords(0, 2).global_base() as usize;
        file.as_file_mut().set_len(len as u64).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn routes_sram_and_registers() {
        let dev = scratch_device();
        let mut backend = DirectBackend::open(Some(dev.path())).unwrap();
        let id = CoreId::from_coords(0, 1);

        backend.write_bytes(Target::Core(id), 0x100, &[1, 2, 3]).unwrap();
        backend.write_word(Target::Core(id), regs::ILATST, 1).unwrap();
        assert_eq!(backend.mapped_cores(), 1);

        let mut out = [0u8; 3];
        backend.read_bytes(Target::Core(id), 0x100, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(backend.read_word(Target::Core(id), regs::ILATST).unwrap(), 1);
    }

    #[test]
    fn rejects_unmapped_local_range() {
        let dev = scratch_device();
        let mut backend = DirectBackend::open(Some(dev.path())).unwrap();
        let id = CoreId::from_coords(0, 1);
        let err = backend
            .write_bytes(Target::Core(id), SRAM_SIZE - 2, &[0; 4])
            .unwrap_err();
        assert!(matches!(err, HalError::AddressRange { .. }));
    }

    #[test]
    fn attach_and_detach_group() {
        let dev = scratch_device();
        let mut backend = DirectBackend::open(Some(dev.path())).unwrap();
        let group = Workgroup::new(
            epiphany_chip::MeshRect::new(0, 0, 1, 2),
            Platform::parallella16().chip_type(),
        );
        backend.attach(&group).unwrap();
        assert_eq!(backend.mapped_cores(), 2);
        backend.detach(&group).unwrap();
        assert_eq!(backend.mapped_cores(), 0);
    }

    #[test]
    fn allocated_segment_is_host_mapped() {
        let dev = scratch_device();
        let mut backend = DirectBackend::open(Some(dev.path())).unwrap();
        let mut seg = backend
            .alloc(ExtWindow {
                phy_base: 0x1000,
                ephy_base: 0x8E00_0000,
                size: 0x100,
                host_base: 0,
            })
            .unwrap();
        assert_ne!(seg.host_base(), 0);

        backend.write_word(Target::Segment(&mut seg), 0x10, 0xCAFE_F00D).unwrap();
        assert_eq!(
            backend.read_word(Target::Segment(&mut seg), 0x10).unwrap(),
            0xCAFE_F00D
        );
        let err = backend.write_bytes(Target::Segment(&mut seg), 0xFE, &[0; 4]).unwrap_err();
        assert!(matches!(err, HalError::AddressRange { .. }));
        assert!(backend.read_bytes(Target::Segment(&mut seg), u32::MAX, &mut [0; 1]).is_err());
    }

    #[test]
    #[ignore = "Requires hardware"]
    fn opens_epiphany_device() {
        let backend = DirectBackend::open(None).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Direct);
    }
}
