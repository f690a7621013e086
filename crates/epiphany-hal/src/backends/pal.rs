// SPDX-License-Identifier: AGPL-3.0-only

//! Ranked team backend
//!
//! Cores are reached through a [`Team`]: a rectangle of processors numbered
//! row-major from zero, each with a 20-bit local address space, plus a
//! shared memory space addressed by device address. The backend turns core
//! IDs into ranks and segment offsets into shared addresses.

use crate::backend::{Backend, BackendType, Target};
use crate::backends::store::SparseMemory;
use crate::error::{HalError, Result};
use crate::memory::{MemSegment, SegmentHandle};
use crate::platform::Platform;
use crate::workgroup::Workgroup;
use epiphany_chip::addr::LOCAL_SPACE_SIZE;
use epiphany_chip::layout::local_region;
use epiphany_chip::{CoreId, ExtWindow, MeshRect};
use std::fmt::Debug;

/// A team of ranked processors with shared memory
pub trait Team: Debug + Send {
    /// Absolute mesh rectangle the team spans.
    fn rect(&self) -> MeshRect;

    /// Number of members.
    fn size(&self) -> usize {
        self.rect().len() as usize
    }

    /// True if `[addr, addr + len)` is shared memory.
    fn is_shared(&self, addr: u32, len: u32) -> bool;

    /// Write to member `rank` at local `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the rank or range is invalid.
    fn write(&mut self, rank: usize, offset: u32, data: &[u8]) -> Result<usize>;

    /// Read from member `rank` at local `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the rank or range is invalid.
    fn read(&mut self, rank: usize, offset: u32, buf: &mut [u8]) -> Result<usize>;

    /// Write to shared memory at device address `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if the range is not shared memory.
    fn write_shared(&mut self, addr: u32, data: &[u8]) -> Result<usize>;

    /// Read from shared memory at device address `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if the range is not shared memory.
    fn read_shared(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize>;
}

/// In-process team: one sparse store per rank plus one shared store
#[derive(Debug)]
pub struct MemoryTeam {
    rect: MeshRect,
    members: Vec<SparseMemory>,
    shared_ranges: Vec<(u32, u32)>,
    shared: SparseMemory,
}

impl MemoryTeam {
    /// Team over `rect` with shared memory `[base, base + size)` ranges.
    pub fn new(rect: MeshRect, shared_ranges: Vec<(u32, u32)>) -> Self {
        Self {
            rect,
            members: (0..rect.len()).map(|_| SparseMemory::new()).collect(),
            shared_ranges,
            shared: SparseMemory::new(),
        }
    }

    /// Team over the smallest rectangle holding every chip of `platform`,
    /// sharing its external memories.
    ///
    /// Cores in gaps between chips are members too.
    pub fn for_platform(platform: &Platform) -> Self {
        let rect = platform
            .chip_rects()
            .into_iter()
            .reduce(|a, b| {
                let row = a.row.min(b.row);
                let col = a.col.min(b.col);
                let end_row = (a.row + a.rows).max(b.row + b.rows);
                let end_col = (a.col + a.cols).max(b.col + b.cols);
                MeshRect::new(row, col, end_row - row, end_col - col)
            })
            .unwrap_or(MeshRect::new(0, 0, 0, 0));
        let shared = platform
            .emems
            .iter()
            .map(|m| (m.ephy_base, m.size))
            .collect();
        Self::new(rect, shared)
    }

    fn member(&mut self, rank: usize, offset: u32, len: usize) -> Result<&mut SparseMemory> {
        if u64::from(offset) + len as u64 > u64::from(LOCAL_SPACE_SIZE) {
            return Err(HalError::address_range(
                offset,
                u32::try_from(len).unwrap_or(u32::MAX),
                format!("local space of rank {rank}"),
            ));
        }
        let size = self.members.len();
        self.members
            .get_mut(rank)
            .ok_or_else(|| HalError::invalid_group(format!("rank {rank} not in team of {size}")))
    }

    fn check_shared(&self, addr: u32, len: usize) -> Result<()> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if self.is_shared(addr, len) {
            Ok(())
        } else {
            Err(HalError::address_range(addr, len, "team shared memory"))
        }
    }
}

impl Team for MemoryTeam {
    fn rect(&self) -> MeshRect {
        self.rect
    }

    fn is_shared(&self, addr: u32, len: u32) -> bool {
        self.shared_ranges.iter().any(|&(base, size)| {
            u64::from(addr) >= u64::from(base)
                && u64::from(addr) + u64::from(len) <= u64::from(base) + u64::from(size)
        })
    }

    fn write(&mut self, rank: usize, offset: u32, data: &[u8]) -> Result<usize> {
        self.member(rank, offset, data.len())?
            .write(u64::from(offset), data);
        Ok(data.len())
    }

    fn read(&mut self, rank: usize, offset: u32, buf: &mut [u8]) -> Result<usize> {
        self.member(rank, offset, buf.len())?
            .read(u64::from(offset), buf);
        Ok(buf.len())
    }

    fn write_shared(&mut self, addr: u32, data: &[u8]) -> Result<usize> {
        self.check_shared(addr, data.len())?;
        self.shared.write(u64::from(addr), data);
        Ok(data.len())
    }

    fn read_shared(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize> {
        self.check_shared(addr, buf.len())?;
        self.shared.read(u64::from(addr), buf);
        Ok(buf.len())
    }
}

/// Backend over a ranked team
#[derive(Debug)]
pub struct PalBackend<T: Team> {
    team: T,
}

impl<T: Team> PalBackend<T> {
    /// Wrap an opened team.
    pub fn new(team: T) -> Self {
        tracing::debug!("PAL team of {} at {:?}", team.size(), team.rect());
        Self { team }
    }

    /// The underlying team.
    pub fn team(&self) -> &T {
        &self.team
    }

    /// Rank of absolute core `id` within the team.
    ///
    /// # Errors
    ///
    /// Returns error if the core is not a team member.
    pub fn rank(&self, id: CoreId) -> Result<usize> {
        let rect = self.team.rect();
        let (row, col) = id.coords();
        if !rect.contains(row, col) {
            return Err(HalError::invalid_group(format!(
                "core {id} is not in the team at {rect:?}"
            )));
        }
        Ok(((row - rect.row) * rect.cols + (col - rect.col)) as usize)
    }

    fn check_local(id: CoreId, offset: u32, len: usize) -> Result<()> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        match local_region(offset, len) {
            Some(_) => Ok(()),
            None => Err(HalError::address_range(
                id.global(offset),
                len,
                format!("mapped windows of core {id}"),
            )),
        }
    }

    fn shared_addr(segment: &MemSegment, offset: u32, len: usize) -> Result<u32> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if u64::from(offset) + u64::from(len) > u64::from(segment.size()) {
            return Err(HalError::address_range(
                segment.ephy_base().wrapping_add(offset),
                len,
                format!("segment {:#010x}+{:#x}", segment.ephy_base(), segment.size()),
            ));
        }
        Ok(segment.ephy_base() + offset)
    }
}

impl<T: Team> Backend for PalBackend<T> {
    fn backend_type(&self) -> BackendType {
        BackendType::Pal
    }

    fn attach(&mut self, group: &Workgroup) -> Result<()> {
        if !self.team.rect().encloses(&group.rect()) {
            return Err(HalError::invalid_group(format!(
                "group {:?} is not inside the team at {:?}",
                group.rect(),
                self.team.rect()
            )));
        }
        Ok(())
    }

    fn detach(&mut self, _group: &Workgroup) -> Result<()> {
        Ok(())
    }

    fn alloc(&mut self, window: ExtWindow) -> Result<MemSegment> {
        if !self.team.is_shared(window.ephy_base, window.size) {
            return Err(HalError::resource(format!(
                "{:#010x}+{:#x} is not team shared memory",
                window.ephy_base, window.size
            )));
        }
        Ok(MemSegment::new(
            ExtWindow {
                host_base: 0,
                ..window
            },
            SegmentHandle::Store,
        ))
    }

    fn write_bytes(&mut self, target: Target<'_>, offset: u32, data: &[u8]) -> Result<usize> {
        match target {
            Target::Core(id) => {
                let rank = self.rank(id)?;
                Self::check_local(id, offset, data.len())?;
                self.team.write(rank, offset, data)
            }
            Target::Segment(segment) => {
                let addr = Self::shared_addr(segment, offset, data.len())?;
                self.team.write_shared(addr, data)
            }
        }
    }

    fn read_bytes(&mut self, target: Target<'_>, offset: u32, buf: &mut [u8]) -> Result<usize> {
        match target {
            Target::Core(id) => {
                let rank = self.rank(id)?;
                Self::check_local(id, offset, buf.len())?;
                self.team.read(rank, offset, buf)
            }
            Target::Segment(segment) => {
                let addr = Self::shared_addr(segment, offset, buf.len())?;
                self.team.read_shared(addr, buf)
            }
        }
    }
}
