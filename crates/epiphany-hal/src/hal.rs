// SPDX-License-Identifier: AGPL-3.0-only

//! HAL handle: platform, backend and the operations built on them
//!
//! One [`Hal`] owns one backend for its lifetime. Workgroups are opened in
//! platform-relative coordinates (0,0 is the first core of the first chip);
//! operations on a group take group-relative coordinates.

use crate::backend::{select_backend, Backend, BackendSelection, BackendType, Target};
use crate::control;
use crate::error::{HalError, Result};
use crate::loading::{GroupLoader, LoadConfig, LoadMetrics};
use crate::memory::MemSegment;
use crate::platform::{ExtMemDesc, Platform};
use crate::workgroup::Workgroup;
use epiphany_chip::addr::MESH_SPAN;
use epiphany_chip::layout::{REGS_BASE, REGS_SIZE};
use epiphany_chip::MeshRect;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// HAL configuration
#[derive(Debug, Clone)]
pub struct HalConfig {
    /// Which backend to construct
    pub backend: BackendSelection,

    /// Board description
    pub platform: Platform,

    /// Device file for the direct backend
    pub device: Option<PathBuf>,

    /// Loader defaults
    pub load: LoadConfig,
}

impl HalConfig {
    /// Configuration from `EHAL_TARGET`, `EPIPHANY_HDF` and `EHAL_DEVICE`.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is malformed or the platform file cannot
    /// be read.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            backend: BackendSelection::from_env()?,
            platform: Platform::from_env()?,
            device: None,
            load: LoadConfig::default(),
        })
    }

    /// Simulator over `platform`.
    pub fn simulator(platform: Platform) -> Self {
        Self {
            backend: BackendSelection::Simulator,
            platform,
            device: None,
            load: LoadConfig::default(),
        }
    }
}

/// Hardware access handle
#[derive(Debug)]
pub struct Hal {
    platform: Platform,
    backend: Box<dyn Backend>,
    load_config: LoadConfig,
}

impl Hal {
    /// Construct the configured backend.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be initialized.
    pub fn init(config: HalConfig) -> Result<Self> {
        let backend = select_backend(config.backend, &config.platform, config.device.as_deref())?;
        info!(
            "HAL ready: {} backend, platform {}",
            backend.backend_type(),
            config.platform.version
        );
        Ok(Self {
            platform: config.platform,
            backend,
            load_config: config.load,
        })
    }

    /// Use an already constructed backend.
    pub fn with_backend(platform: Platform, backend: Box<dyn Backend>) -> Self {
        Self {
            platform,
            backend,
            load_config: LoadConfig::default(),
        }
    }

    /// Replace the loader defaults.
    #[must_use]
    pub fn with_load_config(mut self, load_config: LoadConfig) -> Self {
        self.load_config = load_config;
        self
    }

    /// Board description.
    pub const fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Backend in use.
    pub fn backend_type(&self) -> BackendType {
        self.backend.backend_type()
    }

    /// Direct access to the backend.
    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// Open `rows × cols` cores at platform-relative `(row, col)`.
    ///
    /// # Errors
    ///
    /// Returns error if any core is off the platform or the backend cannot
    /// attach.
    pub fn open(&mut self, row: u32, col: u32, rows: u32, cols: u32) -> Result<Workgroup> {
        if rows == 0 || cols == 0 || rows > MESH_SPAN || cols > MESH_SPAN {
            return Err(HalError::invalid_group(format!("{rows}×{cols} is not a valid group size")));
        }
        let origin = self
            .platform
            .row()
            .checked_add(row)
            .zip(self.platform.col().checked_add(col))
            .ok_or_else(|| {
                HalError::invalid_group(format!("origin ({row},{col}) is not on the platform"))
            })?;
        let rect = MeshRect::new(origin.0, origin.1, rows, cols);
        let chip = self.platform.chip_at(rect.row, rect.col).ok_or_else(|| {
            HalError::invalid_group(format!("origin ({row},{col}) is not on the platform"))
        })?;
        let chip_type = chip.chip_type;
        let chips = self.platform.chip_rects();
        if let Some((r, c)) = rect
            .iter_row_major()
            .find(|&(r, c)| !chips.iter().any(|chip| chip.contains(rect.row + r, rect.col + c)))
        {
            return Err(HalError::invalid_group(format!(
                "core ({},{}) of {rows}×{cols} group at ({row},{col}) is not on the platform",
                row + r,
                col + c
            )));
        }

        let group = Workgroup::new(rect, chip_type);
        self.backend.attach(&group)?;
        debug!("Opened {rows}×{cols} group at {}", group.base());
        Ok(group)
    }

    /// Close a group opened with [`Hal::open`].
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot detach.
    pub fn close(&mut self, group: Workgroup) -> Result<()> {
        debug!("Closing group at {}", group.base());
        self.backend.detach(&group)
    }

    /// Allocate `size` bytes at `offset` into the primary external memory.
    ///
    /// # Errors
    ///
    /// Returns error if the range is outside the memory or cannot be mapped.
    pub fn alloc(&mut self, offset: u32, size: u32) -> Result<MemSegment> {
        let window = self.platform.emem()?.window(offset, size)?;
        let segment = self.backend.alloc(window)?;
        debug!(
            "Allocated {size:#x} bytes of external memory at {:#010x} (host phys {:#010x})",
            segment.ephy_base(),
            segment.phy_base()
        );
        Ok(segment)
    }

    /// Read core memory at local `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or the read fails.
    pub fn read(
        &mut self,
        group: &Workgroup,
        row: u32,
        col: u32,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize> {
        let id = group.core_id(row, col)?;
        self.backend.read_bytes(Target::Core(id), offset, buf)
    }

    /// Write core memory at local `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or the write fails.
    pub fn write(
        &mut self,
        group: &Workgroup,
        row: u32,
        col: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<usize> {
        let id = group.core_id(row, col)?;
        self.backend.write_bytes(Target::Core(id), offset, data)
    }

    /// Read a core register.
    ///
    /// # Errors
    ///
    /// Returns error if `reg` is not in the register window or the read fails.
    pub fn read_reg(&mut self, group: &Workgroup, row: u32, col: u32, reg: u32) -> Result<u32> {
        let id = group.core_id(row, col)?;
        check_reg(reg)?;
        self.backend.read_word(Target::Core(id), reg)
    }

    /// Write a core register.
    ///
    /// # Errors
    ///
    /// Returns error if `reg` is not in the register window or the write fails.
    pub fn write_reg(
        &mut self,
        group: &Workgroup,
        row: u32,
        col: u32,
        reg: u32,
        value: u32,
    ) -> Result<()> {
        let id = group.core_id(row, col)?;
        check_reg(reg)?;
        self.backend.write_word(Target::Core(id), reg, value)
    }

    /// Read external memory at `offset` into `segment`.
    ///
    /// # Errors
    ///
    /// Returns error if the memory is write-only or the range is outside
    /// the segment.
    pub fn read_mem(&mut self, segment: &mut MemSegment, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let emem = self.emem_of(segment)?;
        if !emem.access.is_readable() {
            return Err(HalError::access_denied(format!(
                "external memory '{}' is write-only",
                emem.name
            )));
        }
        self.backend.read_bytes(Target::Segment(segment), offset, buf)
    }

    /// Write external memory at `offset` into `segment`.
    ///
    /// # Errors
    ///
    /// Returns error if the memory is read-only or the range is outside the
    /// segment.
    pub fn write_mem(&mut self, segment: &mut MemSegment, offset: u32, data: &[u8]) -> Result<usize> {
        let emem = self.emem_of(segment)?;
        if !emem.access.is_writable() {
            return Err(HalError::access_denied(format!(
                "external memory '{}' is read-only",
                emem.name
            )));
        }
        self.backend.write_bytes(Target::Segment(segment), offset, data)
    }

    fn emem_of(&self, segment: &MemSegment) -> Result<&ExtMemDesc> {
        self.platform
            .emem_for(segment.ephy_base(), segment.size())
            .ok_or_else(|| {
                HalError::address_range(
                    segment.ephy_base(),
                    segment.size(),
                    "external memories of the platform",
                )
            })
    }

    /// Reset one core.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or a write fails.
    pub fn reset_core(&mut self, group: &Workgroup, row: u32, col: u32) -> Result<()> {
        control::reset_core(self.backend.as_mut(), group.core_id(row, col)?)
    }

    /// Start one core.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or the write fails.
    pub fn start(&mut self, group: &Workgroup, row: u32, col: u32) -> Result<()> {
        control::start_core(self.backend.as_mut(), group.core_id(row, col)?)
    }

    /// Halt one core.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or the write fails.
    pub fn halt(&mut self, group: &Workgroup, row: u32, col: u32) -> Result<()> {
        control::halt_core(self.backend.as_mut(), group.core_id(row, col)?)
    }

    /// Resume one halted core.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or the write fails.
    pub fn resume(&mut self, group: &Workgroup, row: u32, col: u32) -> Result<()> {
        control::resume_core(self.backend.as_mut(), group.core_id(row, col)?)
    }

    /// Raise the user interrupt on one core.
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the group or the write fails.
    pub fn signal(&mut self, group: &Workgroup, row: u32, col: u32) -> Result<()> {
        control::signal_core(self.backend.as_mut(), group.core_id(row, col)?)
    }

    /// Reset every core of the group, row-major.
    ///
    /// # Errors
    ///
    /// Returns error on the first failed write.
    pub fn reset_group(&mut self, group: &Workgroup) -> Result<()> {
        for id in group.core_ids() {
            control::reset_core(self.backend.as_mut(), id)?;
        }
        Ok(())
    }

    /// Start every core of the group, row-major.
    ///
    /// # Errors
    ///
    /// Returns error on the first failed write.
    pub fn start_group(&mut self, group: &Workgroup) -> Result<()> {
        for id in group.core_ids() {
            control::start_core(self.backend.as_mut(), id)?;
        }
        Ok(())
    }

    /// Loader over this handle's backend, with the handle's defaults.
    pub fn loader(&mut self) -> GroupLoader<'_> {
        GroupLoader::new(self.backend.as_mut(), &self.platform, self.load_config.clone())
    }

    /// Load one core; see [`GroupLoader::load`].
    ///
    /// # Errors
    ///
    /// Returns error if the load fails.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        group: &Workgroup,
        row: u32,
        col: u32,
        start: bool,
    ) -> Result<LoadMetrics> {
        self.loader().load(path, group, row, col, start)
    }

    /// Load a rectangle of cores; see [`GroupLoader::load_group`].
    ///
    /// # Errors
    ///
    /// Returns error if the load fails.
    #[allow(clippy::too_many_arguments)]
    pub fn load_group(
        &mut self,
        path: impl AsRef<Path>,
        group: &Workgroup,
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
        start: bool,
    ) -> Result<LoadMetrics> {
        self.loader()
            .load_group(path, group, row, col, rows, cols, start)
    }
}

fn check_reg(reg: u32) -> Result<()> {
    let past_end = reg
        .checked_add(4)
        .is_none_or(|end| end > REGS_BASE + REGS_SIZE);
    if reg < REGS_BASE || past_end || reg % 4 != 0 {
        return Err(HalError::address_range(reg, 4, "core register window"));
    }
    Ok(())
}
