// SPDX-License-Identifier: AGPL-3.0-only

//! Program loading onto workgroups
//!
//! Places the loadable segments of an executable into the local memory of
//! every core of a workgroup rectangle (and into shared DRAM for segments
//! linked there), writes each core's configuration block, and optionally
//! starts the cores once all of them are loaded.
//!
//! # Stages
//!
//! ```text
//! Idle → MemoryAllocated → FormatValidated → PerCoreLoading
//!      → ConfigInjected → [Started] → Done        (Error from any stage)
//! ```
//!
//! Every destination of every core is computed and range-checked before the
//! first byte is written, so an address error never leaves a half-loaded
//! group behind. Cores are visited in row-major order, and start signals go
//! out in a second pass only after the whole rectangle is loaded.

use crate::backend::{Backend, Target};
use crate::config_block::{EmemConfig, GroupConfig};
use crate::control;
use crate::error::{HalError, Result};
use crate::image::{ExecutableImage, Segment, EM_ADAPTEVA_EPIPHANY};
use crate::memory::MemSegment;
use crate::platform::Platform;
use crate::workgroup::Workgroup;
use bytes::Bytes;
use epiphany_chip::addr::{split_global, to_global, AddrClass};
use epiphany_chip::layout::{local_region, EMEM_CONFIG_ADDR, GROUP_CONFIG_ADDR};
use epiphany_chip::{CoreId, ExtWindow, MeshRect};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn, Dispatch};

/// How much the loader reports
///
/// `Off` silences every event raised while a load runs, the backend's
/// included. Outside a load, backend and control events go to the thread's
/// subscriber as usual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagLevel {
    /// Nothing
    Off,
    /// One line per load
    #[default]
    Info,
    /// Per core
    Debug,
    /// Per segment
    Trace,
}

impl DiagLevel {
    /// Level for a `-v` count: 0 is Info.
    pub const fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Default)]
pub struct LoadConfig {
    /// Loader diagnostics
    pub diag: DiagLevel,

    /// Zero `memsz - filesz` after each segment's payload
    pub zero_fill: bool,

    /// Subscriber that receives the loader's events instead of the
    /// thread's default
    pub dispatch: Option<Dispatch>,
}

impl LoadConfig {
    /// Set the diagnostic level.
    pub fn with_diag(mut self, diag: DiagLevel) -> Self {
        self.diag = diag;
        self
    }

    /// Enable or disable zero fill.
    pub fn with_zero_fill(mut self, zero_fill: bool) -> Self {
        self.zero_fill = zero_fill;
        self
    }

    /// Route loader events to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }
}

/// Loader progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing done yet
    #[default]
    Idle,
    /// Staging segment allocated
    MemoryAllocated,
    /// Executable parsed and accepted
    FormatValidated,
    /// Writing segments to cores
    PerCoreLoading,
    /// Every core loaded and configured
    ConfigInjected,
    /// Every core signalled to start
    Started,
    /// Load finished and staging released
    Done,
    /// Load failed
    Error,
}

/// Load operation metrics
#[derive(Debug, Clone, Default)]
pub struct LoadMetrics {
    /// Cores that received segments and a configuration block
    pub cores_loaded: usize,

    /// Segment payload writes
    pub segments_written: usize,

    /// Payload bytes written (configuration blocks excluded)
    pub bytes_written: usize,

    /// Bytes zeroed past segment payloads
    pub bytes_zeroed: usize,

    /// Cores started
    pub cores_started: usize,

    /// Total duration
    pub duration: Duration,
}

/// Where one segment of one core goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dest {
    Core { id: CoreId, offset: u32 },
    External { offset: u32 },
}

#[derive(Debug)]
struct Placement {
    index: usize,
    dest: Dest,
    payload: Bytes,
    zero_len: u32,
}

#[derive(Debug)]
struct CorePlan {
    row: u32,
    col: u32,
    id: CoreId,
    placements: Vec<Placement>,
}

/// Group program loader
///
/// Borrows the backend for the duration of the load; all writes happen on
/// the caller's thread and complete before [`GroupLoader::load_group`]
/// returns.
#[derive(Debug)]
pub struct GroupLoader<'a> {
    backend: &'a mut dyn Backend,
    platform: &'a Platform,
    config: LoadConfig,
    state: LoadState,
}

impl<'a> GroupLoader<'a> {
    /// Loader writing through `backend` onto `platform`.
    pub fn new(backend: &'a mut dyn Backend, platform: &'a Platform, config: LoadConfig) -> Self {
        Self {
            backend,
            platform,
            config,
            state: LoadState::Idle,
        }
    }

    /// Current stage.
    pub const fn state(&self) -> LoadState {
        self.state
    }

    /// Load one core: group-relative `(row, col)`.
    ///
    /// # Errors
    ///
    /// See [`GroupLoader::load_group`].
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        group: &Workgroup,
        row: u32,
        col: u32,
        start: bool,
    ) -> Result<LoadMetrics> {
        self.load_group(path, group, row, col, 1, 1, start)
    }

    /// Load the `rows × cols` cores at group-relative `(row, col)`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The rectangle is not inside the group
    /// - The staging memory cannot be allocated
    /// - The executable is unreadable or not a 32-bit ELF image
    /// - A segment does not fit its destination
    /// - A backend write fails
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
        let path = path.as_ref();
        let rect = MeshRect::new(row, col, rows, cols);
        self.state = LoadState::Idle;

        let dispatch = if self.config.diag == DiagLevel::Off {
            Some(Dispatch::none())
        } else {
            self.config.dispatch.clone()
        };
        match dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || {
                self.run_reporting(path, group, rect, start)
            }),
            None => self.run_reporting(path, group, rect, start),
        }
    }

    fn run_reporting(
        &mut self,
        path: &Path,
        group: &Workgroup,
        rect: MeshRect,
        start: bool,
    ) -> Result<LoadMetrics> {
        let result = self.run(path, group, rect, start);
        if let Err(e) = &result {
            self.state = LoadState::Error;
            if self.config.diag > DiagLevel::Off {
                warn!("Load of {} failed: {e}", path.display());
            }
        }
        result
    }

    fn run(
        &mut self,
        path: &Path,
        group: &Workgroup,
        rect: MeshRect,
        start: bool,
    ) -> Result<LoadMetrics> {
        let diag = self.config.diag;
        let began = Instant::now();
        let mut metrics = LoadMetrics::default();

        let sub = group.sub_rect(rect.row, rect.col, rect.rows, rect.cols)?;

        let emem = self.platform.emem()?;
        let mut staging = self.backend.alloc(emem.window(0, emem.size)?)?;
        self.state = LoadState::MemoryAllocated;

        let image = ExecutableImage::open(path)?;
        if image.machine() != EM_ADAPTEVA_EPIPHANY && diag > DiagLevel::Off {
            warn!(
                "{} has machine type {:#x}, not Epiphany; loading anyway",
                path.display(),
                image.machine()
            );
        }
        self.state = LoadState::FormatValidated;

        let plans = self.plan(&image, group, &sub, staging.window())?;
        self.state = LoadState::PerCoreLoading;

        if diag >= DiagLevel::Info {
            info!(
                "Loading {} onto {}×{} cores at ({},{}) of group {}",
                path.display(),
                sub.rows,
                sub.cols,
                sub.row,
                sub.col,
                group.base()
            );
        }

        for plan in &plans {
            self.write_core(plan, group, &mut staging, &mut metrics)?;
        }
        self.state = LoadState::ConfigInjected;

        if start {
            for plan in &plans {
                control::start_core(self.backend, plan.id)?;
                metrics.cores_started += 1;
            }
            self.state = LoadState::Started;
        }

        drop(staging);
        metrics.duration = began.elapsed();
        self.state = LoadState::Done;

        if diag >= DiagLevel::Info {
            info!(
                "Loaded {} core(s): {} segment write(s), {} bytes in {:?}{}",
                metrics.cores_loaded,
                metrics.segments_written,
                metrics.bytes_written,
                metrics.duration,
                if start { ", started" } else { "" }
            );
        }
        Ok(metrics)
    }

    /// Destinations for every core of `sub`, validated, in row-major order.
    fn plan(
        &self,
        image: &ExecutableImage,
        group: &Workgroup,
        sub: &MeshRect,
        window: &ExtWindow,
    ) -> Result<Vec<CorePlan>> {
        let chips = self.platform.chip_rects();
        let mut plans = Vec::with_capacity(sub.len() as usize);

        for (r, c) in sub.iter_row_major() {
            let (row, col) = (sub.row + r, sub.col + c);
            let id = group.core_id(row, col)?;
            let mut placements = Vec::new();

            for segment in image.segments() {
                if !segment.is_loadable() {
                    if self.config.diag >= DiagLevel::Trace {
                        trace!("Skipping program header {} (type {})", segment.index, segment.kind);
                    }
                    continue;
                }
                if let Some(p) = self.place(segment, group, row, col, &chips, window)? {
                    placements.push(p);
                }
            }

            plans.push(CorePlan {
                row,
                col,
                id,
                placements,
            });
        }
        Ok(plans)
    }

    fn place(
        &self,
        segment: &Segment,
        group: &Workgroup,
        row: u32,
        col: u32,
        chips: &[MeshRect],
        window: &ExtWindow,
    ) -> Result<Option<Placement>> {
        let zero_len = if self.config.zero_fill {
            segment.bss_len()
        } else {
            0
        };
        let span = segment.filesz + zero_len;
        if span == 0 {
            return Ok(None);
        }

        let addr = segment.vaddr;
        let dest = match epiphany_chip::addr::classify(addr, chips) {
            AddrClass::Local => {
                let (id, offset) = split_global(to_global(group.base(), row, col, addr));
                Dest::Core { id, offset }
            }
            AddrClass::OnChip { .. } => {
                let (id, offset) = split_global(addr);
                Dest::Core { id, offset }
            }
            AddrClass::OffChip => {
                let emem = self.platform.emem_for(addr, span).ok_or_else(|| {
                    HalError::address_range(
                        addr,
                        span,
                        format!("any external memory (program header {})", segment.index),
                    )
                })?;
                if !emem.access.is_writable() {
                    return Err(HalError::access_denied(format!(
                        "external memory '{}' is read-only (program header {} at {addr:#010x})",
                        emem.name, segment.index
                    )));
                }
                let offset = window.offset_of(addr, span).ok_or_else(|| {
                    HalError::address_range(
                        addr,
                        span,
                        format!(
                            "staging memory {:#010x}+{:#x} (program header {})",
                            window.ephy_base, window.size, segment.index
                        ),
                    )
                })?;
                Dest::External { offset }
            }
        };

        if let Dest::Core { id, offset } = dest {
            if local_region(offset, span).is_none() {
                return Err(HalError::address_range(
                    id.global(offset),
                    span,
                    format!("mapped windows of core {id} (program header {})", segment.index),
                ));
            }
        }

        Ok(Some(Placement {
            index: segment.index,
            dest,
            payload: segment.payload().clone(),
            zero_len,
        }))
    }

    fn write_core(
        &mut self,
        plan: &CorePlan,
        group: &Workgroup,
        staging: &mut MemSegment,
        metrics: &mut LoadMetrics,
    ) -> Result<()> {
        let diag = self.config.diag;
        if diag >= DiagLevel::Debug {
            debug!(
                "Core {} ({},{}): {} segment(s)",
                plan.id,
                plan.row,
                plan.col,
                plan.placements.len()
            );
        }

        for p in &plan.placements {
            let (target, offset) = match p.dest {
                Dest::Core { id, offset } => (Target::Core(id), offset),
                Dest::External { offset } => (Target::Segment(&mut *staging), offset),
            };
            if diag >= DiagLevel::Trace {
                trace!(
                    "  header {} → {} @ {offset:#x}: {} bytes + {} zero",
                    p.index,
                    target.describe(),
                    p.payload.len(),
                    p.zero_len
                );
            }
            self.write_all(target, offset, &p.payload)?;
            metrics.segments_written += 1;
            metrics.bytes_written += p.payload.len();

            if p.zero_len > 0 {
                let target = match p.dest {
                    Dest::Core { id, .. } => Target::Core(id),
                    Dest::External { .. } => Target::Segment(&mut *staging),
                };
                // Bounded by the local space or the external window, both
                // validated during planning.
                #[allow(clippy::cast_possible_truncation)]
                let at = offset + p.payload.len() as u32;
                self.write_all(target, at, &vec![0u8; p.zero_len as usize])?;
                metrics.bytes_zeroed += p.zero_len as usize;
            }
        }

        let group_block = GroupConfig::new(group, plan.row, plan.col);
        self.write_all(Target::Core(plan.id), GROUP_CONFIG_ADDR, group_block.as_bytes())?;
        let emem_block = EmemConfig::new(staging.ephy_base());
        self.write_all(Target::Core(plan.id), EMEM_CONFIG_ADDR, emem_block.as_bytes())?;

        metrics.cores_loaded += 1;
        Ok(())
    }

    fn write_all(&mut self, target: Target<'_>, offset: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let what = target.describe();
        let n = self.backend.write_bytes(target, offset, data)?;
        if n != data.len() {
            return Err(HalError::transfer_failed(format!(
                "write to {what} at {offset:#x} incomplete: {n} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatorBackend;
    use crate::image::testing::elf32;
    use std::io::Write;

    fn image_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn parallella_group(platform: &Platform, rows: u32, cols: u32) -> Workgroup {
        Workgroup::new(
            MeshRect::new(platform.row(), platform.col(), rows, cols),
            platform.chip_type(),
        )
    }

    #[test]
    fn diag_level_ordering() {
        assert!(DiagLevel::Off < DiagLevel::Info);
        assert!(DiagLevel::Debug < DiagLevel::Trace);
        assert_eq!(DiagLevel::from_verbosity(0), DiagLevel::Info);
        assert_eq!(DiagLevel::from_verbosity(5), DiagLevel::Trace);
    }

    #[test]
    fn loads_local_segment_and_config() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 2, 2);
        let file = image_file(&elf32(&[(0x100, &[0x5A; 8], 8)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        let metrics = loader.load(file.path(), &group, 1, 1, false).unwrap();
        assert_eq!(loader.state(), LoadState::Done);
        assert_eq!(metrics.cores_loaded, 1);
        assert_eq!(metrics.bytes_written, 8);

        let id = CoreId::from_coords(33, 9);
        assert_eq!(sim.core_memory(id, 0x100, 8), [0x5A; 8]);
        let block = GroupConfig::from_bytes(&sim.core_memory(id, GROUP_CONFIG_ADDR, 40)).unwrap();
        assert_eq!((block.core_row, block.core_col), (1, 1));
        assert_eq!((block.group_row, block.group_col), (32, 8));
        let emem = EmemConfig::from_bytes(&sim.core_memory(id, EMEM_CONFIG_ADDR, 8)).unwrap();
        assert_eq!(emem.base, 0x8E00_0000);
        assert!(!sim.is_started(id));
    }

    #[test]
    fn external_segment_goes_to_dram() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 1, 1);
        let file = image_file(&elf32(&[(0x8E00_1000, b"dram", 4)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        loader.load(file.path(), &group, 0, 0, false).unwrap();
        assert_eq!(sim.ext_memory(0x8E00_1000, 4), b"dram");
    }

    #[test]
    fn out_of_window_external_segment_is_rejected_before_writes() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 1, 1);
        let file = image_file(&elf32(&[(0x100, &[1; 4], 4), (0x9000_0000, &[2; 4], 4)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        let err = loader.load(file.path(), &group, 0, 0, false).unwrap_err();
        assert!(matches!(err, HalError::AddressRange { .. }));
        assert_eq!(loader.state(), LoadState::Error);
        assert_eq!(sim.core_memory(CoreId::from_coords(32, 8), 0x100, 4), [0; 4]);
    }

    #[test]
    fn local_segment_outside_mapped_windows_is_rejected() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 1, 1);
        let file = image_file(&elf32(&[(0x1_0000, &[1; 4], 4)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        let err = loader.load(file.path(), &group, 0, 0, false).unwrap_err();
        assert!(matches!(err, HalError::AddressRange { .. }));
    }

    #[test]
    fn read_only_external_memory_is_not_loaded() {
        let mut platform = Platform::parallella16();
        platform.emems[0].access = crate::platform::EmemAccess::ReadOnly;
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 1, 1);
        let file = image_file(&elf32(&[(0x100, &[1; 4], 4), (0x8E00_0000, b"ro!!", 4)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        let err = loader.load(file.path(), &group, 0, 0, false).unwrap_err();
        assert!(matches!(err, HalError::AccessDenied { .. }));
        assert_eq!(sim.ext_memory(0x8E00_0000, 4), [0; 4]);
        assert_eq!(sim.core_memory(CoreId::from_coords(32, 8), 0x100, 4), [0; 4]);
    }

    #[test]
    fn local_segment_past_local_space_is_rejected() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 1, 1);
        let file = image_file(&elf32(&[(0xF_FFFC, &[1; 8], 8)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        assert!(loader.load(file.path(), &group, 0, 0, false).is_err());
    }

    #[test]
    fn rectangle_outside_group_is_rejected() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 2, 2);
        let file = image_file(&elf32(&[(0x100, &[1; 4], 4)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        let err = loader
            .load_group(file.path(), &group, 1, 1, 2, 1, false)
            .unwrap_err();
        assert!(matches!(err, HalError::InvalidGroup { .. }));
        assert_eq!(loader.state(), LoadState::Error);
    }

    #[test]
    fn start_signals_every_core() {
        let platform = Platform::parallella16();
        let mut sim = SimulatorBackend::new(&platform);
        let group = parallella_group(&platform, 2, 2);
        let file = image_file(&elf32(&[(0x0, &[0xAA; 4], 4)]));

        let mut loader = GroupLoader::new(&mut sim, &platform, LoadConfig::default());
        let metrics = loader
            .load_group(file.path(), &group, 0, 0, 2, 2, true)
            .unwrap();
        assert_eq!(metrics.cores_started, 4);
        for id in group.core_ids() {
            assert!(sim.is_started(id));
        }
    }
}
