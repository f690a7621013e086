// SPDX-License-Identifier: AGPL-3.0-only

//! Host hardware-access layer for Epiphany many-core meshes.
//!
//! Opens rectangles of cores, moves bytes in and out of their local memory
//! and the shared external DRAM, drives the core control registers, and
//! loads ELF32 programs onto whole workgroups.
//!
//! # Backends
//!
//! ```text
//! Hardware:
//!   DirectBackend    — mmap of /dev/epiphany (or /dev/mem)
//!
//! No hardware required:
//!   SimulatorBackend — in-process memory model (CI)
//!   PalBackend       — ranked team transport (in-process MemoryTeam)
//! ```
//!
//! Chosen once, from `EHAL_TARGET` (`direct`, `sim`, `pal`), when the
//! [`Hal`] is built.
//!
//! # Quick start
//!
//! ```no_run
//! use epiphany_hal::{Hal, HalConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut hal = Hal::init(HalConfig::from_env()?)?;
//! let group = hal.open(0, 0, 2, 2)?;
//!
//! let metrics = hal.load_group("hello.elf", &group, 0, 0, 2, 2, true)?;
//! println!("{} cores loaded, {} bytes", metrics.cores_loaded, metrics.bytes_written);
//!
//! let mut greeting = [0u8; 16];
//! hal.read(&group, 1, 1, 0x2000, &mut greeting)?;
//! hal.close(group)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
pub mod config_block;
pub mod control;
mod error;
mod hal;
pub mod image;
mod loading;
mod memory;
pub mod platform;
mod workgroup;

pub use backend::{select_backend, Backend, BackendSelection, BackendType, Target, TARGET_ENV};
pub use backends::{DirectBackend, MemoryTeam, PalBackend, SimulatorBackend, Team};
pub use config_block::{EmemConfig, GroupConfig};
pub use error::{HalError, ImageError, Result};
pub use hal::{Hal, HalConfig};
pub use image::{ExecutableImage, ImageFormat, Segment};
pub use loading::{DiagLevel, GroupLoader, LoadConfig, LoadMetrics, LoadState};
pub use memory::{MemSegment, SegmentHandle};
pub use platform::{ChipDesc, EmemAccess, ExtMemDesc, Platform};
pub use workgroup::Workgroup;

/// Silicon model re-exported from `epiphany-chip`.
pub use epiphany_chip as chip;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Backend, BackendSelection, DiagLevel, ExecutableImage, GroupLoader, Hal, HalConfig,
        HalError, LoadConfig, LoadMetrics, MemSegment, Platform, Result, SimulatorBackend,
        Target, Workgroup,
    };
}
