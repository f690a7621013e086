// SPDX-License-Identifier: AGPL-3.0-only

//! Backend abstraction for mesh memory access
//!
//! Every byte the HAL moves goes through one [`Backend`]: a core's 1 MiB
//! local space addressed by core ID and local offset, or an allocated
//! external memory segment addressed by offset into the segment. The
//! backend is chosen once when the [`crate::Hal`] is built and owned by it.

use crate::error::{HalError, Result};
use crate::memory::MemSegment;
use crate::platform::Platform;
use crate::workgroup::Workgroup;
use epiphany_chip::{CoreId, ExtWindow};
use std::fmt::Debug;
use std::path::Path;
use std::str::FromStr;

/// Environment variable selecting the backend.
pub const TARGET_ENV: &str = "EHAL_TARGET";

/// Where a read or write lands
#[derive(Debug)]
pub enum Target<'a> {
    /// A core's local space; offsets are 20-bit local addresses.
    Core(CoreId),
    /// An external memory segment; offsets are relative to its device base.
    Segment(&'a mut MemSegment),
}

impl Target<'_> {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Core(id) => format!("core {id}"),
            Self::Segment(seg) => format!("segment {:#010x}", seg.ephy_base()),
        }
    }
}

/// Mesh memory transport
///
/// Calls are blocking and complete before returning; `&mut self` gives the
/// caller exclusive use of the transport.
pub trait Backend: Debug + Send {
    /// Backend type for diagnostics
    fn backend_type(&self) -> BackendType;

    /// Prepare access to the cores of `group`.
    ///
    /// # Errors
    ///
    /// Returns error if core windows cannot be reached.
    fn attach(&mut self, group: &Workgroup) -> Result<()>;

    /// Release whatever [`Backend::attach`] acquired for `group`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot release the group.
    fn detach(&mut self, group: &Workgroup) -> Result<()>;

    /// Make the external memory described by `window` reachable.
    ///
    /// The window's `host_base` is ignored; the returned segment carries
    /// the backend's own.
    ///
    /// # Errors
    ///
    /// Returns error if the memory cannot be mapped or reserved.
    fn alloc(&mut self, window: ExtWindow) -> Result<MemSegment>;

    /// Write `data` at `offset` of `target`; returns bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if the range is not reachable or the transfer fails.
    fn write_bytes(&mut self, target: Target<'_>, offset: u32, data: &[u8]) -> Result<usize>;

    /// Read into `buf` from `offset` of `target`; returns bytes read.
    ///
    /// # Errors
    ///
    /// Returns error if the range is not reachable or the transfer fails.
    fn read_bytes(&mut self, target: Target<'_>, offset: u32, buf: &mut [u8]) -> Result<usize>;

    /// Write one little-endian word.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or is short.
    fn write_word(&mut self, target: Target<'_>, offset: u32, value: u32) -> Result<()> {
        let what = target.describe();
        let n = self.write_bytes(target, offset, &value.to_le_bytes())?;
        if n != 4 {
            return Err(HalError::transfer_failed(format!(
                "short word write to {what} at {offset:#x}: {n} of 4 bytes"
            )));
        }
        Ok(())
    }

    /// Read one little-endian word.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails or is short.
    fn read_word(&mut self, target: Target<'_>, offset: u32) -> Result<u32> {
        let what = target.describe();
        let mut buf = [0u8; 4];
        let n = self.read_bytes(target, offset, &mut buf)?;
        if n != 4 {
            return Err(HalError::transfer_failed(format!(
                "short word read from {what} at {offset:#x}: {n} of 4 bytes"
            )));
        }
        Ok(u32::from_le_bytes(buf))
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Memory-mapped device file
    Direct,

    /// In-process memory model
    Simulator,

    /// Ranked team transport
    Pal,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "Direct"),
            Self::Simulator => write!(f, "Simulator"),
            Self::Pal => write!(f, "PAL"),
        }
    }
}

/// Backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendSelection {
    /// Memory-mapped hardware
    #[default]
    Direct,

    /// In-process simulator, no hardware required
    Simulator,

    /// Ranked team transport (in-process team)
    Pal,
}

impl FromStr for BackendSelection {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "native" | "hw" => Ok(Self::Direct),
            "sim" | "simulator" | "esim" => Ok(Self::Simulator),
            "pal" => Ok(Self::Pal),
            other => Err(HalError::config(format!(
                "unknown backend '{other}' (expected direct, sim or pal)"
            ))),
        }
    }
}

impl BackendSelection {
    /// Selection from `EHAL_TARGET`; direct hardware if unset.
    ///
    /// # Errors
    ///
    /// Returns error if the variable holds an unknown backend name.
    pub fn from_env() -> Result<Self> {
        std::env::var(TARGET_ENV).map_or(Ok(Self::Direct), |v| v.parse())
    }
}

/// Construct the selected backend
///
/// `device` overrides the device file for the direct backend.
///
/// # Errors
///
/// Returns error if the backend cannot be initialized.
pub fn select_backend(
    selection: BackendSelection,
    platform: &Platform,
    device: Option<&Path>,
) -> Result<Box<dyn Backend>> {
    use crate::backends::direct::DirectBackend;
    use crate::backends::pal::{MemoryTeam, PalBackend};
    use crate::backends::simulator::SimulatorBackend;

    match selection {
        BackendSelection::Direct => {
            DirectBackend::open(device).map(|b| Box::new(b) as Box<dyn Backend>)
        }

        BackendSelection::Simulator => {
            tracing::info!("Using simulator backend");
            Ok(Box::new(SimulatorBackend::new(platform)))
        }

        BackendSelection::Pal => {
            tracing::info!("Using PAL backend with in-process team");
            Ok(Box::new(PalBackend::new(MemoryTeam::for_platform(platform))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_names() {
        assert_eq!("direct".parse::<BackendSelection>().unwrap(), BackendSelection::Direct);
        assert_eq!("HW".parse::<BackendSelection>().unwrap(), BackendSelection::Direct);
        assert_eq!("esim".parse::<BackendSelection>().unwrap(), BackendSelection::Simulator);
        assert_eq!(" pal ".parse::<BackendSelection>().unwrap(), BackendSelection::Pal);
        assert!("fpga".parse::<BackendSelection>().is_err());
    }

    #[test]
    fn software_backends_construct() {
        let platform = Platform::parallella16();
        let sim = select_backend(BackendSelection::Simulator, &platform, None).unwrap();
        assert_eq!(sim.backend_type(), BackendType::Simulator);
        let pal = select_backend(BackendSelection::Pal, &platform, None).unwrap();
        assert_eq!(pal.backend_type(), BackendType::Pal);
    }
}
