// SPDX-License-Identifier: AGPL-3.0-only

//! Platform description
//!
//! Which chips sit where in the mesh coordinate space, and where the shared
//! DRAM windows are on both sides of the bus. Read from a text platform
//! description file ("HDF") named by `EPIPHANY_HDF`, or taken from one of
//! the Parallella presets.
//!
//! # HDF text format
//!
//! ```text
//! // Parallella-16
//! PLATFORM_VERSION    PARALLELLA1601
//! ESYS_REGS_BASE      0x808f0000
//! NUM_CHIPS           1
//! CHIP                E16G301
//! CHIP_ROW            32
//! CHIP_COL            8
//! NUM_EXT_MEMS        1
//! EMEM                ext0
//! EMEM_BASE_ADDRESS   0x3e000000
//! EMEM_EPI_BASE       0x8e000000
//! EMEM_SIZE           0x02000000
//! EMEM_TYPE           RDWR
//! ```
//!
//! `CHIP_*` keys apply to the most recent `CHIP`, `EMEM_*` keys to the most
//! recent `EMEM`.

use crate::error::{HalError, Result};
use epiphany_chip::addr::MESH_SPAN;
use epiphany_chip::layout::parallella;
use epiphany_chip::{AddrClass, ChipType, ExtWindow, MeshRect};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming the platform description file.
pub const HDF_ENV: &str = "EPIPHANY_HDF";

/// One chip of the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipDesc {
    /// Chip variant
    pub chip_type: ChipType,
    /// Mesh row of the chip's first core
    pub row: u32,
    /// Mesh column of the chip's first core
    pub col: u32,
}

impl ChipDesc {
    /// The chip's cores as a mesh rectangle.
    pub const fn rect(&self) -> MeshRect {
        MeshRect::new(
            self.row,
            self.col,
            self.chip_type.rows(),
            self.chip_type.cols(),
        )
    }
}

/// Access permitted on an external memory window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmemAccess {
    /// Read and write
    ReadWrite,
    /// Read only
    ReadOnly,
    /// Write only
    WriteOnly,
}

impl EmemAccess {
    /// True unless the memory is write-only.
    pub const fn is_readable(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    /// True unless the memory is read-only.
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// One shared DRAM window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtMemDesc {
    /// Name from the description file
    pub name: String,
    /// Host-side physical base
    pub phy_base: u32,
    /// Device-side physical base
    pub ephy_base: u32,
    /// Size in bytes
    pub size: u32,
    /// Permitted access
    pub access: EmemAccess,
}

impl ExtMemDesc {
    /// Translation window for `[offset, offset + size)` of this memory,
    /// before it has a host mapping.
    ///
    /// # Errors
    ///
    /// Returns error if the range is not inside the memory, or if either
    /// base plus `offset` does not fit 32 bits.
    pub fn window(&self, offset: u32, size: u32) -> Result<ExtWindow> {
        let out_of_range = || {
            HalError::address_range(
                self.ephy_base.wrapping_add(offset),
                size,
                format!("external memory '{}' ({:#x} bytes)", self.name, self.size),
            )
        };
        if u64::from(offset) + u64::from(size) > u64::from(self.size) || size == 0 {
            return Err(out_of_range());
        }
        Ok(ExtWindow {
            phy_base: self.phy_base.checked_add(offset).ok_or_else(out_of_range)?,
            ephy_base: self.ephy_base.checked_add(offset).ok_or_else(out_of_range)?,
            size,
            host_base: 0,
        })
    }
}

/// Everything the HAL needs to know about the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Platform version string
    pub version: String,
    /// E-link system register base, if the board has one
    pub esys_regs_base: Option<u32>,
    /// Chips in the mesh
    pub chips: Vec<ChipDesc>,
    /// Shared DRAM windows
    pub emems: Vec<ExtMemDesc>,
}

impl Platform {
    fn parallella(version: &str, chip_type: ChipType) -> Self {
        Self {
            version: version.to_string(),
            esys_regs_base: Some(parallella::ESYS_REGS_BASE),
            chips: vec![ChipDesc {
                chip_type,
                row: parallella::CHIP_ROW,
                col: parallella::CHIP_COL,
            }],
            emems: vec![ExtMemDesc {
                name: "ext0".to_string(),
                phy_base: parallella::EMEM_PHY_BASE,
                ephy_base: parallella::EMEM_EPHY_BASE,
                size: parallella::EMEM_SIZE,
                access: EmemAccess::ReadWrite,
            }],
        }
    }

    /// 16-core Parallella board.
    pub fn parallella16() -> Self {
        Self::parallella("PARALLELLA1601", ChipType::E16G301)
    }

    /// 64-core Parallella board.
    pub fn parallella64() -> Self {
        Self::parallella("PARALLELLA6401", ChipType::E64G401)
    }

    /// Platform from `EPIPHANY_HDF`, or the 16-core Parallella if unset.
    ///
    /// # Errors
    ///
    /// Returns error if the named file cannot be read or parsed.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(HDF_ENV) {
            Some(path) => Self::from_hdf_file(Path::new(&path)),
            None => {
                debug!("{HDF_ENV} not set, assuming Parallella-16");
                Ok(Self::parallella16())
            }
        }
    }

    /// Parse a description file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_hdf_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| HalError::io(path, e))?;
        let platform = Self::from_hdf_str(&text)?;
        info!(
            "Platform {} from {}: {} chip(s), {} external memor{}",
            platform.version,
            path.display(),
            platform.chips.len(),
            platform.emems.len(),
            if platform.emems.len() == 1 { "y" } else { "ies" }
        );
        Ok(platform)
    }

    /// Parse description text.
    ///
    /// # Errors
    ///
    /// Returns error on unknown keys, malformed numbers, keys out of order,
    /// or declared counts that do not match.
    pub fn from_hdf_str(text: &str) -> Result<Self> {
        let mut version = String::new();
        let mut esys_regs_base = None;
        let mut chips: Vec<ChipDesc> = Vec::new();
        let mut emems: Vec<ExtMemDesc> = Vec::new();
        let mut num_chips = None;
        let mut num_emems = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split("//").next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let lineno = lineno + 1;
            let mut words = line.split_whitespace();
            let key = words.next().unwrap_or_default();
            let value = words.next().ok_or_else(|| {
                HalError::config(format!("line {lineno}: '{key}' has no value"))
            })?;

            match key {
                "PLATFORM_VERSION" => version = value.to_string(),
                "ESYS_REGS_BASE" => esys_regs_base = Some(parse_number(value, lineno)?),
                "NUM_CHIPS" => num_chips = Some(parse_number(value, lineno)?),
                "NUM_EXT_MEMS" => num_emems = Some(parse_number(value, lineno)?),
                "CHIP" => {
                    let chip_type = ChipType::from_name(value).ok_or_else(|| {
                        HalError::config(format!("line {lineno}: unknown chip '{value}'"))
                    })?;
                    chips.push(ChipDesc {
                        chip_type,
                        row: 0,
                        col: 0,
                    });
                }
                "CHIP_ROW" => last(&mut chips, lineno, key, "CHIP")?.row = parse_number(value, lineno)?,
                "CHIP_COL" => last(&mut chips, lineno, key, "CHIP")?.col = parse_number(value, lineno)?,
                "EMEM" => emems.push(ExtMemDesc {
                    name: value.to_string(),
                    phy_base: 0,
                    ephy_base: 0,
                    size: 0,
                    access: EmemAccess::ReadWrite,
                }),
                "EMEM_BASE_ADDRESS" => {
                    last(&mut emems, lineno, key, "EMEM")?.phy_base = parse_number(value, lineno)?;
                }
                "EMEM_EPI_BASE" => {
                    last(&mut emems, lineno, key, "EMEM")?.ephy_base = parse_number(value, lineno)?;
                }
                "EMEM_SIZE" => {
                    last(&mut emems, lineno, key, "EMEM")?.size = parse_number(value, lineno)?;
                }
                "EMEM_TYPE" => {
                    last(&mut emems, lineno, key, "EMEM")?.access = match value {
                        "RDWR" => EmemAccess::ReadWrite,
                        "RD" => EmemAccess::ReadOnly,
                        "WR" => EmemAccess::WriteOnly,
                        other => {
                            return Err(HalError::config(format!(
                                "line {lineno}: unknown EMEM_TYPE '{other}'"
                            )))
                        }
                    };
                }
                other => {
                    return Err(HalError::config(format!(
                        "line {lineno}: unknown key '{other}'"
                    )))
                }
            }
        }

        if chips.is_empty() {
            return Err(HalError::config("platform declares no chips"));
        }
        if let Some(chip) = chips.iter().find(|c| {
            let rect = c.rect();
            u64::from(rect.row) + u64::from(rect.rows) > u64::from(MESH_SPAN)
                || u64::from(rect.col) + u64::from(rect.cols) > u64::from(MESH_SPAN)
        }) {
            return Err(HalError::config(format!(
                "{} at ({},{}) does not fit the {MESH_SPAN}×{MESH_SPAN} mesh",
                chip.chip_type, chip.row, chip.col
            )));
        }
        check_count("NUM_CHIPS", num_chips, chips.len())?;
        check_count("NUM_EXT_MEMS", num_emems, emems.len())?;

        Ok(Self {
            version,
            esys_regs_base,
            chips,
            emems,
        })
    }

    /// Chip rectangles, for address classification.
    pub fn chip_rects(&self) -> Vec<MeshRect> {
        self.chips.iter().map(ChipDesc::rect).collect()
    }

    /// The chip containing absolute `(row, col)`.
    pub fn chip_at(&self, row: u32, col: u32) -> Option<&ChipDesc> {
        self.chips.iter().find(|c| c.rect().contains(row, col))
    }

    /// Mesh row of the platform origin (first chip).
    pub fn row(&self) -> u32 {
        self.chips.first().map_or(0, |c| c.row)
    }

    /// Mesh column of the platform origin (first chip).
    pub fn col(&self) -> u32 {
        self.chips.first().map_or(0, |c| c.col)
    }

    /// Chip type of the first chip.
    pub fn chip_type(&self) -> ChipType {
        self.chips.first().map_or(ChipType::E16G301, |c| c.chip_type)
    }

    /// The primary shared DRAM window.
    ///
    /// # Errors
    ///
    /// Returns error if the platform has no external memory.
    pub fn emem(&self) -> Result<&ExtMemDesc> {
        self.emems
            .first()
            .ok_or_else(|| HalError::resource("platform has no external memory"))
    }

    /// Classify a raw address against this platform's chips.
    pub fn classify(&self, addr: u32) -> AddrClass {
        epiphany_chip::addr::classify(addr, &self.chip_rects())
    }

    /// The external memory whose device-side window holds `[addr, addr + len)`.
    pub fn emem_for(&self, addr: u32, len: u32) -> Option<&ExtMemDesc> {
        self.emems.iter().find(|m| {
            u64::from(addr) >= u64::from(m.ephy_base)
                && u64::from(addr) + u64::from(len) <= u64::from(m.ephy_base) + u64::from(m.size)
        })
    }
}

/// Most recent `section` entry, for the keys that qualify it.
fn last<'v, T>(
    items: &'v mut Vec<T>,
    lineno: usize,
    key: &str,
    section: &str,
) -> Result<&'v mut T> {
    items
        .last_mut()
        .ok_or_else(|| HalError::config(format!("line {lineno}: '{key}' before any {section}")))
}

fn parse_number(value: &str, lineno: usize) -> Result<u32> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| HalError::config(format!("line {lineno}: bad number '{value}': {e}")))
}

fn check_count(key: &str, declared: Option<u32>, found: usize) -> Result<()> {
    match declared {
        Some(n) if n as usize != found => Err(HalError::config(format!(
            "{key} is {n} but {found} declared"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARALLELLA_HDF: &str = "\
// Parallella-16
PLATFORM_VERSION    PARALLELLA1601
ESYS_REGS_BASE      0x808f0000
NUM_CHIPS           1
CHIP                E16G301
CHIP_ROW            32
CHIP_COL            8
NUM_EXT_MEMS        1
EMEM                ext0
EMEM_BASE_ADDRESS   0x3e000000
EMEM_EPI_BASE       0x8e000000
EMEM_SIZE           0x02000000
EMEM_TYPE           RDWR
";

    #[test]
    fn parses_parallella_description() {
        let platform = Platform::from_hdf_str(PARALLELLA_HDF).unwrap();
        assert_eq!(platform, Platform::parallella16());
        assert_eq!(platform.row(), 32);
        assert_eq!(platform.col(), 8);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = Platform::from_hdf_str("CHIP E16G301\nCHIP_DEPTH 3\n").unwrap_err();
        assert!(err.to_string().contains("CHIP_DEPTH"));
    }

    #[test]
    fn rejects_chip_key_before_chip() {
        assert!(Platform::from_hdf_str("CHIP_ROW 32\nCHIP E16G301\n").is_err());
    }

    #[test]
    fn rejects_chip_outside_mesh() {
        let err = Platform::from_hdf_str("CHIP E16G301\nCHIP_ROW 62\n").unwrap_err();
        assert!(err.to_string().contains("mesh"), "{err}");
        assert!(Platform::from_hdf_str("CHIP E16G301\nCHIP_COL 4294967295\n").is_err());
        assert!(Platform::from_hdf_str("CHIP E64G401\nCHIP_ROW 56\nCHIP_COL 56\n").is_ok());
    }

    #[test]
    fn rejects_count_mismatch() {
        let text = "NUM_CHIPS 2\nCHIP E16G301\n";
        assert!(Platform::from_hdf_str(text).is_err());
    }

    #[test]
    fn classify_and_emem_lookup() {
        let p = Platform::parallella16();
        assert_eq!(p.classify(0x8080_0000), AddrClass::OnChip { row: 32, col: 8 });
        assert_eq!(p.classify(0x8E00_0000), AddrClass::OffChip);
        assert!(p.emem_for(0x8E00_0000, 0x100).is_some());
        assert!(p.emem_for(0x8FFF_FFFF, 2).is_none());
    }

    #[test]
    fn parses_access_modes_and_qualified_keys() {
        let text = "\
CHIP E16G301
CHIP_ROW 0
CHIP_COL 0
EMEM rom
EMEM_BASE_ADDRESS 0x3e000000
EMEM_EPI_BASE 0x8e000000
EMEM_SIZE 0x1000
EMEM_TYPE RD
EMEM log
EMEM_EPI_BASE 0x8f000000
EMEM_SIZE 0x100
EMEM_TYPE WR
";
        let p = Platform::from_hdf_str(text).unwrap();
        assert_eq!((p.row(), p.col()), (0, 0));
        assert_eq!(p.emems.len(), 2);
        assert_eq!(p.emems[0].access, EmemAccess::ReadOnly);
        assert!(p.emems[0].access.is_readable());
        assert!(!p.emems[0].access.is_writable());
        assert_eq!(p.emems[1].ephy_base, 0x8F00_0000);
        assert!(!p.emems[1].access.is_readable());
        assert!(EmemAccess::ReadWrite.is_writable());
        assert!(Platform::from_hdf_str("CHIP E16G301\nEMEM_TYPE RD\n").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Platform::from_hdf_file(Path::new("/nonexistent/platform.hdf")).unwrap_err();
        assert!(matches!(err, HalError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/platform.hdf"));
    }

    #[test]
    fn window_base_overflow_is_rejected() {
        let emem = ExtMemDesc {
            name: "top".to_string(),
            phy_base: 0xFFFF_F000,
            ephy_base: 0x8E00_0000,
            size: 0x0010_0000,
            access: EmemAccess::ReadWrite,
        };
        assert!(emem.window(0, 0x100).is_ok());
        let err = emem.window(0x2000, 0x100).unwrap_err();
        assert!(matches!(err, HalError::AddressRange { .. }));
    }

    #[test]
    fn emem_window_bounds() {
        let p = Platform::parallella16();
        let emem = p.emem().unwrap();
        let w = emem.window(0x1000, 0x100).unwrap();
        assert_eq!(w.phy_base, 0x3E00_1000);
        assert_eq!(w.ephy_base, 0x8E00_1000);
        assert!(emem.window(0x01FF_FF00, 0x200).is_err());
        assert!(emem.window(0, 0).is_err());
    }
}
