// SPDX-License-Identifier: AGPL-3.0-only

//! In-core configuration block
//!
//! After loading a core the host writes two descriptors right after the
//! interrupt vector table, where the on-core runtime expects them:
//!
//! ```text
//! 0x28  GroupConfig   objtype=3, chip, group id/row/col/rows/cols, core row/col, pad
//! 0x50  EmemConfig    objtype=5, external memory device base
//! ```
//!
//! Both are plain little-endian word arrays.

use crate::error::{HalError, Result};
use crate::workgroup::Workgroup;
use bytemuck::{Pod, Zeroable};
use epiphany_chip::layout::{objtype, EMEM_CONFIG_SIZE, GROUP_CONFIG_SIZE};

/// Group descriptor seen by each core at local `0x28`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GroupConfig {
    /// Always [`objtype::GROUP`]
    pub objtype: u32,
    /// Chip type code
    pub chiptype: u32,
    /// Core ID of the group's first core
    pub group_id: u32,
    /// Absolute row of the group origin
    pub group_row: u32,
    /// Absolute column of the group origin
    pub group_col: u32,
    /// Rows in the group
    pub group_rows: u32,
    /// Columns in the group
    pub group_cols: u32,
    /// This core's row within the group
    pub core_row: u32,
    /// This core's column within the group
    pub core_col: u32,
    /// Padding to an 8-byte boundary
    pub alignment_padding: u32,
}

const _: () = assert!(std::mem::size_of::<GroupConfig>() == GROUP_CONFIG_SIZE as usize);

impl GroupConfig {
    /// Descriptor for group-relative core `(row, col)` of `group`.
    pub const fn new(group: &Workgroup, row: u32, col: u32) -> Self {
        Self {
            objtype: objtype::GROUP.to_le(),
            chiptype: group.chip_type().code().to_le(),
            group_id: group.base().raw().to_le(),
            group_row: group.row().to_le(),
            group_col: group.col().to_le(),
            group_rows: group.rows().to_le(),
            group_cols: group.cols().to_le(),
            core_row: row.to_le(),
            core_col: col.to_le(),
            alignment_padding: 0,
        }
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is not exactly one block or has the wrong
    /// object type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let block: Self = bytemuck::try_pod_read_unaligned(bytes).map_err(|e| {
            HalError::transfer_failed(format!("group config block of {} bytes: {e}", bytes.len()))
        })?;
        let block = block.le_to_native();
        if block.objtype != objtype::GROUP {
            return Err(HalError::transfer_failed(format!(
                "group config objtype {} (expected {})",
                block.objtype,
                objtype::GROUP
            )));
        }
        Ok(block)
    }

    const fn le_to_native(self) -> Self {
        Self {
            objtype: u32::from_le(self.objtype),
            chiptype: u32::from_le(self.chiptype),
            group_id: u32::from_le(self.group_id),
            group_row: u32::from_le(self.group_row),
            group_col: u32::from_le(self.group_col),
            group_rows: u32::from_le(self.group_rows),
            group_cols: u32::from_le(self.group_cols),
            core_row: u32::from_le(self.core_row),
            core_col: u32::from_le(self.core_col),
            alignment_padding: u32::from_le(self.alignment_padding),
        }
    }
}

/// External memory descriptor seen by each core at local `0x50`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct EmemConfig {
    /// Always [`objtype::EXT_MEM`]
    pub objtype: u32,
    /// Device-side base of the external memory
    pub base: u32,
}

const _: () = assert!(std::mem::size_of::<EmemConfig>() == EMEM_CONFIG_SIZE as usize);

impl EmemConfig {
    /// Descriptor for external memory at device address `base`.
    pub const fn new(base: u32) -> Self {
        Self {
            objtype: objtype::EXT_MEM.to_le(),
            base: base.to_le(),
        }
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is not exactly one block or has the wrong
    /// object type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let block: Self = bytemuck::try_pod_read_unaligned(bytes).map_err(|e| {
            HalError::transfer_failed(format!("emem config block of {} bytes: {e}", bytes.len()))
        })?;
        let block = Self {
            objtype: u32::from_le(block.objtype),
            base: u32::from_le(block.base),
        };
        if block.objtype != objtype::EXT_MEM {
            return Err(HalError::transfer_failed(format!(
                "emem config objtype {} (expected {})",
                block.objtype,
                objtype::EXT_MEM
            )));
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epiphany_chip::{ChipType, MeshRect};

    #[test]
    fn group_block_layout() {
        let group = Workgroup::new(MeshRect::new(32, 8, 2, 2), ChipType::E16G301);
        let block = GroupConfig::new(&group, 1, 0);
        let bytes = block.as_bytes();
        assert_eq!(bytes.len(), 40);

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words, [3, 0, 0x808, 32, 8, 2, 2, 1, 0, 0]);
        assert_eq!(GroupConfig::from_bytes(bytes).unwrap(), block);
    }

    #[test]
    fn e64_chip_code() {
        let group = Workgroup::new(MeshRect::new(32, 8, 8, 8), ChipType::E64G401);
        assert_eq!(GroupConfig::new(&group, 7, 7).chiptype, u32::to_le(1));
    }

    #[test]
    fn emem_block_layout() {
        let block = EmemConfig::new(0x8E00_0000);
        assert_eq!(block.as_bytes(), [5, 0, 0, 0, 0x00, 0x00, 0x00, 0x8E]);
        assert_eq!(EmemConfig::from_bytes(block.as_bytes()).unwrap().base, 0x8E00_0000);
    }

    #[test]
    fn rejects_wrong_objtype_or_size() {
        assert!(EmemConfig::from_bytes(&[3, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(GroupConfig::from_bytes(&[0; 12]).is_err());
    }
}
