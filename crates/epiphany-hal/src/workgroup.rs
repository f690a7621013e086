// SPDX-License-Identifier: AGPL-3.0-only

//! Workgroup descriptors
//!
//! A workgroup is a rectangle of cores opened as a unit. Operations on a
//! group take coordinates relative to its origin; the descriptor turns them
//! into absolute core IDs.

use crate::error::{HalError, Result};
use epiphany_chip::{ChipType, CoreId, MeshRect};

/// An open rectangle of cores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workgroup {
    base: CoreId,
    rect: MeshRect,
    chip_type: ChipType,
}

impl Workgroup {
    /// Describe the `rect` (absolute coordinates) of a platform built from
    /// `chip_type` chips.
    pub const fn new(rect: MeshRect, chip_type: ChipType) -> Self {
        Self {
            base: CoreId::from_coords(rect.row, rect.col),
            rect,
            chip_type,
        }
    }

    /// Core ID of the group's first core.
    pub const fn base(&self) -> CoreId {
        self.base
    }

    /// Absolute row of the group origin.
    pub const fn row(&self) -> u32 {
        self.rect.row
    }

    /// Absolute column of the group origin.
    pub const fn col(&self) -> u32 {
        self.rect.col
    }

    /// Rows in the group.
    pub const fn rows(&self) -> u32 {
        self.rect.rows
    }

    /// Columns in the group.
    pub const fn cols(&self) -> u32 {
        self.rect.cols
    }

    /// Chip type.
    pub const fn chip_type(&self) -> ChipType {
        self.chip_type
    }

    /// Absolute rectangle.
    pub const fn rect(&self) -> MeshRect {
        self.rect
    }

    /// True if group-relative `(row, col)` is in the group.
    pub const fn contains(&self, row: u32, col: u32) -> bool {
        row < self.rect.rows && col < self.rect.cols
    }

    /// Core ID of group-relative `(row, col)`.
    ///
    /// # Errors
    ///
    /// Returns error if the core is not in the group.
    pub fn core_id(&self, row: u32, col: u32) -> Result<CoreId> {
        if !self.contains(row, col) {
            return Err(HalError::invalid_group(format!(
                "core ({row},{col}) outside {}×{} group at ({},{})",
                self.rect.rows, self.rect.cols, self.rect.row, self.rect.col
            )));
        }
        Ok(self.base.offset(row, col))
    }

    /// Validate a group-relative sub-rectangle.
    ///
    /// # Errors
    ///
    /// Returns error if the rectangle is empty or not inside the group.
    pub fn sub_rect(&self, row: u32, col: u32, rows: u32, cols: u32) -> Result<MeshRect> {
        let sub = MeshRect::new(row, col, rows, cols);
        let whole = MeshRect::new(0, 0, self.rect.rows, self.rect.cols);
        if !whole.encloses(&sub) {
            return Err(HalError::invalid_group(format!(
                "{rows}×{cols} cores at ({row},{col}) not inside {}×{} group",
                self.rect.rows, self.rect.cols
            )));
        }
        Ok(sub)
    }

    /// Absolute core IDs in row-major order.
    pub fn core_ids(&self) -> impl Iterator<Item = CoreId> + '_ {
        self.rect
            .iter_row_major()
            .map(move |(r, c)| self.base.offset(r, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Workgroup {
        Workgroup::new(MeshRect::new(33, 9, 2, 3), ChipType::E16G301)
    }

    #[test]
    fn base_and_core_ids() {
        let g = group();
        assert_eq!(g.base(), CoreId::from_coords(33, 9));
        assert_eq!(g.core_id(1, 2).unwrap().coords(), (34, 11));
        assert!(g.core_id(2, 0).is_err());
        let ids: Vec<_> = g.core_ids().map(CoreId::coords).collect();
        assert_eq!(ids[..4], [(33, 9), (33, 10), (33, 11), (34, 9)]);
    }

    #[test]
    fn sub_rect_validation() {
        let g = group();
        assert!(g.sub_rect(0, 0, 2, 3).is_ok());
        assert!(g.sub_rect(1, 1, 1, 2).is_ok());
        assert!(g.sub_rect(1, 1, 2, 1).is_err());
        assert!(g.sub_rect(0, 0, 0, 1).is_err());
    }
}
