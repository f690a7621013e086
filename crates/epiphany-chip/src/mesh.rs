// SPDX-License-Identifier: AGPL-3.0-only

//! Chip types and mesh rectangles.
//!
//! A platform is one or more chips tiled into a single 64×64 coordinate
//! space. Each chip, and each workgroup opened on it, is an axis-aligned
//! rectangle of cores. Every multi-core operation in the host library walks
//! these rectangles in **row-major** order: ascending row, then ascending
//! column. Loaded programs that synchronise across cores rely on that
//! order being stable.

use std::fmt;

/// Epiphany chip variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipType {
    /// 16-core E16G301 (4×4).
    E16G301,
    /// 64-core E64G401 (8×8).
    E64G401,
}

impl ChipType {
    /// Value stored in the in-core group configuration block.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::E16G301 => 0,
            Self::E64G401 => 1,
        }
    }

    /// Rows of cores on one chip.
    #[must_use]
    pub const fn rows(self) -> u32 {
        match self {
            Self::E16G301 => 4,
            Self::E64G401 => 8,
        }
    }

    /// Columns of cores on one chip.
    #[must_use]
    pub const fn cols(self) -> u32 {
        self.rows()
    }

    /// Parse the name used in platform description files.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "E16G301" => Some(Self::E16G301),
            "E64G401" => Some(Self::E64G401),
            _ => None,
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::E16G301 => write!(f, "E16G301"),
            Self::E64G401 => write!(f, "E64G401"),
        }
    }
}

/// An axis-aligned rectangle of cores in absolute mesh coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshRect {
    /// First row.
    pub row: u32,
    /// First column.
    pub col: u32,
    /// Number of rows.
    pub rows: u32,
    /// Number of columns.
    pub cols: u32,
}

impl MeshRect {
    /// Rectangle with origin `(row, col)` spanning `rows × cols` cores.
    #[must_use]
    pub const fn new(row: u32, col: u32, rows: u32, cols: u32) -> Self {
        Self { row, col, rows, cols }
    }

    /// True if absolute `(row, col)` lies inside.
    #[must_use]
    pub const fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.row
            && row - self.row < self.rows
            && col >= self.col
            && col - self.col < self.cols
    }

    /// True if `other` lies entirely inside this rectangle.
    #[must_use]
    pub const fn encloses(&self, other: &Self) -> bool {
        if other.is_empty() {
            return false;
        }
        match (
            other.row.checked_add(other.rows - 1),
            other.col.checked_add(other.cols - 1),
        ) {
            (Some(last_row), Some(last_col)) => {
                self.contains(other.row, other.col) && self.contains(last_row, last_col)
            }
            _ => false,
        }
    }

    /// Number of cores, saturating at `u32::MAX`.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.rows.saturating_mul(self.cols)
    }

    /// True for a zero-area rectangle.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Relative `(row, col)` pairs in row-major order.
    pub fn iter_row_major(&self) -> impl Iterator<Item = (u32, u32)> {
        let cols = self.cols;
        (0..self.rows).flat_map(move |r| (0..cols).map(move |c| (r, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_geometry() {
        assert_eq!(ChipType::E16G301.rows() * ChipType::E16G301.cols(), 16);
        assert_eq!(ChipType::E64G401.rows() * ChipType::E64G401.cols(), 64);
        assert_eq!(ChipType::from_name("E64G401"), Some(ChipType::E64G401));
        assert_eq!(ChipType::from_name("E4"), None);
    }

    #[test]
    fn rect_containment() {
        let chip = MeshRect::new(32, 8, 4, 4);
        assert!(chip.contains(32, 8));
        assert!(chip.contains(35, 11));
        assert!(!chip.contains(36, 8));
        assert!(!chip.contains(31, 8));
        assert!(chip.encloses(&MeshRect::new(33, 9, 2, 3)));
        assert!(!chip.encloses(&MeshRect::new(34, 9, 3, 1)));
        assert!(!chip.encloses(&MeshRect::new(32, 8, 0, 1)));
    }

    #[test]
    fn huge_rectangles_do_not_overflow() {
        let group = MeshRect::new(0, 0, 4, 4);
        assert!(!group.encloses(&MeshRect::new(1, 1, u32::MAX, 1)));
        assert!(!group.encloses(&MeshRect::new(u32::MAX, 0, 2, 1)));
        assert_eq!(MeshRect::new(0, 0, u32::MAX, 2).len(), u32::MAX);
    }

    #[test]
    fn row_major_order() {
        let order: Vec<_> = MeshRect::new(0, 0, 2, 3).iter_row_major().collect();
        assert_eq!(order, [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
    }
}
