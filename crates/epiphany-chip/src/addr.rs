// SPDX-License-Identifier: AGPL-3.0-only

//! Address translation between local, global and external address spaces.
//!
//! All arithmetic is unsigned 32-bit with intentional wraparound, matching
//! what the mesh routers do with the upper twelve address bits. The only
//! range check is the external-memory window membership in
//! [`translate_external`].

use crate::mesh::MeshRect;
use std::fmt;

/// Bits 20–31 of a global address carry the core ID.
pub const COREID_SHIFT: u32 = 20;

/// Mask selecting the core-ID bits of a 32-bit address.
pub const GLOBAL_MASK: u32 = 0xFFF0_0000;

/// Mask selecting the local offset bits of a 32-bit address.
pub const LOCAL_MASK: u32 = !GLOBAL_MASK;

/// Size of one core's local address space (1 MiB).
pub const LOCAL_SPACE_SIZE: u32 = 1 << COREID_SHIFT;

/// Row and column fields of a core ID are six bits each.
pub const COORD_BITS: u32 = 6;

/// Rows, and columns, of the whole mesh coordinate space.
pub const MESH_SPAN: u32 = 1 << COORD_BITS;

const COORD_MASK: u32 = (1 << COORD_BITS) - 1;
const COREID_MASK: u32 = (1 << (2 * COORD_BITS)) - 1;

/// Packed 12-bit core identifier: `(row << 6) | col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(u32);

impl CoreId {
    /// Pack absolute mesh coordinates. Coordinates are truncated to six bits.
    #[must_use]
    pub const fn from_coords(row: u32, col: u32) -> Self {
        Self(((row & COORD_MASK) << COORD_BITS) | (col & COORD_MASK))
    }

    /// Wrap a raw value, keeping the low twelve bits.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & COREID_MASK)
    }

    /// Raw 12-bit value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Absolute mesh row.
    #[must_use]
    pub const fn row(self) -> u32 {
        (self.0 >> COORD_BITS) & COORD_MASK
    }

    /// Absolute mesh column.
    #[must_use]
    pub const fn col(self) -> u32 {
        self.0 & COORD_MASK
    }

    /// `(row, col)` pair.
    #[must_use]
    pub const fn coords(self) -> (u32, u32) {
        (self.row(), self.col())
    }

    /// Core ID of the core `row` rows and `col` columns away from this one.
    ///
    /// This is plain integer addition on the packed value, so a column
    /// offset past 63 carries into the row field exactly as the hardware
    /// address adder does.
    #[must_use]
    pub const fn offset(self, row: u32, col: u32) -> Self {
        Self::from_raw(
            self.0
                .wrapping_add(row.wrapping_shl(COORD_BITS))
                .wrapping_add(col),
        )
    }

    /// Global address of local offset 0 on this core.
    #[must_use]
    pub const fn global_base(self) -> u32 {
        self.0 << COREID_SHIFT
    }

    /// Global address of `local` on this core.
    #[must_use]
    pub const fn global(self, local: u32) -> u32 {
        self.global_base() | (local & LOCAL_MASK)
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x} ({},{})", self.0, self.row(), self.col())
    }
}

/// Pack `(row, col)` into a core ID.
#[must_use]
pub const fn coreid_from_coords(row: u32, col: u32) -> CoreId {
    CoreId::from_coords(row, col)
}

/// Unpack a core ID into `(row, col)`.
#[must_use]
pub const fn coords_from_coreid(id: CoreId) -> (u32, u32) {
    id.coords()
}

/// True if `addr` carries no core ID (a core-relative address).
#[must_use]
pub const fn is_local(addr: u32) -> bool {
    addr & GLOBAL_MASK == 0
}

/// Split a global address into its core ID and local offset.
#[must_use]
pub const fn split_global(addr: u32) -> (CoreId, u32) {
    (CoreId::from_raw(addr >> COREID_SHIFT), addr & LOCAL_MASK)
}

/// Make `local` a global address for the core at `(row, col)` of a group
/// whose first core is `base`.
///
/// Addresses that already carry a core ID are returned unchanged.
#[must_use]
pub const fn to_global(base: CoreId, row: u32, col: u32, local: u32) -> u32 {
    if !is_local(local) {
        return local;
    }
    base.offset(row, col).global_base() | local
}

/// Which address space a raw 32-bit address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrClass {
    /// No core ID: relative to whichever core is being addressed.
    Local,
    /// Core ID of a core on one of the platform's chips.
    OnChip {
        /// Absolute mesh row.
        row: u32,
        /// Absolute mesh column.
        col: u32,
    },
    /// Core ID bits set but no such core: shared external memory.
    OffChip,
}

/// Classify `addr` against the chip rectangles of a platform.
#[must_use]
pub fn classify(addr: u32, chips: &[MeshRect]) -> AddrClass {
    if is_local(addr) {
        return AddrClass::Local;
    }
    let (id, _) = split_global(addr);
    let (row, col) = id.coords();
    if chips.iter().any(|chip| chip.contains(row, col)) {
        AddrClass::OnChip { row, col }
    } else {
        AddrClass::OffChip
    }
}

/// True if `addr` routes to a core on one of `chips`.
#[must_use]
pub fn is_on_chip(addr: u32, chips: &[MeshRect]) -> bool {
    matches!(classify(addr, chips), AddrClass::OnChip { .. })
}

/// An external-memory window as seen from both sides of the bus.
///
/// The host CPU and the mesh may see the same DRAM at different physical
/// addresses: `phy_base` is the host-physical base, `ephy_base` the
/// device-physical base cores use. `host_base` is where the window is
/// mapped in the host process (opaque: a pointer value for the direct
/// backend, a store offset for the simulator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtWindow {
    /// Host-side physical base address.
    pub phy_base: u32,
    /// Device-side physical base address.
    pub ephy_base: u32,
    /// Window size in bytes.
    pub size: u32,
    /// Host process address of `phy_base`.
    pub host_base: u64,
}

impl ExtWindow {
    /// True if `[addr, addr + len)` lies inside the device-side window.
    #[must_use]
    pub const fn contains(&self, addr: u32, len: u32) -> bool {
        let start = addr as u64;
        let base = self.ephy_base as u64;
        start >= base && start + len as u64 <= base + self.size as u64
    }

    /// Host-physical address of device-physical `addr`.
    #[must_use]
    pub const fn to_host_phys(&self, addr: u32) -> u32 {
        addr.wrapping_sub(self.ephy_base).wrapping_add(self.phy_base)
    }

    /// Byte offset of `addr` from the start of the window, if inside.
    #[must_use]
    pub const fn offset_of(&self, addr: u32, len: u32) -> Option<u32> {
        if self.contains(addr, len) {
            Some(addr - self.ephy_base)
        } else {
            None
        }
    }
}

/// Translate a device-side external address to a host process address.
///
/// Device-physical → host-physical → host-virtual. Returns `None` if any
/// byte of `[addr, addr + len)` falls outside the window.
#[must_use]
pub const fn translate_external(addr: u32, len: u32, window: &ExtWindow) -> Option<u64> {
    if !window.contains(addr, len) {
        return None;
    }
    let host_phys = window.to_host_phys(addr);
    Some((host_phys.wrapping_sub(window.phy_base) as u64).wrapping_add(window.host_base))
}
