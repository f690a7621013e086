// SPDX-License-Identifier: AGPL-3.0-only

//! External memory segments
//!
//! A [`MemSegment`] is a slice of the platform's shared DRAM window,
//! allocated through a backend. It records both physical bases (host side
//! and device side) and the host-process base, and owns whatever the
//! backend needed to reach the memory. Dropping it releases that.

use crate::backends::mmap::MmapRegion;
use epiphany_chip::addr::{translate_external, ExtWindow};

/// Backend-private part of a memory segment
#[derive(Debug)]
pub enum SegmentHandle {
    /// Host mapping of the segment (direct backend); unmapped on drop.
    Mapped(MmapRegion),
    /// Memory owned by the backend itself and addressed by device address.
    Store,
}

/// An allocated external memory segment
#[derive(Debug)]
pub struct MemSegment {
    window: ExtWindow,
    handle: SegmentHandle,
}

impl MemSegment {
    /// Wrap a window and the backend handle that reaches it.
    pub const fn new(window: ExtWindow, handle: SegmentHandle) -> Self {
        Self { window, handle }
    }

    /// Address translation parameters.
    pub const fn window(&self) -> &ExtWindow {
        &self.window
    }

    /// Host-side physical base.
    pub const fn phy_base(&self) -> u32 {
        self.window.phy_base
    }

    /// Device-side physical base: the address cores use.
    pub const fn ephy_base(&self) -> u32 {
        self.window.ephy_base
    }

    /// Size in bytes.
    pub const fn size(&self) -> u32 {
        self.window.size
    }

    /// Host process address of the first byte.
    pub const fn host_base(&self) -> u64 {
        self.window.host_base
    }

    /// Host process address of device address `addr`, if inside.
    pub const fn host_addr(&self, addr: u32, len: u32) -> Option<u64> {
        translate_external(addr, len, &self.window)
    }

    /// Backend handle.
    pub const fn handle(&self) -> &SegmentHandle {
        &self.handle
    }

    /// Backend handle, mutably.
    pub fn handle_mut(&mut self) -> &mut SegmentHandle {
        &mut self.handle
    }
}

impl Drop for MemSegment {
    fn drop(&mut self) {
        tracing::debug!(
            "Releasing external segment {:#010x}+{:#x}",
            self.window.ephy_base,
            self.window.size
        );
    }
}
