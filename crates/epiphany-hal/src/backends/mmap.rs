// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-mapped physical window abstraction
//!
//! One `MmapRegion` maps one window of the physical address space (a core's
//! SRAM, a core's register file, or a slice of shared DRAM) through the
//! Epiphany device file. Physical addresses need not be page aligned: the
//! mapping is widened down to the page boundary and the region exposes only
//! the requested bytes.
//!
//! Unsafe is confined to this file: the mmap/munmap pair and the raw copies.
//! Every access is bounds-checked against the window first.

use crate::error::{HalError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// Memory-mapped physical window
///
/// Unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    /// Start of the whole (page-aligned) mapping
    map: NonNull<u8>,
    map_len: usize,
    /// Offset of the requested physical address inside the mapping
    skew: usize,
    size: usize,
    phys: u64,
}

impl MmapRegion {
    /// Map `size` bytes of physical memory starting at `phys`.
    ///
    /// # Errors
    ///
    /// Returns error if the size is zero or the mmap call fails.
    ///
    /// # Panics
    ///
    /// Panics if `rustix::mm::mmap` returns a null pointer on success
    /// (never happens per the rustix API contract).
    pub fn new(file: &File, phys: u64, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(HalError::resource(format!(
                "Zero-sized mapping requested at {phys:#x}"
            )));
        }

        let page = rustix::param::page_size() as u64;
        let aligned = phys & !(page - 1);
        // Bounded by the page size.
        #[allow(clippy::cast_possible_truncation)]
        let skew = (phys - aligned) as usize;
        let map_len = size + skew;

        tracing::debug!("Mapping {size:#x} bytes at phys {phys:#x} (page {aligned:#x})");

        // SAFETY: mmap with a null hint creates a fresh mapping:
        // - file is an open, readable and writable device fd
        // - map_len is non-zero (size checked above)
        // - aligned is page aligned, as mmap requires of the offset
        // - MAP_SHARED so writes reach device memory rather than a private copy
        // - the mapping is unmapped exactly once, in Drop
        let map = unsafe {
            let addr = mmap(
                std::ptr::null_mut(),
                map_len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                aligned,
            )
            .map_err(|e| HalError::resource(format!("mmap of {phys:#x}+{size:#x} failed: {e}")))?;

            NonNull::new(addr.cast::<u8>())
                .expect("rustix mmap returns non-null pointer on success")
        };

        tracing::trace!("Mapped phys {phys:#x} at {map:p}+{skew:#x}");

        Ok(Self {
            map,
            map_len,
            skew,
            size,
            phys,
        })
    }

    fn check(&self, offset: usize, len: usize, op: &str) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.size) {
            return Err(HalError::transfer_failed(format!(
                "Out of bounds {op}: offset={offset:#x}, size={len:#x}, limit={:#x} (phys {:#x})",
                self.size, self.phys
            )));
        }
        Ok(())
    }

    fn data(&self) -> *mut u8 {
        // SAFETY: skew < page size <= map_len, so the result stays inside
        // the mapping.
        unsafe { self.map.as_ptr().add(self.skew) }
    }

    /// Read a 32-bit register at offset
    ///
    /// # Errors
    ///
    /// Returns error if offset is out of bounds
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4, "read")?;

        // SAFETY: volatile read of a device register.
        // - bounds validated above: offset + 4 <= size
        // - register offsets are 4-byte aligned and the window base is
        //   page aligned plus a 4-byte aligned skew
        // - volatile: the hardware may change the value between reads
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.data().add(offset).cast::<u32>().read_volatile() };

        tracing::trace!("Read u32 @ {:#x} = {value:#x}", self.phys + offset as u64);
        Ok(value)
    }

    /// Write a 32-bit register at offset
    ///
    /// # Errors
    ///
    /// Returns error if offset is out of bounds
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4, "write")?;

        tracing::trace!("Write u32 @ {:#x} = {value:#x}", self.phys + offset as u64);

        // SAFETY: volatile write to a device register.
        // - bounds validated above: offset + 4 <= size
        // - 4-byte aligned (see read_u32)
        // - volatile: register writes have side effects and must not be
        //   merged or reordered by the compiler
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.data().add(offset).cast::<u32>().write_volatile(value);
        }

        Ok(())
    }

    /// Read bytes at offset
    ///
    /// # Errors
    ///
    /// Returns error if read would exceed bounds
    pub fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        self.check(offset, buffer.len(), "read")?;

        // SAFETY: copy_nonoverlapping requires valid, non-overlapping ranges:
        // - src: offset + len <= size, inside the mapping
        // - dst: a live mutable slice of exactly len bytes
        // - the user buffer cannot alias device memory
        // - u8 has alignment 1
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.data().add(offset),
                buffer.as_mut_ptr(),
                buffer.len(),
            );
        }

        Ok(())
    }

    /// Write bytes at offset
    ///
    /// # Errors
    ///
    /// Returns error if write would exceed bounds
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len(), "write")?;

        // SAFETY: as read_bytes, with source and destination swapped.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.data().add(offset), data.len());
        }

        Ok(())
    }

    /// Host process address of the first requested byte
    pub fn host_addr(&self) -> u64 {
        self.data() as u64
    }

    /// Physical address of the first byte
    pub const fn phys(&self) -> u64 {
        self.phys
    }

    /// Region size
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping phys {:#x} ({:#x} bytes)", self.phys, self.size);

        // SAFETY: map/map_len are exactly what mmap returned and was given
        // in new(); Drop runs once, so the mapping is still live.
        unsafe {
            if let Err(e) = munmap(self.map.as_ptr().cast(), self.map_len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: MmapRegion exclusively owns its mapping; no other in-process
// reference exists, and a mapping stays valid when moved between threads.
unsafe impl Send for MmapRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(len: usize) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file
    }

    #[test]
    fn maps_file_backed_window() {
        let file = scratch_file(0x3000);
        let page = rustix::param::page_size() as u64;

        let mut region = MmapRegion::new(&file, page + 0x10, 0x100).unwrap();
        assert_eq!(region.size(), 0x100);
        assert_eq!(region.phys(), page + 0x10);

        region.write_bytes(0, &[1, 2, 3, 4]).unwrap();
        region.write_u32(8, 0xDEAD_BEEF).unwrap();

        let mut out = [0u8; 4];
        region.read_bytes(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(region.read_u32(8).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn bounds_are_enforced() {
        let file = scratch_file(0x1000);
        let mut region = MmapRegion::new(&file, 0, 0x20).unwrap();

        assert!(region.write_bytes(0x1C, &[0; 5]).is_err());
        assert!(region.read_u32(0x1D).is_err());
        assert!(region.write_u32(0x1C, 0).is_ok());
        assert!(region.read_bytes(usize::MAX, &mut [0; 2]).is_err());
    }

    #[test]
    fn zero_size_is_rejected() {
        let file = scratch_file(0x1000);
        assert!(MmapRegion::new(&file, 0, 0).is_err());
    }
}
