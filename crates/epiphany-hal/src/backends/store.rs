// SPDX-License-Identifier: AGPL-3.0-only

//! Sparse byte store for the software backends
//!
//! Pages are allocated on first write; unwritten bytes read as zero.

use std::collections::BTreeMap;

const PAGE_SIZE: u64 = 0x1000;

/// Sparse, page-granular byte store
#[derive(Debug, Default)]
pub struct SparseMemory {
    pages: BTreeMap<u64, Box<[u8]>>,
}

impl SparseMemory {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` to `addr`.
    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let (page, at) = (addr / PAGE_SIZE, (addr % PAGE_SIZE) as usize);
            let n = rest.len().min(PAGE_SIZE as usize - at);
            let buf = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
            buf[at..at + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            addr += n as u64;
        }
    }

    /// Copy from `addr` into `buf`.
    pub fn read(&self, addr: u64, buf: &mut [u8]) {
        let mut addr = addr;
        let mut rest = &mut buf[..];
        while !rest.is_empty() {
            let (page, at) = (addr / PAGE_SIZE, (addr % PAGE_SIZE) as usize);
            let n = rest.len().min(PAGE_SIZE as usize - at);
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n);
            match self.pages.get(&page) {
                Some(bytes) => head.copy_from_slice(&bytes[at..at + n]),
                None => head.fill(0),
            }
            rest = tail;
            addr += n as u64;
        }
    }

    /// Little-endian word at `addr`.
    pub fn read_u32(&self, addr: u64) -> u32 {
        let mut word = [0u8; 4];
        self.read(addr, &mut word);
        u32::from_le_bytes(word)
    }

    /// Store a little-endian word at `addr`.
    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }

    /// Number of allocated pages.
    #[cfg(test)]
    pub fn pages(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_reads_zero() {
        let mem = SparseMemory::new();
        let mut buf = [0xFFu8; 8];
        mem.read(0x8E00_0000, &mut buf);
        assert_eq!(buf, [0; 8]);
        assert_eq!(mem.pages(), 0);
    }

    #[test]
    fn writes_span_pages() {
        let mut mem = SparseMemory::new();
        let data: Vec<u8> = (0..32).collect();
        mem.write(PAGE_SIZE - 16, &data);
        assert_eq!(mem.pages(), 2);

        let mut out = [0u8; 32];
        mem.read(PAGE_SIZE - 16, &mut out);
        assert_eq!(out.as_slice(), data.as_slice());
    }
}
