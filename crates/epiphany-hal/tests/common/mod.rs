// SPDX-License-Identifier: AGPL-3.0-only

//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const EM_EPIPHANY: u16 = 0x1223;

/// One program-header entry: `(type, vaddr, payload, memsz)`.
pub type Entry<'a> = (u32, u32, &'a [u8], u32);

/// Little-endian ELF32 executable with the given program headers.
pub fn elf32_with(entries: &[Entry<'_>]) -> Vec<u8> {
    let mut data_off = EHDR_SIZE + entries.len() * PHDR_SIZE;

    let mut out = Vec::new();
    out.extend_from_slice(b"\x7fELF");
    out.extend_from_slice(&[1, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&EM_EPIPHANY.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&40u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    for &(kind, vaddr, payload, memsz) in entries {
        for word in [
            kind,
            data_off as u32,
            vaddr,
            vaddr,
            payload.len() as u32,
            memsz,
            7,
            4,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        data_off += payload.len();
    }
    for &(_, _, payload, _) in entries {
        out.extend_from_slice(payload);
    }
    out
}

/// ELF32 executable of `PT_LOAD` entries `(vaddr, payload, memsz)`.
pub fn elf32(segments: &[(u32, &[u8], u32)]) -> Vec<u8> {
    let entries: Vec<Entry<'_>> = segments
        .iter()
        .map(|&(vaddr, payload, memsz)| (PT_LOAD, vaddr, payload, memsz))
        .collect();
    elf32_with(&entries)
}

/// A `PT_NOTE` entry, which the loader must skip.
pub fn note(payload: &[u8]) -> Entry<'_> {
    (PT_NOTE, 0, payload, payload.len() as u32)
}

/// Write `bytes` to a temporary file.
pub fn image_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
