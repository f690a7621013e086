// SPDX-License-Identifier: AGPL-3.0-only

//! Executable image parsing
//!
//! Reads an Epiphany executable into memory, checks its signature and
//! decodes the ELF header and program-header table. Nothing else in the
//! file is interpreted: no sections, no symbols, no relocations.
//!
//! The whole table is decoded and every entry's file range validated before
//! the caller sees any segment, so a bad image never causes a partial load.
//! Segment payloads are zero-copy slices of the file buffer.

use crate::error::ImageError;
use bytes::Bytes;
use goblin::container::Ctx;
use goblin::elf::header::{EI_CLASS, ELFCLASS32};
use goblin::elf::program_header::{ProgramHeader, PT_LOAD};
use goblin::elf::Elf;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// ELF signature.
pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

/// Motorola S-record header record signature.
pub const SREC_MAGIC: [u8; 2] = *b"S0";

/// `e_machine` value of Epiphany executables.
pub const EM_ADAPTEVA_EPIPHANY: u16 = 0x1223;

/// Size of an ELF32 file header.
const ELF32_EHDR_SIZE: usize = 52;

/// Size of an ELF32 program-header entry.
const ELF32_PHDR_SIZE: usize = 32;

/// Executable container format, decided from the first bytes of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// ELF
    Elf,
    /// Legacy S-record text format (recognised only to be rejected)
    Srec,
    /// Anything else
    Unknown,
}

impl ImageFormat {
    /// Classify a file from its leading bytes.
    pub fn sniff(header: &[u8]) -> Self {
        if header.starts_with(&ELF_MAGIC) {
            Self::Elf
        } else if header.starts_with(&SREC_MAGIC) {
            Self::Srec
        } else {
            Self::Unknown
        }
    }

    /// Read the first four bytes of `path` and classify them.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Read`] if the file cannot be opened or read.
    pub fn sniff_file(path: &Path) -> Result<Self, ImageError> {
        let read_err = |source| ImageError::Read {
            path: path.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::open(path).map_err(read_err)?;
        let mut header = Vec::with_capacity(ELF_MAGIC.len());
        file.by_ref()
            .take(ELF_MAGIC.len() as u64)
            .read_to_end(&mut header)
            .map_err(read_err)?;
        Ok(Self::sniff(&header))
    }

    /// Turn an unsupported format into its specific error.
    fn require_elf(self, header: &[u8]) -> Result<(), ImageError> {
        match self {
            Self::Elf => Ok(()),
            Self::Srec => Err(ImageError::DeprecatedSrec),
            Self::Unknown => Err(ImageError::BadMagic {
                magic: header[..header.len().min(ELF_MAGIC.len())].to_vec(),
            }),
        }
    }
}

/// One program-header entry of an executable
#[derive(Debug, Clone)]
pub struct Segment {
    /// Position in the program-header table
    pub index: usize,
    /// `p_type`
    pub kind: u32,
    /// Destination virtual address as written in the file
    pub vaddr: u32,
    /// Offset of the payload in the file
    pub offset: u32,
    /// Bytes to copy from the file
    pub filesz: u32,
    /// Bytes the segment occupies in memory (`>= filesz`)
    pub memsz: u32,
    payload: Bytes,
}

impl Segment {
    /// The `filesz` bytes copied to the destination.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// True for `PT_LOAD` entries.
    pub const fn is_loadable(&self) -> bool {
        self.kind == PT_LOAD
    }

    /// Bytes reserved beyond the payload (`memsz - filesz`).
    pub const fn bss_len(&self) -> u32 {
        self.memsz - self.filesz
    }
}

/// A parsed executable
#[derive(Debug, Clone)]
pub struct ExecutableImage {
    path: Option<PathBuf>,
    data: Bytes,
    entry: u32,
    machine: u16,
    segments: Vec<Segment>,
}

impl ExecutableImage {
    /// Read and parse an executable from disk.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not an ELF32 image, or
    /// has a program-header table that does not fit the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        debug!("Reading executable {}", path.display());

        let data = std::fs::read(path).map_err(|source| ImageError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut image = Self::from_bytes(data)?;
        image.path = Some(path.to_path_buf());
        Ok(image)
    }

    /// Parse an executable already in memory.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutableImage::open`], minus the read.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self, ImageError> {
        let data: Bytes = data.into();

        ImageFormat::sniff(&data).require_elf(&data)?;

        if data.len() < ELF32_EHDR_SIZE {
            return Err(ImageError::malformed(format!(
                "{} bytes is shorter than an ELF header",
                data.len()
            )));
        }
        if data[EI_CLASS] != ELFCLASS32 {
            return Err(ImageError::UnsupportedClass);
        }

        let header = Elf::parse_header(&data)?;
        let ctx = Ctx::new(header.container()?, header.endianness()?);

        let count = usize::from(header.e_phnum);
        let table = usize::try_from(header.e_phoff)
            .map_err(|_| ImageError::malformed("program-header offset overflows"))?;

        if count > 0 && usize::from(header.e_phentsize) != ELF32_PHDR_SIZE {
            return Err(ImageError::malformed(format!(
                "program-header entry size {} (expected {ELF32_PHDR_SIZE})",
                header.e_phentsize
            )));
        }

        let table_end = table
            .checked_add(count * ELF32_PHDR_SIZE)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                ImageError::malformed(format!(
                    "program-header table ({count} entries at {table:#x}) past end of file ({} bytes)",
                    data.len()
                ))
            })?;

        let headers = ProgramHeader::parse(&data, table, count, ctx)?;
        debug!(
            "ELF32: entry {:#x}, {count} program headers at {table:#x}..{table_end:#x}",
            header.e_entry
        );

        let segments = headers
            .iter()
            .enumerate()
            .map(|(index, ph)| Self::segment(&data, index, ph))
            .collect::<Result<Vec<_>, _>>()?;

        // ELF32 fields are 32 bits wide; goblin widens them to u64.
        #[allow(clippy::cast_possible_truncation)]
        let entry = header.e_entry as u32;

        Ok(Self {
            path: None,
            data,
            entry,
            machine: header.e_machine,
            segments,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn segment(data: &Bytes, index: usize, ph: &ProgramHeader) -> Result<Segment, ImageError> {
        let (vaddr, offset, filesz, memsz) = (
            ph.p_vaddr as u32,
            ph.p_offset as u32,
            ph.p_filesz as u32,
            ph.p_memsz as u32,
        );

        if filesz > memsz {
            return Err(ImageError::bad_segment(
                index,
                format!("file size {filesz:#x} exceeds memory size {memsz:#x}"),
            ));
        }

        let start = offset as usize;
        let end = start + filesz as usize;
        if end > data.len() {
            return Err(ImageError::bad_segment(
                index,
                format!(
                    "payload {start:#x}..{end:#x} past end of file ({} bytes)",
                    data.len()
                ),
            ));
        }

        Ok(Segment {
            index,
            kind: ph.p_type,
            vaddr,
            offset,
            filesz,
            memsz,
            payload: data.slice(start..end),
        })
    }

    /// Path the image was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Entry point.
    pub const fn entry(&self) -> u32 {
        self.entry
    }

    /// `e_machine`.
    pub const fn machine(&self) -> u16 {
        self.machine
    }

    /// Program-header entries in table order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Loadable (`PT_LOAD`) entries in table order.
    pub fn loadable(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_loadable())
    }

    /// Size of the image file in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for an empty buffer (never the case for a parsed image).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Builder for small ELF32 images, used by tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::{ELF32_EHDR_SIZE, ELF32_PHDR_SIZE, EM_ADAPTEVA_EPIPHANY};
    use goblin::elf::program_header::PT_LOAD;

    /// Assemble an ELF32 little-endian image with one `PT_LOAD` entry per
    /// `(vaddr, payload, memsz)` triple.
    pub fn elf32(segments: &[(u32, &[u8], u32)]) -> Vec<u8> {
        let phoff = ELF32_EHDR_SIZE;
        let mut data_off = phoff + segments.len() * ELF32_PHDR_SIZE;

        let mut out = Vec::new();
        out.extend_from_slice(b"\x7fELF");
        out.extend_from_slice(&[1, 1, 1, 0]); // ELFCLASS32, LSB, EV_CURRENT, SYSV
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&EM_ADAPTEVA_EPIPHANY.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_entry
        out.extend_from_slice(&(phoff as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(ELF32_EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
        out.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len(), ELF32_EHDR_SIZE);

        for &(vaddr, payload, memsz) in segments {
            for word in [
                PT_LOAD,
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
        for &(_, payload, _) in segments {
            out.extend_from_slice(payload);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::elf32;
    use super::*;

    #[test]
    fn sniff_formats() {
        assert_eq!(ImageFormat::sniff(b"\x7fELF\x01"), ImageFormat::Elf);
        assert_eq!(ImageFormat::sniff(b"S00F0000"), ImageFormat::Srec);
        assert_eq!(ImageFormat::sniff(b"MZ\x90\x00"), ImageFormat::Unknown);
        assert_eq!(ImageFormat::sniff(b""), ImageFormat::Unknown);
    }

    #[test]
    fn parses_segments_in_table_order() {
        let image = ExecutableImage::from_bytes(elf32(&[
            (0x0, &[0xAA; 16], 16),
            (0x8090_0000, &[0xBB; 8], 8),
            (0x100, &[1, 2, 3], 0x40),
        ]))
        .unwrap();

        let segs = image.segments();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].vaddr, 0);
        assert_eq!(segs[0].payload().as_ref(), &[0xAA; 16]);
        assert_eq!(segs[1].vaddr, 0x8090_0000);
        assert_eq!(segs[1].payload().as_ref(), &[0xBB; 8]);
        assert_eq!(segs[2].filesz, 3);
        assert_eq!(segs[2].bss_len(), 0x3D);
        assert!(segs.iter().all(Segment::is_loadable));
        assert_eq!(image.machine(), EM_ADAPTEVA_EPIPHANY);
    }

    #[test]
    fn rejects_srec() {
        let err = ExecutableImage::from_bytes(b"S00600004844521B\n".to_vec()).unwrap_err();
        assert!(matches!(err, ImageError::DeprecatedSrec));
    }

    #[test]
    fn rejects_unknown_magic() {
        let err = ExecutableImage::from_bytes(vec![0u8; 64]).unwrap_err();
        assert!(matches!(err, ImageError::BadMagic { ref magic } if magic == &[0, 0, 0, 0]));
    }

    #[test]
    fn rejects_elf64() {
        let mut image = elf32(&[]);
        image[EI_CLASS] = 2;
        let err = ExecutableImage::from_bytes(image).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedClass));
    }

    #[test]
    fn rejects_truncated_table() {
        let mut image = elf32(&[(0, &[0; 4], 4)]);
        image.truncate(ELF32_EHDR_SIZE + 8);
        let err = ExecutableImage::from_bytes(image).unwrap_err();
        assert!(matches!(err, ImageError::Malformed { .. }));
    }

    #[test]
    fn rejects_payload_past_end_of_file() {
        let mut image = elf32(&[(0, &[0x11; 32], 32)]);
        image.truncate(image.len() - 1);
        let err = ExecutableImage::from_bytes(image).unwrap_err();
        assert!(matches!(err, ImageError::BadSegment { index: 0, .. }));
    }

    #[test]
    fn rejects_filesz_above_memsz() {
        let image = elf32(&[(0, &[0x11; 8], 4)]);
        let err = ExecutableImage::from_bytes(image).unwrap_err();
        assert!(matches!(err, ImageError::BadSegment { index: 0, .. }));
    }
}
