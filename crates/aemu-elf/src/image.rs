//! ELF image with memory segments.

use crate::constants::*;
use crate::file::ElfFile;
use crate::header::ProgramHeader;
use crate::{ElfError, Result};

/// A memory segment with virtual address and data.
///
/// The `data` field contains only the file data (filesz bytes).
/// The total memory size is `virtual_end - virtual_start` (memsz).
/// Any bytes from `len(data)` to `memsz` are BSS (zero-initialized).
#[derive(Clone, Debug)]
pub struct MemorySegment {
    pub virtual_start: u64,
    pub virtual_end: u64,
    pub data: Vec<u8>,
    pub flags: u32,
}

impl MemorySegment {
    /// Size of file data (non-BSS).
    #[must_use]
    pub const fn filesz(&self) -> u64 {
        self.data.len() as u64
    }

    /// Total memory size including BSS.
    #[must_use]
    pub const fn memsz(&self) -> u64 {
        self.virtual_end - self.virtual_start
    }

    /// Size of BSS (zero-filled) portion.
    #[must_use]
    pub const fn bss_size(&self) -> u64 {
        self.memsz() - self.filesz()
    }

    /// Check if segment is writable.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        (self.flags & PF_W) != 0
    }

    /// Check if segment is executable.
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        (self.flags & PF_X) != 0
    }
}

/// ELF image ready for loading into memory.
#[derive(Clone, Debug)]
pub struct ElfImage {
    pub entry_point: u64,
    /// `true` for `ET_DYN` images, which are loaded at a bias.
    pub pie: bool,
    pub memory_segments: Vec<MemorySegment>,
    /// Requested program interpreter (`PT_INTERP`), e.g. `/system/bin/linker64`.
    pub interpreter: Option<String>,
    /// Unbiased virtual address of the program headers, if they are mapped.
    pub phdr_vaddr: Option<u64>,
    pub phnum: u16,
}

impl ElfImage {
    /// Parse ELF from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or has no loadable segments.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let elf = ElfFile::parse(data)?;
        let loadable = Self::validate_segments(&elf, data)?;
        let interpreter = Self::read_interpreter(&elf, data)?;
        let phdr_vaddr = Self::locate_phdrs(&elf, &loadable);
        let segments = Self::load_segments(&loadable, data);

        Ok(Self {
            entry_point: elf.header.entry,
            pie: elf.is_pie(),
            memory_segments: segments,
            interpreter,
            phdr_vaddr,
            phnum: elf.header.phnum,
        })
    }

    fn validate_segments(elf: &ElfFile, file_data: &[u8]) -> Result<Vec<ProgramHeader>> {
        let mut loadable = Vec::new();

        for phdr in &elf.program_headers {
            if phdr.p_type == PT_LOAD && phdr.memsz > 0 {
                let end = phdr
                    .offset
                    .checked_add(phdr.filesz)
                    .ok_or(ElfError::SegmentBeyondFile)?;
                if end > file_data.len() as u64 || phdr.filesz > phdr.memsz {
                    return Err(ElfError::SegmentBeyondFile);
                }

                if phdr.vaddr.checked_add(phdr.memsz).is_none() {
                    return Err(ElfError::VirtualAddressOverflow);
                }

                loadable.push(phdr.clone());
            }
        }

        if loadable.is_empty() {
            return Err(ElfError::NoLoadableSegments);
        }

        if loadable.len() > MAX_SEGMENTS {
            return Err(ElfError::TooManySegments);
        }

        for (i, a) in loadable.iter().enumerate() {
            for b in loadable.iter().skip(i + 1) {
                if a.vaddr < b.vaddr_end() && b.vaddr < a.vaddr_end() {
                    return Err(ElfError::OverlappingSegments);
                }
            }
        }

        Ok(loadable)
    }

    fn read_interpreter(elf: &ElfFile, file_data: &[u8]) -> Result<Option<String>> {
        let Some(phdr) = elf.program_headers.iter().find(|p| p.p_type == PT_INTERP) else {
            return Ok(None);
        };
        let start = usize::try_from(phdr.offset).map_err(|_| ElfError::SegmentBeyondFile)?;
        let len = usize::try_from(phdr.filesz).map_err(|_| ElfError::SegmentBeyondFile)?;
        let bytes = start
            .checked_add(len)
            .and_then(|end| file_data.get(start..end))
            .ok_or(ElfError::SegmentBeyondFile)?;
        let path = bytes.split(|&b| b == 0).next().unwrap_or_default();
        let path = std::str::from_utf8(path).map_err(|_| ElfError::InvalidInterpreter)?;
        Ok(Some(path.to_string()))
    }

    fn locate_phdrs(elf: &ElfFile, loadable: &[ProgramHeader]) -> Option<u64> {
        if let Some(phdr) = elf.program_headers.iter().find(|p| p.p_type == PT_PHDR) {
            return Some(phdr.vaddr);
        }
        // Fall back to the segment whose file range covers the header table.
        let phoff = elf.header.phoff;
        loadable
            .iter()
            .find(|p| p.offset <= phoff && phoff < p.offset + p.filesz)
            .map(|p| p.vaddr + (phoff - p.offset))
    }

    fn load_segments(program_headers: &[ProgramHeader], file_data: &[u8]) -> Vec<MemorySegment> {
        program_headers
            .iter()
            .map(|phdr| {
                // Bounds were checked in validate_segments.
                #[allow(clippy::cast_possible_truncation)]
                let (offset, filesz) = (phdr.offset as usize, phdr.filesz as usize);
                MemorySegment {
                    virtual_start: phdr.vaddr,
                    virtual_end: phdr.vaddr_end(),
                    data: file_data[offset..offset + filesz].to_vec(),
                    flags: phdr.flags,
                }
            })
            .collect()
    }
}
