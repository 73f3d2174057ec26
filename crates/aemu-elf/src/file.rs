//! ELF file parser.

use crate::constants::*;
use crate::header::*;
use crate::{ElfError, Result};

/// Read little-endian u16 from bytes.
#[inline]
fn read_le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read little-endian u32 from bytes.
#[inline]
fn read_le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read little-endian u64 from bytes.
#[inline]
fn read_le64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Parsed ELF file.
#[derive(Clone, Debug)]
pub struct ElfFile {
    pub header: ElfHeader,
    pub program_headers: Vec<ProgramHeader>,
}

impl ElfFile {
    /// Parse ELF file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed or the file is not a
    /// little-endian ELF64 AArch64 executable or shared object.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = Self::parse_header(data)?;
        let program_headers = Self::parse_program_headers(data, &header)?;
        Ok(Self {
            header,
            program_headers,
        })
    }

    /// Check if the file is position independent (`ET_DYN`).
    #[must_use]
    pub const fn is_pie(&self) -> bool {
        self.header.e_type == ELF_TYPE_DYN
    }

    fn parse_header(data: &[u8]) -> Result<ElfHeader> {
        check_ident(data)?;
        if data.len() < ELF64_EHDR_SIZE {
            return Err(ElfError::TooSmall);
        }

        let class = data[4];
        if class != ELF_CLASS_64 {
            return Err(ElfError::UnsupportedClass(class));
        }

        let e_type = read_le16(data, 16);
        if e_type != ELF_TYPE_EXEC && e_type != ELF_TYPE_DYN {
            return Err(ElfError::UnsupportedType(e_type));
        }

        let machine = read_le16(data, 18);
        if machine != ELF_MACHINE_AARCH64 {
            return Err(ElfError::UnsupportedMachine(machine));
        }

        Ok(ElfHeader {
            class,
            data: data[5],
            version: data[6],
            abi: data[7],
            e_type,
            machine,
            entry: read_le64(data, 24),
            phoff: read_le64(data, 32),
            flags: read_le32(data, 48),
            phentsize: read_le16(data, 54),
            phnum: read_le16(data, 56),
        })
    }

    fn parse_program_headers(data: &[u8], header: &ElfHeader) -> Result<Vec<ProgramHeader>> {
        let phoff = usize::try_from(header.phoff).map_err(|_| ElfError::ProgramOutOfBounds)?;
        let entsize = usize::from(header.phentsize);
        if header.phnum > 0 && entsize < ELF64_PHDR_SIZE {
            return Err(ElfError::ProgramOutOfBounds);
        }

        let mut headers = Vec::with_capacity(usize::from(header.phnum));
        for i in 0..usize::from(header.phnum) {
            let offset = i
                .checked_mul(entsize)
                .and_then(|o| o.checked_add(phoff))
                .ok_or(ElfError::ProgramOutOfBounds)?;
            headers.push(Self::parse_program_header(data, offset)?);
        }

        Ok(headers)
    }

    fn parse_program_header(data: &[u8], offset: usize) -> Result<ProgramHeader> {
        if offset.checked_add(ELF64_PHDR_SIZE).is_none_or(|end| end > data.len()) {
            return Err(ElfError::ProgramOutOfBounds);
        }
        Ok(ProgramHeader {
            p_type: read_le32(data, offset),
            flags: read_le32(data, offset + 4),
            offset: read_le64(data, offset + 8),
            vaddr: read_le64(data, offset + 16),
            filesz: read_le64(data, offset + 32),
            memsz: read_le64(data, offset + 40),
            align: read_le64(data, offset + 48),
        })
    }
}

/// Validate the `e_ident` prefix shared by every ELF file.
fn check_ident(data: &[u8]) -> Result<()> {
    if data.len() < 6 {
        return Err(ElfError::TooSmall);
    }
    if read_le32(data, 0) != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }
    if data[5] != ELF_DATA_LSB {
        return Err(ElfError::NotLittleEndian);
    }
    Ok(())
}

/// Peek at the ELF header and report whether it targets AArch64.
///
/// # Errors
///
/// Returns an error if the data is not a little-endian ELF file.
pub fn is_aarch64_elf(data: &[u8]) -> Result<bool> {
    check_ident(data)?;
    if data.len() < 20 {
        return Err(ElfError::TooSmall);
    }
    Ok(data[4] == ELF_CLASS_64 && read_le16(data, 18) == ELF_MACHINE_AARCH64)
}
