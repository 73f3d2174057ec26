//! ELF parser for AArch64 Android binaries.

mod constants;
mod file;
mod header;
mod image;

pub use constants::*;
pub use file::*;
pub use header::*;
pub use image::*;

use thiserror::Error;

/// ELF parsing errors.
#[derive(Error, Debug)]
pub enum ElfError {
    #[error("ELF data too small")]
    TooSmall,
    #[error("Invalid ELF magic number")]
    InvalidMagic,
    #[error("Only little-endian ELF supported")]
    NotLittleEndian,
    #[error("Unsupported ELF class: {0} (only ELF64 is supported)")]
    UnsupportedClass(u8),
    #[error("Unsupported machine: {0} (expected AArch64)")]
    UnsupportedMachine(u16),
    #[error("Unsupported ELF type: {0}")]
    UnsupportedType(u16),
    #[error("Program header out of bounds")]
    ProgramOutOfBounds,
    #[error("Segment extends beyond file")]
    SegmentBeyondFile,
    #[error("Virtual address overflow")]
    VirtualAddressOverflow,
    #[error("No loadable segments found")]
    NoLoadableSegments,
    #[error("Too many loadable segments")]
    TooManySegments,
    #[error("Overlapping virtual address ranges")]
    OverlappingSegments,
    #[error("Interpreter path is not valid UTF-8")]
    InvalidInterpreter,
}

pub type Result<T> = std::result::Result<T, ElfError>;
