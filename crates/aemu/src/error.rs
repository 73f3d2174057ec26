use std::path::PathBuf;

use aemu_state::MemoryFault;
use thiserror::Error;

/// Harness errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ELF error: {0}")]
    Elf(#[from] aemu_elf::ElfError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory error: {0}")]
    Memory(#[from] aemu_state::MemoryError),
    #[error("guest memory fault while loading: {0}")]
    Fault(#[from] MemoryFault),
    #[error("rootfs {} is not a directory", .0.display())]
    RootfsNotFound(PathBuf),
    #[error("{} not found in rootfs", .0.display())]
    MissingFile(PathBuf),
    #[error(
        "{} not found, Android linker will bail. Need a file at that location (empty is fine)",
        .0.display()
    )]
    MissingSelfExe(PathBuf),
    #[error("no program given (argv is empty)")]
    NoProgram,
    #[error("initial stack needs {needed:#x} bytes but the stack is only {size:#x} bytes")]
    StackTooSmall { needed: u64, size: u64 },
    #[error("{what} {addr:#x} puts the guest layout outside the address space")]
    BadLayout { what: &'static str, addr: u64 },
    #[error("guest thread {tid} faulted at pc {pc:#x}: {fault}")]
    GuestFault {
        tid: u32,
        pc: u64,
        fault: MemoryFault,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
