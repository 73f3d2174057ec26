//! aemu - boot AArch64 Android binaries inside an emulated rootfs.
//!
//! The CPU itself is an external collaborator behind [`CpuBackend`]; this crate
//! owns everything around it: rootfs preconditions, ELF loading, the initial
//! stack, the built-in syscall table and the override registry that embedders
//! use to replace individual syscalls.
//!
//! # Example
//!
//! ```ignore
//! use aemu::{Session, SessionConfig, hooks};
//!
//! let config = SessionConfig::new(["rootfs/bin/hello"], "rootfs");
//! let mut session = Session::new(config)?;
//! hooks::install_android_hooks(session.registry());
//! let report = session.run(|_tid| Box::new(MyCpu::new()) as Box<dyn aemu::CpuBackend>)?;
//! ```

pub use aemu_elf::{ElfError, ElfImage};
pub use aemu_state::{AddressSpace, Aarch64Regs, GuestMemory, MemoryFault, Prot};
pub use aemu_syscall::{
    ExitRequest, Outcome, SyscallArgs, SyscallContext, SyscallHandler, SyscallRegistry,
    SyscallTable, errno, nr,
};

mod builtin;
mod config;
mod cpu;
mod error;
pub mod hooks;
mod loader;
pub mod metrics;
mod rootfs;
mod session;

pub use builtin::BuiltinSyscalls;
pub use config::{SessionConfig, Verbosity};
pub use cpu::{CpuBackend, Trap};
pub use error::{Error, Result};
pub use loader::{LoadedImage, MappedImage};
pub use rootfs::{Rootfs, SELF_EXE};
pub use session::{GuestThread, RunReport, Session, ThreadReport};
