//! Guest machine state for AArch64 emulation.
//!
//! This crate owns the emulated process's address space and register file.
//! Syscall handlers never see host pointers: every access goes through the
//! [`GuestMemory`] capability, which bounds-checks guest virtual addresses and
//! reports failures as [`MemoryFault`] values instead of crashing the host.
//!
//! ```ignore
//! use aemu_state::{AddressSpace, GuestMemory, Prot};
//!
//! let space = AddressSpace::new();
//! space.map(0x1000, 0x1000, Prot::READ | Prot::WRITE)?;
//! space.write(0x1000, b"hello")?;
//! ```

mod memory;
mod regs;
mod space;

pub use memory::{GUARD_SIZE, GuardedMemory, MemoryError};
pub use regs::{Aarch64Regs, NUM_GPRS};
pub use space::{
    AddressSpace, GuestMemory, MemoryFault, PAGE_SIZE, Prot, page_align_down, page_align_up,
};
