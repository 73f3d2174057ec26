//! Seam between the session and whatever executes guest instructions.

use aemu_state::{AddressSpace, Aarch64Regs, MemoryFault};

/// Why a CPU backend handed control back to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    /// The guest executed `svc #0`. `pc` already points past the instruction.
    Svc,
    /// The backend has nothing left to run for this thread.
    Halt,
    /// A guest access the backend could not satisfy.
    Fault { pc: u64, fault: MemoryFault },
}

/// An AArch64 execution engine driving one guest thread.
///
/// The session owns the register file and the address space; the backend
/// executes from `regs.pc` until it needs the session's help.
pub trait CpuBackend: Send {
    /// Run until the next trap.
    fn resume(&mut self, regs: &mut Aarch64Regs, memory: &AddressSpace) -> Trap;
}

impl<T: CpuBackend + ?Sized> CpuBackend for Box<T> {
    fn resume(&mut self, regs: &mut Aarch64Regs, memory: &AddressSpace) -> Trap {
        (**self).resume(regs, memory)
    }
}
