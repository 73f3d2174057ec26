//! Syscall interception for emulated AArch64 Linux/Android guests.
//!
//! An embedder installs substitute implementations for individual syscall
//! numbers in a [`SyscallRegistry`]. When the guest traps with `svc #0`,
//! [`handle_svc`] decodes the number and arguments from the register file,
//! asks the registry first and falls back to the framework's built-in
//! [`SyscallTable`] when no override exists. The signed result lands in `x0`.
//!
//! # Example
//!
//! ```ignore
//! use aemu_syscall::{SyscallRegistry, nr};
//!
//! let registry = SyscallRegistry::new();
//! registry.register(nr::GETPID, |_ctx, _args| 1234);
//! ```

mod abi;
mod args;
mod context;
pub mod errno;
pub mod nr;
mod registry;

pub use abi::{SyscallAbi, handle_svc};
pub use args::{ArgsError, MAX_SYSCALL_ARGS, SyscallArgs};
pub use context::{ExitRequest, SyscallContext};
pub use registry::{Outcome, SyscallHandler, SyscallRegistry, SyscallTable};
