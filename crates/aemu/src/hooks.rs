//! Syscall overrides needed to boot Android binaries.
//!
//! The Android linker calls `fstatfs` on each library it maps to find out
//! whether the file lives on tmpfs, as part of deciding whether the library
//! may be loaded. The override below answers every probe with a zero-filled
//! `struct statfs`, which reads as "not tmpfs".
//!
//! This is a policy stub, not a filesystem implementation: it never looks at
//! the descriptor.

use aemu_state::GuestMemory;
use aemu_syscall::{SyscallArgs, SyscallContext, SyscallRegistry, nr};
use tracing::{debug, info};

/// Size of the AArch64 `struct statfs` (12 eight-byte fields).
pub const FSTATFS_PAYLOAD_SIZE: usize = 12 * 8;

/// `fstatfs(fd, buf)`: write a zeroed `struct statfs` to `buf`.
///
/// Returns 0 when the whole payload was written and -1 when `buf` is not a
/// writable region of at least [`FSTATFS_PAYLOAD_SIZE`] bytes. A failed write
/// leaves guest memory untouched.
pub fn fstatfs(ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> i64 {
    let fd = args[0];
    let buf = args[1];
    let payload = [0u8; FSTATFS_PAYLOAD_SIZE];

    let ret = match ctx.memory().write(buf, &payload) {
        Ok(()) => 0,
        Err(fault) => {
            debug!(%fault, "fstatfs buffer is not writable");
            -1
        }
    };

    info!("fstatfs({fd:#x}, {buf:#x}) = {ret}");
    debug!("fstatfs() CONTENT:");
    debug!("{payload:?}");
    ret
}

/// Register the overrides an Android guest needs to get past the linker.
pub fn install_android_hooks(registry: &SyscallRegistry) {
    registry.register(nr::FSTATFS, fstatfs);
}
