//! AArch64 Linux syscall numbers (asm-generic table).

pub const GETCWD: u64 = 17;
pub const IOCTL: u64 = 29;
pub const FACCESSAT: u64 = 48;
pub const STATFS: u64 = 43;
pub const FSTATFS: u64 = 44;
pub const OPENAT: u64 = 56;
pub const CLOSE: u64 = 57;
pub const READ: u64 = 63;
pub const WRITE: u64 = 64;
pub const WRITEV: u64 = 66;
pub const READLINKAT: u64 = 78;
pub const NEWFSTATAT: u64 = 79;
pub const FSTAT: u64 = 80;
pub const EXIT: u64 = 93;
pub const EXIT_GROUP: u64 = 94;
pub const SET_TID_ADDRESS: u64 = 96;
pub const FUTEX: u64 = 98;
pub const CLOCK_GETTIME: u64 = 113;
pub const RT_SIGACTION: u64 = 134;
pub const RT_SIGPROCMASK: u64 = 135;
pub const PRCTL: u64 = 167;
pub const GETPID: u64 = 172;
pub const GETTID: u64 = 178;
pub const BRK: u64 = 214;
pub const MUNMAP: u64 = 215;
pub const CLONE: u64 = 220;
pub const MMAP: u64 = 222;
pub const MPROTECT: u64 = 226;
pub const MADVISE: u64 = 233;
pub const GETRANDOM: u64 = 278;

/// Name of a syscall for logging, if it is one we know about.
#[must_use]
pub const fn name(nr: u64) -> Option<&'static str> {
    Some(match nr {
        GETCWD => "getcwd",
        IOCTL => "ioctl",
        STATFS => "statfs",
        FSTATFS => "fstatfs",
        FACCESSAT => "faccessat",
        OPENAT => "openat",
        CLOSE => "close",
        READ => "read",
        WRITE => "write",
        WRITEV => "writev",
        READLINKAT => "readlinkat",
        NEWFSTATAT => "newfstatat",
        FSTAT => "fstat",
        EXIT => "exit",
        EXIT_GROUP => "exit_group",
        SET_TID_ADDRESS => "set_tid_address",
        FUTEX => "futex",
        CLOCK_GETTIME => "clock_gettime",
        RT_SIGACTION => "rt_sigaction",
        RT_SIGPROCMASK => "rt_sigprocmask",
        PRCTL => "prctl",
        GETPID => "getpid",
        GETTID => "gettid",
        BRK => "brk",
        MUNMAP => "munmap",
        CLONE => "clone",
        MMAP => "mmap",
        MPROTECT => "mprotect",
        MADVISE => "madvise",
        GETRANDOM => "getrandom",
        _ => return None,
    })
}
