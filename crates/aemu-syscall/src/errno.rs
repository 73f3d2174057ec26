//! Linux errno values as returned to the guest (negated).

pub const EPERM: i64 = 1;
pub const ENOENT: i64 = 2;
pub const EBADF: i64 = 9;
pub const ENOMEM: i64 = 12;
pub const EACCES: i64 = 13;
pub const EFAULT: i64 = 14;
pub const EINVAL: i64 = 22;
pub const ENAMETOOLONG: i64 = 36;
pub const ENOSYS: i64 = 38;

/// Guest return value for a failed call.
#[must_use]
pub const fn neg(errno: i64) -> i64 {
    -errno
}
