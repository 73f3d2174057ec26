//! Syscall argument words.

use std::fmt;
use std::ops::Index;

use thiserror::Error;

/// Maximum number of syscall arguments on Linux.
pub const MAX_SYSCALL_ARGS: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("syscalls take at most 6 arguments, got {0}")]
pub struct ArgsError(pub usize);

/// The guest-word arguments of one syscall, in order.
///
/// Arguments the guest did not pass read as zero, matching what a handler
/// would see in the unused argument registers.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallArgs {
    words: [u64; MAX_SYSCALL_ARGS],
    len: usize,
}

impl SyscallArgs {
    /// Create from a full argument register set.
    #[must_use]
    pub const fn new(words: [u64; MAX_SYSCALL_ARGS]) -> Self {
        Self {
            words,
            len: MAX_SYSCALL_ARGS,
        }
    }

    /// Create from up to six leading arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if more than six words are given.
    pub fn from_slice(args: &[u64]) -> Result<Self, ArgsError> {
        if args.len() > MAX_SYSCALL_ARGS {
            return Err(ArgsError(args.len()));
        }
        let mut words = [0u64; MAX_SYSCALL_ARGS];
        words[..args.len()].copy_from_slice(args);
        Ok(Self {
            words,
            len: args.len(),
        })
    }

    /// Argument `n`, or zero past the end.
    #[must_use]
    pub fn get(&self, n: usize) -> u64 {
        self.words.get(n).copied().unwrap_or(0)
    }

    /// Argument `n` reinterpreted as a signed 32-bit value (for fds, dirfds).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_i32(&self, n: usize) -> i32 {
        self.get(n) as u32 as i32
    }

    /// The arguments actually supplied.
    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.words[..self.len]
    }
}

impl Index<usize> for SyscallArgs {
    type Output = u64;

    fn index(&self, n: usize) -> &u64 {
        &self.words[n]
    }
}

impl fmt::Debug for SyscallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.as_slice().iter().map(|w| format!("{w:#x}")))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_args_pad_with_zero() {
        let args = SyscallArgs::from_slice(&[3, 0x1000]).unwrap();
        assert_eq!(args.get(0), 3);
        assert_eq!(args[1], 0x1000);
        assert_eq!(args.get(5), 0);
        assert_eq!(args.as_slice(), &[3, 0x1000]);
    }

    #[test]
    fn test_too_many_args() {
        assert_eq!(SyscallArgs::from_slice(&[0; 7]), Err(ArgsError(7)));
    }

    #[test]
    fn test_signed_fd() {
        // AT_FDCWD as the guest passes it in a 64-bit register.
        let args = SyscallArgs::from_slice(&[0xFFFF_FFFF_FFFF_FF9C]).unwrap();
        assert_eq!(args.get_i32(0), -100);
    }

    #[test]
    fn test_debug_is_hex() {
        let args = SyscallArgs::from_slice(&[255, 16]).unwrap();
        assert_eq!(format!("{args:?}"), "[\"0xff\", \"0x10\"]");
    }
}
