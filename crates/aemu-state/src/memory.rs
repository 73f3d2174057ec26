//! Guarded host backing for guest memory regions.
//!
//! Every mapped guest region is backed by its own anonymous mmap laid out as
//! `[GUARD][MEMORY][GUARD]`, so a host-side bug that walks off the end of a
//! region faults in the guard pages instead of scribbling over a neighbour.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, mprotect, munmap};
use thiserror::Error;

/// Guard page size (16KB, must be >= host page size).
pub const GUARD_SIZE: usize = 1 << 14;

/// Host memory allocation error.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("mmap failed: {0}")]
    MmapFailed(#[from] nix::Error),

    #[error("invalid memory size: {0}")]
    InvalidSize(usize),

    #[error("region {base:#x}+{len:#x} is not page aligned")]
    Unaligned { base: u64, len: u64 },

    #[error("region {base:#x}+{len:#x} overlaps an existing mapping")]
    Overlap { base: u64, len: u64 },

    #[error("no region mapped at {0:#x}")]
    NotMapped(u64),
}

/// Host backing for one guest region, fenced by inaccessible pages.
pub struct GuardedMemory {
    /// Start of the mapping, i.e. the leading guard.
    mapping: NonNull<c_void>,
    mapping_len: usize,
    /// Bytes usable by the guest.
    len: usize,
}

impl GuardedMemory {
    /// Allocate a new zero-filled guarded region.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or mmap fails.
    pub fn new(len: usize) -> Result<Self, MemoryError> {
        let mapping_len = len
            .checked_add(2 * GUARD_SIZE)
            .filter(|_| len != 0)
            .and_then(NonZeroUsize::new)
            .ok_or(MemoryError::InvalidSize(len))?;

        // Reserve guard + body + guard with no access, then open the body.
        let mapping = unsafe {
            mmap_anonymous(
                None,
                mapping_len,
                ProtFlags::PROT_NONE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_NORESERVE,
            )?
        };
        let body = unsafe { mapping.byte_add(GUARD_SIZE) };
        let opened = unsafe { mprotect(body, len, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE) };
        if let Err(e) = opened {
            unsafe {
                let _ = munmap(mapping, mapping_len.get());
            }
            return Err(e.into());
        }

        Ok(Self {
            mapping,
            mapping_len: mapping_len.get(),
            len,
        })
    }

    /// First usable byte, just past the leading guard.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        unsafe { self.mapping.as_ptr().cast::<u8>().add(GUARD_SIZE) }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.len
    }

    /// Copy `data` to `offset` bytes into the body.
    ///
    /// Takes `&self`: callers on different threads may copy into disjoint
    /// ranges concurrently. Overlapping concurrent copies race.
    ///
    /// # Safety
    ///
    /// `offset + data.len()` must not exceed [`GuardedMemory::size`].
    pub unsafe fn copy_in(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.len);
        unsafe { self.as_ptr().add(offset).copy_from_nonoverlapping(data.as_ptr(), data.len()) }
    }

    /// Copy memory at the given offset into `buf`.
    ///
    /// # Safety
    ///
    /// `offset + buf.len()` must not exceed [`GuardedMemory::size`].
    pub unsafe fn copy_out(&self, offset: usize, buf: &mut [u8]) {
        debug_assert!(offset + buf.len() <= self.len);
        unsafe { self.as_ptr().add(offset).copy_to_nonoverlapping(buf.as_mut_ptr(), buf.len()) }
    }
}

impl Drop for GuardedMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.mapping, self.mapping_len);
        }
    }
}

// The mapping is owned exclusively by this value; all access is by raw copy.
unsafe impl Send for GuardedMemory {}
unsafe impl Sync for GuardedMemory {}
