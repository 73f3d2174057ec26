//! Guest virtual address space and the memory accessor handed to syscall handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use parking_lot::RwLock;
use thiserror::Error;

use crate::memory::{GuardedMemory, MemoryError};

/// Guest page size.
pub const PAGE_SIZE: u64 = 0x1000;

/// Round an address down to a page boundary.
#[must_use]
pub const fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// Round an address up to a page boundary, saturating at the top page.
#[must_use]
pub const fn page_align_up(addr: u64) -> u64 {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(v) => v & !(PAGE_SIZE - 1),
        None => page_align_down(u64::MAX),
    }
}

/// Page protection of a guest region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Prot(u8);

impl Prot {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const EXEC: Self = Self(4);

    /// Check that every bit in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Prot {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Prot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |p: Self, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::EXEC, 'x')
        )
    }
}

/// A failed guest memory access.
///
/// Faults are values, never host crashes: the caller decides which errno the
/// guest sees.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MemoryFault {
    #[error("guest address {addr:#x} is not mapped")]
    Unmapped { addr: u64 },

    #[error("guest address {addr:#x} lacks {needed} permission")]
    Protection { addr: u64, needed: Prot },

    #[error("guest range {addr:#x}+{len:#x} wraps the address space")]
    Overflow { addr: u64, len: usize },
}

impl MemoryFault {
    /// First guest address that could not be accessed.
    #[must_use]
    pub const fn addr(&self) -> u64 {
        match *self {
            Self::Unmapped { addr } | Self::Protection { addr, .. } | Self::Overflow { addr, .. } => {
                addr
            }
        }
    }
}

/// Bounds-checked access to guest memory by guest virtual address.
///
/// Implementations must be all-or-nothing: when `write` returns an error no
/// byte of the requested range has been modified.
pub trait GuestMemory {
    /// Read `buf.len()` bytes starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns a fault if any byte of the range is unmapped or unreadable.
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault>;

    /// Write `data` starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns a fault if any byte of the range is unmapped or read-only; in
    /// that case nothing is written.
    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryFault>;

    /// Read a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// See [`GuestMemory::read`].
    fn read_u64(&self, addr: u64) -> Result<u64, MemoryFault> {
        let mut bytes = [0u8; 8];
        self.read(addr, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Write a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// See [`GuestMemory::write`].
    fn write_u64(&self, addr: u64, value: u64) -> Result<(), MemoryFault> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Read a NUL-terminated string of at most `max` bytes (terminator excluded).
    ///
    /// Returns `None` if no terminator was found within `max` bytes.
    ///
    /// # Errors
    ///
    /// Returns a fault if the string runs into unmapped memory.
    fn read_cstr(&self, addr: u64, max: usize) -> Result<Option<Vec<u8>>, MemoryFault> {
        let mut out = Vec::new();
        let mut cursor = addr;
        while out.len() <= max {
            let mut byte = [0u8; 1];
            self.read(cursor, &mut byte)?;
            if byte[0] == 0 {
                return Ok(Some(out));
            }
            out.push(byte[0]);
            cursor = cursor
                .checked_add(1)
                .ok_or(MemoryFault::Overflow { addr, len: out.len() })?;
        }
        Ok(None)
    }
}

struct Region {
    base: u64,
    prot: Prot,
    backing: GuardedMemory,
}

impl Region {
    const fn end(&self) -> u64 {
        self.base + self.backing.size() as u64
    }
}

/// A piece of an access that falls inside one region.
struct Chunk<'a> {
    region: &'a Region,
    offset: usize,
    len: usize,
}

/// The emulated process's address space.
///
/// Regions are page aligned and never overlap. Accesses may span several
/// contiguous regions; the whole range is validated before any byte moves.
///
/// The region table sits behind a read-write lock. Reads and writes take the
/// read side, so guest threads touching disjoint ranges proceed in parallel;
/// mapping changes take the write side.
#[derive(Default)]
pub struct AddressSpace {
    regions: RwLock<BTreeMap<u64, Region>>,
}

impl AddressSpace {
    /// Create an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a zero-filled region.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is unaligned, empty, overlaps an existing
    /// region, or the host allocation fails.
    pub fn map(&self, base: u64, len: u64, prot: Prot) -> Result<(), MemoryError> {
        if len == 0 || base % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(MemoryError::Unaligned { base, len });
        }
        let end = base
            .checked_add(len)
            .ok_or(MemoryError::Unaligned { base, len })?;
        let size = usize::try_from(len).map_err(|_| MemoryError::InvalidSize(usize::MAX))?;

        let mut regions = self.regions.write();
        let overlaps = regions
            .range(..end)
            .next_back()
            .is_some_and(|(_, r)| r.end() > base);
        if overlaps {
            return Err(MemoryError::Overlap { base, len });
        }

        let backing = GuardedMemory::new(size)?;
        regions.insert(
            base,
            Region {
                base,
                prot,
                backing,
            },
        );
        Ok(())
    }

    /// Unmap the region starting exactly at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if no region starts at `base`.
    pub fn unmap(&self, base: u64) -> Result<(), MemoryError> {
        self.regions
            .write()
            .remove(&base)
            .map(drop)
            .ok_or(MemoryError::NotMapped(base))
    }

    /// Change the protection of the region starting exactly at `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if no region starts at `base`.
    pub fn protect(&self, base: u64, prot: Prot) -> Result<(), MemoryError> {
        let mut regions = self.regions.write();
        let region = regions.get_mut(&base).ok_or(MemoryError::NotMapped(base))?;
        region.prot = prot;
        Ok(())
    }

    /// Check whether `addr` falls inside any region.
    #[must_use]
    pub fn is_mapped(&self, addr: u64) -> bool {
        Self::find(&self.regions.read(), addr).is_some()
    }

    /// Snapshot of the mapped regions as `(base, end, prot)`.
    #[must_use]
    pub fn regions(&self) -> Vec<(u64, u64, Prot)> {
        self.regions
            .read()
            .values()
            .map(|r| (r.base, r.end(), r.prot))
            .collect()
    }

    /// Write into mapped memory ignoring page protection.
    ///
    /// Used by the loader to populate read-only and executable segments.
    ///
    /// # Errors
    ///
    /// Returns a fault if any byte of the range is unmapped.
    pub fn poke(&self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        let regions = self.regions.read();
        let chunks = Self::resolve(&regions, addr, data.len(), Prot::NONE)?;
        Self::copy_in(&chunks, data);
        Ok(())
    }

    fn find(regions: &BTreeMap<u64, Region>, addr: u64) -> Option<&Region> {
        regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.end() > addr)
    }

    /// Split `addr..addr+len` into per-region chunks, checking `needed` on each.
    fn resolve<'a>(
        regions: &'a BTreeMap<u64, Region>,
        addr: u64,
        len: usize,
        needed: Prot,
    ) -> Result<Vec<Chunk<'a>>, MemoryFault> {
        let end = addr
            .checked_add(len as u64)
            .ok_or(MemoryFault::Overflow { addr, len })?;

        let mut chunks = Vec::new();
        let mut cursor = addr;
        while cursor < end {
            let region = Self::find(regions, cursor).ok_or(MemoryFault::Unmapped { addr: cursor })?;
            if !region.prot.contains(needed) {
                return Err(MemoryFault::Protection {
                    addr: cursor,
                    needed,
                });
            }
            let stop = region.end().min(end);
            // Both values are bounded by the region size, which fits in usize.
            #[allow(clippy::cast_possible_truncation)]
            chunks.push(Chunk {
                region,
                offset: (cursor - region.base) as usize,
                len: (stop - cursor) as usize,
            });
            cursor = stop;
        }
        Ok(chunks)
    }

    fn copy_in(chunks: &[Chunk<'_>], data: &[u8]) {
        let mut done = 0;
        for chunk in chunks {
            // SAFETY: resolve() bounded offset + len by the region size.
            unsafe {
                chunk
                    .region
                    .backing
                    .copy_in(chunk.offset, &data[done..done + chunk.len]);
            }
            done += chunk.len;
        }
    }
}

impl GuestMemory for AddressSpace {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let regions = self.regions.read();
        let chunks = Self::resolve(&regions, addr, buf.len(), Prot::READ)?;
        let mut done = 0;
        for chunk in &chunks {
            // SAFETY: resolve() bounded offset + len by the region size.
            unsafe {
                chunk
                    .region
                    .backing
                    .copy_out(chunk.offset, &mut buf[done..done + chunk.len]);
            }
            done += chunk.len;
        }
        Ok(())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        let regions = self.regions.read();
        let chunks = Self::resolve(&regions, addr, data.len(), Prot::WRITE)?;
        Self::copy_in(&chunks, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: Prot = Prot(Prot::READ.0 | Prot::WRITE.0);

    fn space_with(regions: &[(u64, u64, Prot)]) -> AddressSpace {
        let space = AddressSpace::new();
        for &(base, len, prot) in regions {
            space.map(base, len, prot).expect("map should succeed");
        }
        space
    }

    #[test]
    fn test_write_then_read() {
        let space = space_with(&[(0x1000, 0x1000, RW)]);
        space.write(0x1010, b"hello").unwrap();

        let mut buf = [0u8; 5];
        space.read(0x1010, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_write_unmapped_faults() {
        let space = space_with(&[(0x1000, 0x1000, RW)]);
        assert_eq!(
            space.write(0x5000, &[1, 2, 3]),
            Err(MemoryFault::Unmapped { addr: 0x5000 })
        );
    }

    #[test]
    fn test_write_read_only_faults() {
        let space = space_with(&[(0x1000, 0x1000, Prot::READ)]);
        let err = space.write(0x1000, &[1]).unwrap_err();
        assert!(matches!(err, MemoryFault::Protection { addr: 0x1000, .. }));
    }

    #[test]
    fn test_straddling_write_is_all_or_nothing() {
        // Region ends at 0x2000; the write runs 8 bytes past it.
        let space = space_with(&[(0x1000, 0x1000, RW)]);
        let start = 0x2000 - 8;
        let err = space.write(start, &[0xAA; 16]).unwrap_err();
        assert_eq!(err, MemoryFault::Unmapped { addr: 0x2000 });

        let mut buf = [0xFFu8; 8];
        space.read(start, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 8], "no byte of a faulting write may land");
    }

    #[test]
    fn test_write_into_read_only_neighbour_is_all_or_nothing() {
        let space = space_with(&[(0x1000, 0x1000, RW), (0x2000, 0x1000, Prot::READ)]);
        let err = space.write(0x1FF0, &[0xAA; 32]).unwrap_err();
        assert!(matches!(err, MemoryFault::Protection { addr: 0x2000, .. }));

        let mut buf = [0xFFu8; 16];
        space.read(0x1FF0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_write_spanning_contiguous_regions() {
        let space = space_with(&[(0x1000, 0x1000, RW), (0x2000, 0x1000, RW)]);
        let data: Vec<u8> = (0..32).collect();
        space.write(0x1FF0, &data).unwrap();

        let mut buf = [0u8; 32];
        space.read(0x1FF0, &mut buf).unwrap();
        assert_eq!(buf.as_slice(), data.as_slice());
    }

    #[test]
    fn test_zero_length_access_succeeds_anywhere() {
        let space = AddressSpace::new();
        assert!(space.write(0xdead_0000, &[]).is_ok());
        assert!(space.read(0, &mut []).is_ok());
    }

    #[test]
    fn test_wrapping_range_faults() {
        let space = AddressSpace::new();
        assert!(matches!(
            space.write(u64::MAX - 2, &[0; 8]),
            Err(MemoryFault::Overflow { .. })
        ));
    }

    #[test]
    fn test_map_rejects_overlap_and_unaligned() {
        let space = space_with(&[(0x2000, 0x2000, RW)]);
        assert!(matches!(
            space.map(0x3000, 0x1000, RW),
            Err(MemoryError::Overlap { .. })
        ));
        assert!(matches!(
            space.map(0x1000, 0x2000, RW),
            Err(MemoryError::Overlap { .. })
        ));
        assert!(matches!(
            space.map(0x10_0001, 0x1000, RW),
            Err(MemoryError::Unaligned { .. })
        ));
        space.map(0x1000, 0x1000, RW).unwrap();
        space.map(0x4000, 0x1000, RW).unwrap();
    }

    #[test]
    fn test_unmap_and_protect() {
        let space = space_with(&[(0x1000, 0x1000, RW)]);
        space.protect(0x1000, Prot::READ).unwrap();
        assert!(space.write(0x1000, &[1]).is_err());
        space.poke(0x1000, &[7]).unwrap();
        assert_eq!(space.read_u64(0x1000).unwrap(), 7);

        space.unmap(0x1000).unwrap();
        assert!(!space.is_mapped(0x1000));
        assert!(matches!(space.unmap(0x1000), Err(MemoryError::NotMapped(0x1000))));
    }

    #[test]
    fn test_read_cstr() {
        let space = space_with(&[(0x1000, 0x1000, RW)]);
        space.write(0x1000, b"/proc/self/exe\0").unwrap();
        assert_eq!(
            space.read_cstr(0x1000, 64).unwrap().as_deref(),
            Some(b"/proc/self/exe".as_slice())
        );
        assert_eq!(space.read_cstr(0x1000, 4).unwrap(), None);
    }

    #[test]
    fn test_concurrent_disjoint_writes() {
        let space = space_with(&[(0x1000, 0x4000, RW)]);
        std::thread::scope(|s| {
            for i in 0..4u8 {
                let space = &space;
                s.spawn(move || {
                    let base = 0x1000 + u64::from(i) * 0x1000;
                    for _ in 0..100 {
                        space.write(base, &[i + 1; 256]).unwrap();
                    }
                });
            }
        });

        for i in 0..4u8 {
            let mut buf = [0u8; 256];
            space.read(0x1000 + u64::from(i) * 0x1000, &mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == i + 1));
        }
    }

    #[test]
    fn test_prot_display() {
        assert_eq!((Prot::READ | Prot::EXEC).to_string(), "r-x");
        assert_eq!(RW.to_string(), "rw-");
    }
}
