//! Map ELF images and build the initial process stack.

use aemu_elf::{ELF64_PHDR_SIZE, ElfImage, MemorySegment, PF_R, PF_W, PF_X};
use aemu_state::{AddressSpace, PAGE_SIZE, Prot, page_align_down, page_align_up};
use tracing::debug;

use crate::{Error, Result};

// Auxiliary vector keys.
const AT_NULL: u64 = 0;
const AT_PHDR: u64 = 3;
const AT_PHENT: u64 = 4;
const AT_PHNUM: u64 = 5;
const AT_PAGESZ: u64 = 6;
const AT_BASE: u64 = 7;
const AT_FLAGS: u64 = 8;
const AT_ENTRY: u64 = 9;
const AT_UID: u64 = 11;
const AT_EUID: u64 = 12;
const AT_GID: u64 = 13;
const AT_EGID: u64 = 14;
const AT_HWCAP: u64 = 16;
const AT_SECURE: u64 = 23;
const AT_RANDOM: u64 = 25;
const AT_EXECFN: u64 = 31;

/// Bytes handed to the guest as `AT_RANDOM` (bionic seeds its stack guard from them).
const AT_RANDOM_BYTES: [u8; 16] = *b"aemu-at-random!!";

/// Where an image ended up in the guest address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedImage {
    pub bias: u64,
    pub entry: u64,
    /// First page after the highest segment.
    pub end: u64,
    /// Biased address of the program headers, if they are mapped.
    pub phdr: Option<u64>,
    pub phnum: u16,
}

/// The loaded program, ready for its first instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedImage {
    /// Where the main thread starts: the interpreter's entry if one was loaded.
    pub start_pc: u64,
    pub initial_sp: u64,
    /// Initial program break.
    pub brk: u64,
    pub program: MappedImage,
    /// The interpreter image, if the rootfs provides the one `PT_INTERP` asks for.
    pub interpreter: Option<MappedImage>,
    pub interpreter_path: Option<String>,
}

fn prot_of(flags: u32) -> Prot {
    [(PF_R, Prot::READ), (PF_W, Prot::WRITE), (PF_X, Prot::EXEC)]
        .into_iter()
        .filter(|&(bit, _)| flags & bit != 0)
        .fold(Prot::NONE, |acc, (_, prot)| acc | prot)
}

/// Page ranges backing `image` at `bias`, as `(start, end, prot)`.
///
/// A page shared by two segments gets the union of their permissions.
fn page_ranges(image: &ElfImage, bias: u64) -> Result<Vec<(u64, u64, Prot)>> {
    let mut ranges: Vec<(u64, u64, Prot)> = Vec::new();
    for segment in &image.memory_segments {
        let (start, end) = segment_bounds(segment, bias)?;
        let (lo, hi) = (page_align_down(start), page_align_up(end));
        let prot = prot_of(segment.flags);
        match ranges.pop() {
            Some((prev_lo, prev_hi, prev_prot)) if lo < prev_hi => {
                let shared_hi = hi.min(prev_hi);
                ranges.extend(
                    [
                        (prev_lo, lo, prev_prot),
                        (lo, shared_hi, prev_prot | prot),
                        (shared_hi, prev_hi, prev_prot),
                        (shared_hi, hi, prot),
                    ]
                    .into_iter()
                    .filter(|&(a, b, _)| a < b),
                );
            }
            prev => {
                ranges.extend(prev);
                ranges.push((lo, hi, prot));
            }
        }
    }
    Ok(ranges)
}

fn segment_bounds(segment: &MemorySegment, bias: u64) -> Result<(u64, u64)> {
    segment
        .virtual_start
        .checked_add(bias)
        .zip(segment.virtual_end.checked_add(bias))
        .ok_or(Error::BadLayout {
            what: "load bias",
            addr: bias,
        })
}

/// Map every loadable segment of `image` at `bias` and copy in its file data.
///
/// # Errors
///
/// Returns an error if the biased segments overflow the address space or a
/// segment cannot be mapped.
pub fn map_image(space: &AddressSpace, image: &ElfImage, bias: u64) -> Result<MappedImage> {
    let ranges = page_ranges(image, bias)?;
    let entry = image.entry_point.checked_add(bias).ok_or(Error::BadLayout {
        what: "load bias",
        addr: bias,
    })?;
    for &(lo, hi, prot) in &ranges {
        space.map(lo, hi - lo, prot)?;
    }
    for segment in &image.memory_segments {
        let (start, end) = segment_bounds(segment, bias)?;
        space.poke(start, &segment.data)?;
        debug!(
            start = format_args!("{start:#x}"),
            end = format_args!("{end:#x}"),
            flags = segment.flags,
            "mapped segment"
        );
    }

    Ok(MappedImage {
        bias,
        entry,
        end: ranges.iter().map(|&(_, hi, _)| hi).max().unwrap_or(0),
        phdr: image.phdr_vaddr.and_then(|p| p.checked_add(bias)),
        phnum: image.phnum,
    })
}

/// Contents of the initial stack.
pub struct StackSpec<'a> {
    pub argv: &'a [String],
    pub env: &'a [String],
    pub exe_path: &'a str,
    pub program: &'a MappedImage,
    pub interp_base: u64,
}

/// Map the stack below `top` and lay out argc, argv, envp and auxv.
///
/// Returns the initial stack pointer (16-byte aligned, pointing at argc).
///
/// # Errors
///
/// Returns an error if the stack cannot be mapped or the vectors do not fit.
pub fn build_stack(space: &AddressSpace, top: u64, size: u64, spec: &StackSpec<'_>) -> Result<u64> {
    let bottom = top.checked_sub(size).ok_or(Error::BadLayout {
        what: "stack top",
        addr: top,
    })?;
    space.map(bottom, size, Prot::READ | Prot::WRITE)?;

    let mut cursor = top;
    let mut push_bytes = |bytes: &[u8]| -> Result<u64> {
        let len = bytes.len() as u64;
        if cursor - bottom < len + 1 {
            return Err(Error::StackTooSmall {
                needed: top - cursor + len + 1,
                size,
            });
        }
        cursor -= len + 1;
        space.poke(cursor, bytes)?;
        space.poke(cursor + len, &[0])?;
        Ok(cursor)
    };

    let execfn = push_bytes(spec.exe_path.as_bytes())?;
    let argv: Vec<u64> = spec
        .argv
        .iter()
        .map(|a| push_bytes(a.as_bytes()))
        .collect::<Result<_>>()?;
    let envp: Vec<u64> = spec
        .env
        .iter()
        .map(|e| push_bytes(e.as_bytes()))
        .collect::<Result<_>>()?;
    let random = push_bytes(&AT_RANDOM_BYTES)?;

    let program = spec.program;
    let auxv = [
        (AT_PHDR, program.phdr.unwrap_or(0)),
        (AT_PHENT, ELF64_PHDR_SIZE as u64),
        (AT_PHNUM, u64::from(program.phnum)),
        (AT_PAGESZ, PAGE_SIZE),
        (AT_BASE, spec.interp_base),
        (AT_FLAGS, 0),
        (AT_ENTRY, program.entry),
        (AT_UID, 0),
        (AT_EUID, 0),
        (AT_GID, 0),
        (AT_EGID, 0),
        (AT_HWCAP, 0),
        (AT_SECURE, 0),
        (AT_RANDOM, random),
        (AT_EXECFN, execfn),
        (AT_NULL, 0),
    ];

    let mut words = Vec::with_capacity(3 + argv.len() + envp.len() + 2 * auxv.len());
    words.push(argv.len() as u64);
    words.extend(&argv);
    words.push(0);
    words.extend(&envp);
    words.push(0);
    for (key, value) in auxv {
        words.push(key);
        words.push(value);
    }

    let table_size = words.len() as u64 * 8;
    let sp = cursor
        .checked_sub(table_size)
        .map(|sp| sp & !0xF)
        .filter(|&sp| sp >= bottom)
        .ok_or(Error::StackTooSmall {
            needed: top - cursor + table_size + 0xF,
            size,
        })?;

    let table: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    space.poke(sp, &table)?;
    Ok(sp)
}
