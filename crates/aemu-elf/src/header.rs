//! ELF header structures.

/// ELF64 file header.
#[derive(Clone, Debug)]
pub struct ElfHeader {
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub abi: u8,
    pub e_type: u16,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub flags: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

/// ELF64 program header.
#[derive(Clone, Debug)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl ProgramHeader {
    /// End of the segment in the virtual address space.
    #[must_use]
    pub const fn vaddr_end(&self) -> u64 {
        self.vaddr.wrapping_add(self.memsz)
    }
}
