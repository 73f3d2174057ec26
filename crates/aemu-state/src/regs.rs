//! AArch64 user-mode register file.

/// Number of general-purpose registers (`x0`..`x30`).
pub const NUM_GPRS: usize = 31;

/// AArch64 user-visible integer state.
///
/// Floating point and SIMD state belong to the CPU backend; syscall handling
/// only ever touches the integer registers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aarch64Regs {
    /// General-purpose registers `x0`..`x30` (`x30` is the link register).
    pub x: [u64; NUM_GPRS],
    /// Stack pointer (`sp_el0`).
    pub sp: u64,
    /// Program counter.
    pub pc: u64,
    /// Condition flags (NZCV in bits 31..28).
    pub pstate: u64,
    /// Thread pointer (`tpidr_el0`).
    pub tpidr: u64,
}

impl Aarch64Regs {
    /// Create a zeroed register file starting at `pc` with stack `sp`.
    #[must_use]
    pub fn new(pc: u64, sp: u64) -> Self {
        Self {
            pc,
            sp,
            ..Self::default()
        }
    }

    /// Read `xN`. Index 31 reads as zero (`xzr`).
    #[must_use]
    pub fn get(&self, n: usize) -> u64 {
        self.x.get(n).copied().unwrap_or(0)
    }

    /// Write `xN`. Writes to index 31 (`xzr`) are discarded.
    pub fn set(&mut self, n: usize, value: u64) {
        if let Some(reg) = self.x.get_mut(n) {
            *reg = value;
        }
    }
}
