#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aemu::{AddressSpace, Aarch64Regs, CpuBackend, GuestMemory, MemoryFault, SessionConfig, Trap, Verbosity};
use aemu_elf::{
    ELF_CLASS_64, ELF_DATA_LSB, ELF_MACHINE_AARCH64, ELF_MAGIC, ELF_TYPE_DYN, ELF_VERSION_CURRENT,
    ELF64_EHDR_SIZE, ELF64_PHDR_SIZE, PF_R, PF_W, PF_X, PT_INTERP, PT_LOAD,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

pub const LINKER: &str = "/system/bin/linker64";
pub const PROGRAM_ENTRY: u64 = 0x100;
pub const LINKER_ENTRY: u64 = 0x200;

/// `AT_FDCWD` as a register value.
#[allow(clippy::cast_sign_loss)]
pub const AT_FDCWD: u64 = -100i64 as u64;

// ============================================================================
// ELF fixtures
// ============================================================================

/// A small AArch64 PIE: an RX segment covering the headers and an RW segment
/// with some BSS. `interp` adds a `PT_INTERP` header.
pub fn aarch64_pie(entry: u64, interp: Option<&str>) -> Vec<u8> {
    let interp = interp.map(|p| {
        let mut bytes = p.as_bytes().to_vec();
        bytes.push(0);
        bytes
    });
    let phnum: u16 = if interp.is_some() { 3 } else { 2 };
    let interp_off = ELF64_EHDR_SIZE + usize::from(phnum) * ELF64_PHDR_SIZE;
    let code_end = interp_off + interp.as_ref().map_or(0, Vec::len);
    let mut data = vec![0u8; code_end + 16];

    data[..4].copy_from_slice(&ELF_MAGIC.to_le_bytes());
    data[4] = ELF_CLASS_64;
    data[5] = ELF_DATA_LSB;
    data[6] = ELF_VERSION_CURRENT;
    data[16..18].copy_from_slice(&ELF_TYPE_DYN.to_le_bytes());
    data[18..20].copy_from_slice(&ELF_MACHINE_AARCH64.to_le_bytes());
    data[24..32].copy_from_slice(&entry.to_le_bytes());
    data[32..40].copy_from_slice(&(ELF64_EHDR_SIZE as u64).to_le_bytes());
    data[54..56].copy_from_slice(&(ELF64_PHDR_SIZE as u16).to_le_bytes());
    data[56..58].copy_from_slice(&phnum.to_le_bytes());

    let mut put = |idx: usize, p_type: u32, flags: u32, off: u64, vaddr: u64, filesz: u64, memsz: u64| {
        let base = ELF64_EHDR_SIZE + idx * ELF64_PHDR_SIZE;
        data[base..base + 4].copy_from_slice(&p_type.to_le_bytes());
        data[base + 4..base + 8].copy_from_slice(&flags.to_le_bytes());
        data[base + 8..base + 16].copy_from_slice(&off.to_le_bytes());
        data[base + 16..base + 24].copy_from_slice(&vaddr.to_le_bytes());
        data[base + 32..base + 40].copy_from_slice(&filesz.to_le_bytes());
        data[base + 40..base + 48].copy_from_slice(&memsz.to_le_bytes());
    };
    let code_end = code_end as u64;
    put(0, PT_LOAD, PF_R | PF_X, 0, 0, code_end, code_end);
    put(1, PT_LOAD, PF_R | PF_W, code_end, 0x1_0000, 16, 0x1000);
    if let Some(interp) = &interp {
        let len = interp.len() as u64;
        put(2, PT_INTERP, PF_R, interp_off as u64, interp_off as u64, len, len);
    }

    if let Some(interp) = &interp {
        data[interp_off..interp_off + interp.len()].copy_from_slice(interp);
    }
    data
}

// ============================================================================
// Rootfs fixtures
// ============================================================================

/// A rootfs laid out like a minimal Android system image.
pub struct TestRootfs {
    pub dir: TempDir,
}

impl TestRootfs {
    /// `bin/hello` linked against `system/bin/linker64`, plus the
    /// `/proc/self/exe` placeholder.
    pub fn android() -> Self {
        let rootfs = Self::bare();
        rootfs.write("system/bin/linker64", &aarch64_pie(LINKER_ENTRY, None));
        rootfs.write("proc/self/exe", b"");
        rootfs
    }

    /// Same as [`TestRootfs::android`] without the placeholder.
    pub fn without_self_exe() -> Self {
        let rootfs = Self::bare();
        rootfs.write("system/bin/linker64", &aarch64_pie(LINKER_ENTRY, None));
        rootfs
    }

    /// Same as [`TestRootfs::android`] without the linker.
    pub fn without_linker() -> Self {
        let rootfs = Self::bare();
        rootfs.write("proc/self/exe", b"");
        rootfs
    }

    fn bare() -> Self {
        let rootfs = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        rootfs.write("bin/hello", &aarch64_pie(PROGRAM_ENTRY, Some(LINKER)));
        rootfs
    }

    pub fn write(&self, guest: &str, data: &[u8]) {
        let host = self.dir.path().join(guest);
        fs::create_dir_all(host.parent().unwrap()).unwrap();
        fs::write(host, data).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn binary(&self) -> PathBuf {
        self.dir.path().join("bin/hello")
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::new([self.binary().display().to_string()], self.path())
    }
}

/// A writable scratch area at the bottom of the guest stack.
pub fn scratch(config: &SessionConfig) -> u64 {
    config.stack_top - config.stack_size + 0x1000
}

// ============================================================================
// Scripted CPU
// ============================================================================

/// One action of a scripted guest thread.
#[derive(Clone, Debug)]
pub enum Step {
    /// Store bytes into guest memory, as guest code would.
    Poke(u64, Vec<u8>),
    /// Issue `svc #0` with `x8 = nr` and the given arguments.
    Syscall(u64, Vec<u64>),
    /// Report a fault at the given address.
    Fault(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyscallRecord {
    pub tid: u32,
    pub nr: u64,
    pub ret: i64,
}

/// Per-thread scripts plus a shared log of syscall results seen in `x0`.
#[derive(Default)]
pub struct Scripts {
    steps: Mutex<HashMap<u32, Vec<Step>>>,
    records: Arc<Mutex<Vec<SyscallRecord>>>,
    started: AtomicUsize,
}

impl Scripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread(self, tid: u32, steps: Vec<Step>) -> Self {
        self.steps.lock().insert(tid, steps);
        self
    }

    /// CPU factory for [`aemu::Session::run`].
    pub fn cpu(&self, tid: u32) -> Box<dyn CpuBackend> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let steps = self.steps.lock().remove(&tid).unwrap_or_default();
        Box::new(ScriptedCpu {
            tid,
            steps: steps.into(),
            pending: None,
            records: Arc::clone(&self.records),
        })
    }

    /// Number of CPUs handed out.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<SyscallRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, tid: u32) -> Vec<SyscallRecord> {
        self.records().into_iter().filter(|r| r.tid == tid).collect()
    }
}

struct ScriptedCpu {
    tid: u32,
    steps: std::collections::VecDeque<Step>,
    pending: Option<u64>,
    records: Arc<Mutex<Vec<SyscallRecord>>>,
}

impl CpuBackend for ScriptedCpu {
    fn resume(&mut self, regs: &mut Aarch64Regs, memory: &AddressSpace) -> Trap {
        if let Some(nr) = self.pending.take() {
            self.records.lock().push(SyscallRecord {
                tid: self.tid,
                nr,
                ret: regs.get(0) as i64,
            });
        }

        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Poke(addr, data) => {
                    if let Err(fault) = memory.write(addr, &data) {
                        return Trap::Fault { pc: regs.pc, fault };
                    }
                    regs.pc += 4;
                }
                Step::Syscall(nr, args) => {
                    regs.set(8, nr);
                    for (i, arg) in args.into_iter().enumerate() {
                        regs.set(i, arg);
                    }
                    regs.pc += 4;
                    self.pending = Some(nr);
                    return Trap::Svc;
                }
                Step::Fault(addr) => {
                    return Trap::Fault {
                        pc: regs.pc,
                        fault: MemoryFault::Unmapped { addr },
                    };
                }
            }
        }
        Trap::Halt
    }
}

// ============================================================================
// Log capture
// ============================================================================

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's logs at `verbosity` into a buffer until the guard drops.
pub fn capture_logs(verbosity: Verbosity) -> (LogBuffer, DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let filter = verbosity
        .directives()
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(EnvFilter::new("off"), EnvFilter::add_directive);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(false)
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}
