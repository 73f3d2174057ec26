//! Emulation session: rootfs, address space, syscalls and guest threads.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;

use aemu_elf::ElfImage;
use aemu_state::{AddressSpace, Aarch64Regs};
use aemu_syscall::{ExitRequest, SyscallContext, SyscallHandler, SyscallRegistry, handle_svc};
use metrics::counter;
use tracing::{debug, debug_span, error, info, warn};

use crate::builtin::BuiltinSyscalls;
use crate::config::SessionConfig;
use crate::cpu::{CpuBackend, Trap};
use crate::loader::{self, LoadedImage, MappedImage, StackSpec};
use crate::rootfs::Rootfs;
use crate::{Error, Result};

/// Guest process id. The main thread's tid equals it.
const GUEST_PID: u32 = 1000;

/// Exit status reported for threads stopped by a fatal fault (128 + SIGSEGV).
const FAULT_EXIT_CODE: i32 = 139;

/// A guest thread waiting to run.
#[derive(Clone, Debug)]
pub struct GuestThread {
    pub tid: u32,
    pub regs: Aarch64Regs,
}

/// How one guest thread finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadReport {
    pub tid: u32,
    pub exit_code: i32,
    /// Number of `svc` traps serviced for this thread.
    pub syscalls: u64,
}

/// Result of [`Session::run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Process exit status: the `exit_group` code, or the main thread's status.
    pub exit_code: i32,
    pub threads: Vec<ThreadReport>,
    /// Everything the guest wrote to stdout and stderr.
    pub stdout: Vec<u8>,
}

/// One emulated Android process.
///
/// Creating a session checks the rootfs preconditions; nothing is mapped until
/// [`Session::load`]. Dropping the session clears the override registry.
pub struct Session {
    config: SessionConfig,
    rootfs: Rootfs,
    exe_path: String,
    memory: AddressSpace,
    registry: Arc<SyscallRegistry>,
    builtins: BuiltinSyscalls,
    loaded: Option<LoadedImage>,
    threads: Vec<GuestThread>,
    next_tid: u32,
}

impl Session {
    /// Validate `config` and prepare an empty process.
    ///
    /// # Errors
    ///
    /// Fails before any emulation step if argv is empty, the rootfs is not a
    /// directory, or the rootfs has no `/proc/self/exe` placeholder.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let program = config.argv.first().ok_or(Error::NoProgram)?;
        let rootfs = Rootfs::open(&config.rootfs)?;
        rootfs.check_self_exe()?;

        let host = Path::new(program);
        let exe_path = rootfs.guest_path(host).unwrap_or_else(|| {
            let name = host.file_name().map(|n| n.to_string_lossy().into_owned());
            format!("/{}", name.unwrap_or_default())
        });
        debug!(rootfs = %rootfs.root().display(), exe = %exe_path, "session created");

        let builtins = BuiltinSyscalls::new(rootfs.clone(), exe_path.clone(), config.echo_output);
        Ok(Self {
            config,
            rootfs,
            exe_path,
            memory: AddressSpace::new(),
            registry: Arc::new(SyscallRegistry::new()),
            builtins,
            loaded: None,
            threads: Vec::new(),
            next_tid: GUEST_PID,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The override registry. Handlers registered here take precedence over
    /// the built-in table for every guest thread.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SyscallRegistry> {
        &self.registry
    }

    /// Install `handler` for syscall `nr`, returning the one it replaces.
    pub fn set_syscall(&self, nr: u64, handler: SyscallHandler) -> Option<SyscallHandler> {
        self.registry.register_handler(nr, handler)
    }

    #[must_use]
    pub const fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    #[must_use]
    pub const fn rootfs(&self) -> &Rootfs {
        &self.rootfs
    }

    /// Guest path of the program (what `/proc/self/exe` resolves to).
    #[must_use]
    pub fn exe_path(&self) -> &str {
        &self.exe_path
    }

    #[must_use]
    pub const fn loaded(&self) -> Option<&LoadedImage> {
        self.loaded.as_ref()
    }

    #[must_use]
    pub fn pending_threads(&self) -> &[GuestThread] {
        &self.threads
    }

    /// Map the program (and its interpreter), build the stack and create the
    /// main thread. Loading twice returns the first result.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be read, parsed or mapped.
    pub fn load(&mut self) -> Result<&LoadedImage> {
        let loaded = match self.loaded.take() {
            Some(loaded) => loaded,
            None => {
                let loaded = self.load_image()?;
                self.spawn_thread(Aarch64Regs::new(loaded.start_pc, loaded.initial_sp));
                loaded
            }
        };
        Ok(self.loaded.insert(loaded))
    }

    fn load_image(&self) -> Result<LoadedImage> {
        let host = Path::new(&self.config.argv[0]);
        let data = fs::read(host)?;
        let image = ElfImage::parse(&data)?;
        let bias = if image.pie { self.config.load_bias } else { 0 };
        let program = loader::map_image(&self.memory, &image, bias)?;
        info!(
            path = %host.display(),
            entry = format_args!("{:#x}", program.entry),
            pie = image.pie,
            "loaded program"
        );

        let interpreter = match &image.interpreter {
            Some(path) => self.load_interpreter(path)?,
            None => None,
        };
        let interp_base = interpreter.map_or(0, |i: MappedImage| i.bias);

        let mut argv = self.config.argv.clone();
        argv[0].clone_from(&self.exe_path);
        let spec = StackSpec {
            argv: &argv,
            env: &self.config.env,
            exe_path: &self.exe_path,
            program: &program,
            interp_base,
        };
        let initial_sp = loader::build_stack(
            &self.memory,
            self.config.stack_top,
            self.config.stack_size,
            &spec,
        )?;

        let brk = program.end;
        self.builtins.set_brk(brk);
        Ok(LoadedImage {
            start_pc: interpreter.map_or(program.entry, |i| i.entry),
            initial_sp,
            brk,
            program,
            interpreter,
            interpreter_path: image.interpreter,
        })
    }

    fn load_interpreter(&self, path: &str) -> Result<Option<MappedImage>> {
        let Ok(host) = self.rootfs.require_file(path) else {
            warn!(interpreter = path, "interpreter missing from rootfs, starting at program entry");
            return Ok(None);
        };
        let data = fs::read(&host)?;
        let image = ElfImage::parse(&data)?;
        let bias = if image.pie { self.config.interp_base } else { 0 };
        let mapped = loader::map_image(&self.memory, &image, bias)?;
        info!(
            interpreter = path,
            base = format_args!("{bias:#x}"),
            entry = format_args!("{:#x}", mapped.entry),
            "loaded interpreter"
        );
        Ok(Some(mapped))
    }

    /// Queue a guest thread starting from `regs`. Returns its tid.
    pub fn spawn_thread(&mut self, regs: Aarch64Regs) -> u32 {
        let tid = self.next_tid;
        self.next_tid += 1;
        debug!(tid, pc = format_args!("{:#x}", regs.pc), "thread queued");
        self.threads.push(GuestThread { tid, regs });
        tid
    }

    /// Run every queued thread to completion, loading the program first if
    /// needed.
    ///
    /// `factory` is asked for one CPU backend per thread, on the host thread
    /// that will drive it.
    ///
    /// # Errors
    ///
    /// Returns loading errors, or [`Error::GuestFault`] if a thread faulted.
    pub fn run<F>(&mut self, factory: F) -> Result<RunReport>
    where
        F: Fn(u32) -> Box<dyn CpuBackend> + Sync,
    {
        self.load()?;
        let threads = std::mem::take(&mut self.threads);
        let process = Process {
            memory: &self.memory,
            registry: &self.registry,
            builtins: &self.builtins,
            pid: GUEST_PID,
            group_exit: AtomicBool::new(false),
            group_code: AtomicI32::new(0),
        };

        let results: Vec<Result<ThreadReport>> = if self.config.multithread {
            let dispatch = tracing::dispatcher::get_default(Clone::clone);
            thread::scope(|scope| {
                let handles: Vec<_> = threads
                    .into_iter()
                    .map(|guest| {
                        let dispatch = dispatch.clone();
                        let process = &process;
                        let factory = &factory;
                        scope.spawn(move || {
                            tracing::dispatcher::with_default(&dispatch, || {
                                process.run_thread(guest, factory)
                            })
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        } else {
            threads
                .into_iter()
                .map(|guest| process.run_thread(guest, &factory))
                .collect()
        };

        let threads = results.into_iter().collect::<Result<Vec<_>>>()?;
        let exit_code = if process.group_exit.load(Ordering::Acquire) {
            process.group_code.load(Ordering::Acquire)
        } else {
            threads
                .iter()
                .find(|t| t.tid == GUEST_PID)
                .or_else(|| threads.first())
                .map_or(0, |t| t.exit_code)
        };
        info!(exit_code, threads = threads.len(), "guest exited");

        let report = RunReport {
            exit_code,
            threads,
            stdout: self.builtins.take_output(),
        };
        crate::metrics::record_run(&report);
        Ok(report)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.registry.clear();
    }
}

/// State shared by the guest threads of one run.
struct Process<'a> {
    memory: &'a AddressSpace,
    registry: &'a SyscallRegistry,
    builtins: &'a BuiltinSyscalls,
    pid: u32,
    group_exit: AtomicBool,
    group_code: AtomicI32,
}

impl Process<'_> {
    fn stop_all(&self, code: i32) {
        self.group_code.store(code, Ordering::Release);
        self.group_exit.store(true, Ordering::Release);
    }

    fn stopped(&self) -> Option<i32> {
        self.group_exit
            .load(Ordering::Acquire)
            .then(|| self.group_code.load(Ordering::Acquire))
    }

    fn run_thread<F>(&self, mut guest: GuestThread, factory: &F) -> Result<ThreadReport>
    where
        F: Fn(u32) -> Box<dyn CpuBackend>,
    {
        let tid = guest.tid;
        let _span = debug_span!("thread", tid).entered();
        let report = |exit_code, syscalls| ThreadReport {
            tid,
            exit_code,
            syscalls,
        };

        if let Some(code) = self.stopped() {
            return Ok(report(code, 0));
        }
        counter!("aemu_guest_threads_total").increment(1);

        let mut cpu = factory(tid);
        let mut syscalls = 0;
        loop {
            if let Some(code) = self.stopped() {
                debug!(code, "stopped by exit_group");
                return Ok(report(code, syscalls));
            }

            match cpu.resume(&mut guest.regs, self.memory) {
                Trap::Svc => {
                    syscalls += 1;
                    let mut ctx = SyscallContext::new(self.memory, self.pid, tid);
                    handle_svc(&mut guest.regs, self.registry, self.builtins, &mut ctx);
                    match ctx.take_exit() {
                        Some(ExitRequest::Thread(code)) => {
                            debug!(code, "thread exited");
                            return Ok(report(code, syscalls));
                        }
                        Some(ExitRequest::Group(code)) => {
                            debug!(code, "exit_group");
                            self.stop_all(code);
                            return Ok(report(code, syscalls));
                        }
                        None => {}
                    }
                }
                Trap::Halt => return Ok(report(0, syscalls)),
                Trap::Fault { pc, fault } => {
                    error!(pc = format_args!("{pc:#x}"), %fault, "guest fault");
                    counter!("aemu_guest_faults_total").increment(1);
                    self.stop_all(FAULT_EXIT_CODE);
                    return Err(Error::GuestFault { tid, pc, fault });
                }
            }
        }
    }
}
