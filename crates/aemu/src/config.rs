//! Session configuration.

use std::path::PathBuf;

/// How much the harness logs. The CLI turns this into `tracing` filter directives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Verbosity {
    /// Errors only.
    Off,
    /// Informational records, including every overridden syscall.
    #[default]
    Default,
    /// Adds raw payload dumps and loader details.
    Debug,
    /// Adds a record for every syscall the guest makes.
    Trace,
}

impl Verbosity {
    /// Crates whose log level this setting controls.
    const TARGETS: [&'static str; 4] = ["aemu", "aemu_syscall", "aemu_state", "aemu_elf"];

    /// Level name understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub const fn level(self) -> &'static str {
        match self {
            Self::Off => "error",
            Self::Default => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Filter directives (`target=level`) for every aemu crate.
    #[must_use]
    pub fn directives(self) -> Vec<String> {
        Self::TARGETS
            .iter()
            .map(|target| format!("{target}={}", self.level()))
            .collect()
    }
}

/// Emulation session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Guest argv. `argv[0]` is the host path of the binary to run.
    pub argv: Vec<String>,
    /// Host directory used as the guest's `/`.
    pub rootfs: PathBuf,
    /// Guest environment (`KEY=VALUE`).
    pub env: Vec<String>,
    /// Run guest threads on separate host threads.
    pub multithread: bool,
    /// Forward guest stdout/stderr to the host in addition to capturing it.
    pub echo_output: bool,
    /// Top of the main thread's stack (exclusive).
    pub stack_top: u64,
    pub stack_size: u64,
    /// Load address for position independent executables.
    pub load_bias: u64,
    /// Load address for the program interpreter.
    pub interp_base: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            argv: Vec::new(),
            rootfs: PathBuf::from("."),
            env: Vec::new(),
            multithread: false,
            echo_output: false,
            stack_top: 0x7fff_0000_0000,
            stack_size: 0x10_0000,
            load_bias: 0x55_5555_0000,
            interp_base: 0x7f_f7dd_0000,
        }
    }
}

impl SessionConfig {
    /// Create a config for `argv` inside `rootfs` with default layout.
    pub fn new<I, S>(argv: I, rootfs: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            rootfs: rootfs.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_multithread(mut self, multithread: bool) -> Self {
        self.multithread = multithread;
        self
    }

    #[must_use]
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }
}
