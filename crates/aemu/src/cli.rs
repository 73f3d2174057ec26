//! CLI definitions.

use std::path::PathBuf;

use aemu::Verbosity;
use clap::{Parser, Subcommand};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "aemu")]
#[command(about = "Boot AArch64 Android binaries in an emulated rootfs")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (payload dumps and loader details)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    /// Print a metrics summary on exit
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Explicit log level, overriding --verbose and --silent
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<Verbosity>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub const fn verbosity(&self) -> Verbosity {
        match (self.log_level, self.verbose, self.silent) {
            (Some(level), _, _) => level,
            (None, true, _) => Verbosity::Debug,
            (None, _, true) => Verbosity::Off,
            (None, false, false) => Verbosity::Default,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check rootfs preconditions, load a binary and show the initial process
    Check {
        /// Host directory used as the guest's root filesystem
        #[arg(long, value_name = "DIR")]
        rootfs: PathBuf,

        /// Host path of the AArch64 binary (normally inside the rootfs)
        #[arg(value_name = "BINARY")]
        binary: PathBuf,

        /// Guest environment entries (KEY=VALUE)
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Arguments passed to the guest
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}
