//! aemu CLI

mod cli;

use aemu::{Session, SessionConfig, hooks};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, EXIT_FAILURE, EXIT_SUCCESS};

fn main() {
    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        aemu::metrics::CliRecorder::new().install()
    } else {
        None
    };
    aemu::metrics::init();

    let filter = cli
        .verbosity()
        .directives()
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let exit_code = match &cli.command {
        Commands::Check {
            rootfs,
            binary,
            env,
            args,
        } => {
            let mut argv = vec![binary.display().to_string()];
            argv.extend(args.iter().cloned());
            let config = SessionConfig::new(argv, rootfs.clone()).with_env(env.iter().cloned());
            cmd_check(config)
        }
    };

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }
    std::process::exit(exit_code);
}

fn cmd_check(config: SessionConfig) -> i32 {
    let mut session = match Session::new(config) {
        Ok(session) => session,
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    };
    hooks::install_android_hooks(session.registry());

    let loaded = match session.load() {
        Ok(loaded) => loaded.clone(),
        Err(e) => {
            error!("{e}");
            return EXIT_FAILURE;
        }
    };

    println!("rootfs:       {}", session.rootfs().root().display());
    println!("program:      {}", session.exe_path());
    println!("entry:        {:#x}", loaded.program.entry);
    match (&loaded.interpreter_path, &loaded.interpreter) {
        (Some(path), Some(interp)) => {
            println!("interpreter:  {path} @ {:#x}", interp.bias);
        }
        (Some(path), None) => println!("interpreter:  {path} (missing)"),
        (None, _) => println!("interpreter:  none"),
    }
    println!("start pc:     {:#x}", loaded.start_pc);
    println!("initial sp:   {:#x}", loaded.initial_sp);
    println!("brk:          {:#x}", loaded.brk);

    println!("regions:");
    for (base, len, prot) in session.memory().regions() {
        println!("  {base:#014x}-{:#014x} {prot}", base + len);
    }

    let overrides: Vec<String> = session
        .registry()
        .numbers()
        .into_iter()
        .map(|n| format!("{n} ({})", aemu::nr::name(n).unwrap_or("unknown")))
        .collect();
    println!("overrides:    {}", overrides.join(", "));

    EXIT_SUCCESS
}
