//! `tally` -- job-accounting and artifact store CLI.
//!
//! Parses arguments with clap, resolves the runtime context (config file,
//! data directory), and dispatches to command handlers.

mod cli;
mod commands;
mod context;

use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use cli::{Cli, Commands};
use context::RuntimeContext;

/// Tracks whether a Ctrl+C has already been received.
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

fn main() {
    // First Ctrl+C: exit cleanly. Second: force exit.
    let _ = ctrlc::set_handler(|| {
        if CTRLC_RECEIVED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        std::process::exit(0);
    });

    let cli = Cli::parse();
    let ctx = RuntimeContext::from_global_args(&cli.global);

    if ctx.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("tally=debug,tally_storage=debug,tally_usage=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Commands::Init(args) => commands::init::run(&ctx, &args),
        Commands::List(args) => commands::jobs::run_list(&ctx, &args),
        Commands::Show(args) => commands::jobs::run_show(&ctx, &args),
        Commands::Search(args) => commands::jobs::run_search(&ctx, &args),
        Commands::Stats => commands::stats::run_stats(&ctx),
        Commands::Health => commands::stats::run_health(&ctx),
        Commands::Export(args) => commands::maintenance::run_export(&ctx, &args),
        Commands::Verify => commands::maintenance::run_verify(&ctx),
        Commands::Rollup(args) => commands::maintenance::run_rollup(&ctx, &args),
        Commands::Maintenance(args) => commands::maintenance::run(&ctx, &args),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
