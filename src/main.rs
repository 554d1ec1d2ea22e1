//! CLI entry point: run a command script against the simulator.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use repdb::{Coordinator, OutputOptions};

#[derive(Debug, Parser)]
#[clap(name = "repdb", version, about = "Run a replicated in-memory database over a command script")]
struct Args {
    /// Input script; reads stdin when omitted.
    #[clap(value_name = "IN_FILE")]
    input_file: Option<PathBuf>,

    /// Produce only the minimum output: reads, commits, aborts, and dumps.
    #[clap(long)]
    min_output: bool,

    /// Suppress write confirmations and blocked-write lines
    /// (only applicable with full output).
    #[clap(long)]
    no_write_log: bool,

    /// Turn off the optimization that skips newly recovered, not yet
    /// restored sites when acquiring write locks.
    #[clap(long)]
    no_rec_site_opt: bool,

    /// Diagnostic verbosity on stderr.
    #[clap(long, value_enum, value_name = "LEVEL", default_value = "none")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    None,
}

fn init_tracing(level: LogLevel) {
    let directive = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::None => "off",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directive))
        .with_writer(io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level);

    let options = OutputOptions {
        full_output: !args.min_output,
        log_writes: !args.no_write_log,
        recovered_site_opt: !args.no_rec_site_opt,
    };
    let mut coordinator = Coordinator::new(options);

    match &args.input_file {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open input file {}", path.display()))?;
            coordinator.run(BufReader::new(file))?;
        }
        None => {
            let stdin = io::stdin();
            coordinator.run(stdin.lock())?;
        }
    }

    tracing::info!(
        stats = %serde_json::to_string(coordinator.stats())?,
        "run complete"
    );
    Ok(())
}
