//! # PV Feed-Forward
//!
//! Drives actuators from 1-D or 2-D lookup tables of readbacks.

use clap::Parser;
use pvlaw_common::pv::registry::TransportRegistry;
use pvlaw_control::feedforward::{Feedforward, FeedforwardConfig, FeedforwardOverrides};
use pvlaw_control::signals;
use std::path::PathBuf;
use std::process;
use pvlaw_common::config::LogLevel;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// PV feed-forward: table interpolation from readbacks to actuators
#[derive(Parser, Debug)]
#[command(name = "pvlaw_feedforward")]
#[command(author = "pvlaw")]
#[command(version)]
#[command(about = "Table-driven PV feed-forward loop")]
struct Args {
    /// Command file (TOML).
    config: PathBuf,

    /// Seconds between iterations.
    #[arg(long)]
    interval: Option<f64>,

    /// Stop after this many iterations.
    #[arg(long)]
    steps: Option<u64>,

    /// Evaluate the tables but never write actuators.
    #[arg(long)]
    dry_run: bool,

    /// Extra directory searched for table files (repeatable).
    #[arg(long, value_name = "DIR")]
    search_path: Vec<PathBuf>,

    /// PV transport name.
    #[arg(long)]
    transport: Option<String>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let overrides = FeedforwardOverrides {
        interval: args.interval,
        steps: args.steps,
        dry_run: args.dry_run,
        search_path: args.search_path.clone(),
        transport: args.transport.clone(),
    };
    let loaded = FeedforwardConfig::load_file(&args.config, &overrides);
    let log_level = loaded
        .as_ref()
        .map_or(LogLevel::default(), |c| c.shared.log_level);
    setup_tracing(&args, log_level);

    info!("pvlaw_feedforward v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match loaded {
        Ok(config) => run(config),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(config: FeedforwardConfig) -> Result<(), Box<dyn std::error::Error>> {
    signals::install(false)?;

    let mut ff = Feedforward::with_transport(config, &TransportRegistry::with_builtin())?;
    let stats = ff.run()?;
    info!(
        "done: {} iterations, {} writes",
        stats.iterations, stats.writes
    );
    Ok(())
}

/// `--verbose` wins over the command file's `log_level`.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        log_level.as_level()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
