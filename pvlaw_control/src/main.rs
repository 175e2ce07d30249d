//! # PV Control Law
//!
//! Runs one matrix control law described by a TOML command file. In server
//! mode the process owns a PID file, re-reads the command file on SIGUSR1
//! and exits cleanly on SIGUSR2.

use clap::Parser;
use pvlaw_common::pv::registry::TransportRegistry;
use pvlaw_control::config::{CommandFile, Overrides};
use pvlaw_control::cycle::ControlLaw;
use pvlaw_control::server::PidFile;
use pvlaw_control::signals;
use std::path::PathBuf;
use std::process;
use pvlaw_common::config::LogLevel;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// PV control law: matrix feedback over process variables
#[derive(Parser, Debug)]
#[command(name = "pvlaw_control")]
#[command(author = "pvlaw")]
#[command(version)]
#[command(about = "Generalized PV feedback control law")]
struct Args {
    /// Command file (TOML).
    config: PathBuf,

    /// Loop gain.
    #[arg(long)]
    gain: Option<f64>,

    /// Seconds between iterations.
    #[arg(long)]
    interval: Option<f64>,

    /// Stop after this many iterations.
    #[arg(long)]
    steps: Option<u64>,

    /// Compute and log everything but never write actuators.
    #[arg(long)]
    dry_run: bool,

    /// Readback samples averaged per iteration.
    #[arg(long)]
    average: Option<usize>,

    /// Extra directory searched for data files (repeatable).
    #[arg(long, value_name = "DIR")]
    search_path: Vec<PathBuf>,

    /// Run as a long-lived server with hot reload.
    #[arg(long)]
    server: bool,

    /// PID file for server mode.
    #[arg(long, value_name = "FILE")]
    pid_file: Option<PathBuf>,

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

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            gain: self.gain,
            interval: self.interval,
            steps: self.steps,
            dry_run: self.dry_run,
            average: self.average,
            search_path: self.search_path.clone(),
            transport: self.transport.clone(),
            server: self.server,
            pid_file: self.pid_file.clone(),
        }
    }
}

fn main() {
    let args = Args::parse();
    let loaded = CommandFile::load(&args.config, args.overrides());
    let log_level = loaded
        .as_ref()
        .map_or(LogLevel::default(), |c| c.config.shared.log_level);
    setup_tracing(&args, log_level);

    info!("pvlaw_control v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match loaded {
        Ok(command) => run(command),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(command: CommandFile) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &command.path {
        info!("loaded {}", path.display());
    }

    let server = command.config.server.enabled;
    signals::install(server)?;
    let _pid_file = match (&command.config.server.pid_file, server) {
        (Some(path), true) => Some(PidFile::claim(path)?),
        _ => None,
    };

    let mut law = ControlLaw::with_transport(command, &TransportRegistry::with_builtin())?;
    let stats = law.run()?;
    info!(
        "done: {} iterations, {} writes, {} reloads",
        stats.iterations, stats.writes, stats.reloads
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
