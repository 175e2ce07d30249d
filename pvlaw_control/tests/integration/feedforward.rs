//! Feed-forward loop from a command file on disk.

use pvlaw_common::pv::sim::SimPvClient;
use pvlaw_common::run_control::NullRunControl;
use pvlaw_control::error::ErrorClass;
use pvlaw_control::feedforward::{Feedforward, FeedforwardConfig, FeedforwardOverrides};
use tempfile::TempDir;

use super::{close, private_flags, write};

const GAP_GRID: &str = r#"
[parameters]
Readback1Name = "ID:GAP"
Readback2Name = "ID:PHASE"
ActuatorName = "S1:QF"

[columns]
Readback1Value = [0.0, 0.0, 1.0, 1.0]
Readback2Value = [0.0, 1.0, 0.0, 1.0]
ActuatorValue = [0.0, 1.0, 2.0, 3.0]
"#;

fn command(dir: &TempDir, extra: &str) -> FeedforwardConfig {
    let path = write(
        dir.path(),
        "ff.toml",
        &format!("[shared]\nservice_name = \"id-ff\"\n\n[feedforward]\nfiles = [\"grid.toml\"]\n{extra}"),
    );
    FeedforwardConfig::load_file(&path, &FeedforwardOverrides::default()).unwrap()
}

fn plant(gap: f64, phase: f64) -> SimPvClient {
    let sim = SimPvClient::new();
    sim.set_scalar("ID:GAP", gap);
    sim.set_scalar("ID:PHASE", phase);
    sim.set_scalar("S1:QF", 0.0);
    sim
}

fn runner(config: FeedforwardConfig, sim: &SimPvClient) -> Feedforward {
    Feedforward::new(config, Box::new(sim.handle()), Box::new(NullRunControl::new()))
        .unwrap()
        .with_signal_flags(private_flags())
}

#[test]
fn grid_midpoint_is_written() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "grid.toml", GAP_GRID);
    let sim = plant(0.5, 0.5);
    let mut ff = runner(command(&dir, ""), &sim);

    let report = ff.step_once().unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.out_of_range, 0);
    assert!(close(sim.scalar("S1:QF").unwrap(), 1.5));
}

#[test]
fn out_of_range_clamps_to_edge() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "grid.toml", GAP_GRID);
    let sim = plant(4.0, 1.0);
    let mut ff = runner(command(&dir, ""), &sim);

    let report = ff.step_once().unwrap();
    assert_eq!(report.out_of_range, 1);
    assert!(close(sim.scalar("S1:QF").unwrap(), 3.0));
}

#[test]
fn unsorted_grid_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "grid.toml",
        &GAP_GRID.replace("[0.0, 0.0, 1.0, 1.0]", "[1.0, 1.0, 0.0, 0.0]"),
    );
    let sim = plant(0.5, 0.5);
    let err = Feedforward::new(
        command(&dir, ""),
        Box::new(sim.handle()),
        Box::new(NullRunControl::new()),
    )
    .err()
    .unwrap();
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[test]
fn run_follows_moving_readbacks() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "grid.toml", GAP_GRID);
    let sim = plant(0.0, 0.0);
    let mut ff = runner(command(&dir, "interval = 0.001\nsteps = 2\n"), &sim);
    let stats = ff.run().unwrap();
    assert_eq!(stats.iterations, 2);
    assert!(close(sim.scalar("S1:QF").unwrap(), 0.0));

    sim.set_scalar("ID:GAP", 1.0);
    let mut ff = runner(command(&dir, "interval = 0.001\nsteps = 1\n"), &sim);
    ff.run().unwrap();
    assert!(close(sim.scalar("S1:QF").unwrap(), 2.0));
}

#[test]
fn missing_connection_is_fatal() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "grid.toml", GAP_GRID);
    let sim = SimPvClient::new();
    sim.set_scalar("ID:GAP", 0.0);
    let err = Feedforward::new(
        command(&dir, ""),
        Box::new(sim.handle()),
        Box::new(NullRunControl::new()),
    )
    .err()
    .unwrap();
    assert_eq!(err.class(), ErrorClass::Connection);
}
