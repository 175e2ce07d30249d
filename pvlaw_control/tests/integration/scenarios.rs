//! End-to-end iterations of the matrix control law.

use pvlaw_common::pv::sim::{SimPvClient, SimResponse};
use pvlaw_control::config::{CommandFile, LimitSpec, Overrides};
use pvlaw_control::cycle::{Action, ControlLaw, STATUS_HOLDING, STATUS_STOPPED};
use pvlaw_control::error::ControlLawError;
use pvlaw_common::run_control::NullRunControl;
use std::thread;
use std::time::Duration;
use std::fs;
use tempfile::TempDir;

use super::{ONE_BY_TWO, close, config_in, control_law, private_flags, write};

fn one_by_two_plant(bpm: f64) -> SimPvClient {
    let sim = SimPvClient::new();
    sim.set_scalar("BPM1", bpm);
    sim.set_scalar("HCM1", 10.0);
    sim.set_scalar("HCM2", 20.0);
    sim
}

#[test]
fn correction_is_minus_gain_k_error() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(2.0);
    let mut c = config_in(dir.path());
    c.loop_.gain = 0.5;

    let mut law = control_law(c, dir.path(), &sim);
    let report = law.step_once().unwrap();
    assert_eq!(report.action, Action::Wrote);
    let correction = report.correction.unwrap();
    assert_eq!(correction.raw, vec![-1.0, 2.0]);
    assert_eq!(sim.scalar("HCM1"), Some(9.0));
    assert_eq!(sim.scalar("HCM2"), Some(22.0));
}

#[test]
fn delta_limit_scales_every_actuator_by_one_factor() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "matrix.toml",
        "[columns]\nControlName = [\"HCM1\", \"HCM2\"]\nBPM1 = [3.0, 1.5]\n",
    );
    let sim = SimPvClient::new();
    sim.set_scalar("BPM1", -1.0);
    sim.set_scalar("HCM1", 0.0);
    sim.set_scalar("HCM2", 0.0);
    let mut c = config_in(dir.path());
    c.limits.delta = Some(LimitSpec {
        value: Some(1.0),
        ..Default::default()
    });

    let mut law = control_law(c, dir.path(), &sim);
    let correction = law.step_once().unwrap().correction.unwrap();
    assert!(close(correction.scale, 1.0 / 3.0));
    assert!(close(sim.scalar("HCM1").unwrap(), 1.0));
    assert!(close(sim.scalar("HCM2").unwrap(), 0.5));
}

#[test]
fn action_gate_leaves_actuators_bit_identical() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(0.25);
    sim.set_scalar("HCM1", 0.1 + 0.2);
    let before = (sim.scalar("HCM1").unwrap(), sim.scalar("HCM2").unwrap());
    let mut c = config_in(dir.path());
    c.limits.action = Some(LimitSpec {
        value: Some(1.0),
        ..Default::default()
    });

    let mut law = control_law(c, dir.path(), &sim);
    let puts = sim.put_count();
    let report = law.step_once().unwrap();
    assert_eq!(report.action, Action::ActionGate);
    assert_eq!(sim.put_count(), puts);
    assert_eq!(
        (
            sim.scalar("HCM1").unwrap().to_bits(),
            sim.scalar("HCM2").unwrap().to_bits()
        ),
        (before.0.to_bits(), before.1.to_bits())
    );

    sim.set_scalar("BPM1", 1.5);
    assert_eq!(law.step_once().unwrap().action, Action::Wrote);
}

#[test]
fn partial_action_file_leaves_unlisted_readbacks_ungated() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "action.toml",
        "[columns]\nControlName = [\"OTHER\"]\nActionLimit = [1.0]\n",
    );
    let sim = one_by_two_plant(50.0);
    let mut c = config_in(dir.path());
    c.limits.action = Some(LimitSpec {
        file: Some("action.toml".into()),
        ..Default::default()
    });

    let mut law = control_law(c, dir.path(), &sim);
    assert_eq!(law.step_once().unwrap().action, Action::Wrote);
    assert_eq!(sim.scalar("HCM1"), Some(-40.0));
    assert_eq!(sim.scalar("HCM2"), Some(120.0));
}

#[test]
fn write_access_denied_skips_the_write() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(2.0);
    sim.set_writable("HCM1", false);
    let mut c = config_in(dir.path());
    c.loop_.write_check = true;

    let mut law = control_law(c, dir.path(), &sim);
    let puts = sim.put_count();
    assert_eq!(law.step_once().unwrap().action, Action::WriteDenied);
    assert_eq!(sim.put_count(), puts);
    assert_eq!(sim.scalar("HCM1"), Some(10.0));
    assert_eq!(sim.scalar("HCM2"), Some(20.0));

    sim.set_writable("HCM1", true);
    assert_eq!(law.step_once().unwrap().action, Action::Wrote);
    assert_eq!(sim.scalar("HCM1"), Some(8.0));
}

#[test]
fn failing_post_change_command_fails_the_iteration() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(2.0);
    let mut c = config_in(dir.path());
    c.output.post_change_command = Some("exit 3".to_string());

    let mut law = control_law(c, dir.path(), &sim);
    let err = law.step_once().unwrap_err();
    assert!(matches!(err, ControlLawError::Hook(_)), "{err}");
    assert!(!err.is_fatal());
    // the write itself went out before the command ran
    assert_eq!(sim.scalar("HCM1"), Some(8.0));
    assert_eq!(law.state().step, 1);
}

#[test]
fn exit_on_failure_ends_the_run() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "tests.toml",
        r#"
[columns]
ControlName = ["VAC1"]
MinimumValue = [0.0]
MaximumValue = [1.0]
ExitOnFailure = ["y"]
"#,
    );
    let sim = one_by_two_plant(2.0);
    sim.set_scalar("VAC1", 5.0);
    let mut c = config_in(dir.path());
    c.tests.file = Some("tests.toml".into());
    c.loop_.interval = 0.001;
    c.loop_.steps = Some(10);

    let mut law = control_law(c, dir.path(), &sim);
    let err = law.run().unwrap_err();
    match err {
        ControlLawError::TestFailure { name, value, .. } => {
            assert_eq!(name, "VAC1");
            assert_eq!(value, 5.0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(law.status(), STATUS_STOPPED);
    assert_eq!(sim.scalar("HCM1"), Some(10.0));
}

#[test]
fn reset_time_clears_filter_history() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "filter.toml",
        r#"
[columns]
DeviceName = ["HCM1", "HCM2"]
a0 = [1.0, 1.0]
a1 = [-0.5, 0.0]
b0 = [1.0, 1.0]
"#,
    );
    write(
        dir.path(),
        "tests.toml",
        r#"
[columns]
ControlName = ["VAC1"]
MinimumValue = [0.0]
MaximumValue = [1.0]
ResetTime = [0.02]
"#,
    );
    let sim = one_by_two_plant(2.0);
    sim.set_scalar("VAC1", 0.5);
    let mut c = config_in(dir.path());
    c.loop_.gain = 0.5;
    c.files.coefficients = Some("filter.toml".into());
    c.tests.file = Some("tests.toml".into());

    let mut law = control_law(c, dir.path(), &sim);
    let history = |law: &ControlLaw| {
        law.definition()
            .filters
            .as_ref()
            .unwrap()
            .filter(0)
            .unwrap()
            .compute(0.0)
    };
    assert_eq!(law.step_once().unwrap().action, Action::Wrote);
    assert!(close(history(&law), -0.5));

    sim.set_scalar("VAC1", 5.0);
    assert_eq!(law.step_once().unwrap().action, Action::OutOfRange);
    assert!(close(history(&law), -0.5));

    thread::sleep(Duration::from_millis(40));
    assert_eq!(law.step_once().unwrap().action, Action::OutOfRange);
    assert_eq!(history(&law), 0.0);
}

#[test]
fn termination_signal_stops_the_run_with_an_error() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(2.0);
    let mut c = config_in(dir.path());
    c.loop_.interval = 0.001;
    c.output.status_pv = Some("LOOP:STATUS".to_string());
    sim.set_string("LOOP:STATUS", "");

    let flags = private_flags();
    let command = CommandFile::from_config(c, Some(dir.path())).unwrap();
    let mut law = ControlLaw::new(command, Box::new(sim.handle()), Box::new(NullRunControl::new()))
        .unwrap()
        .with_signal_flags(flags);
    law.step_once().unwrap();
    flags.raise(libc::SIGTERM);

    let err = law.run().unwrap_err();
    assert!(matches!(err, ControlLawError::Signal("SIGTERM")), "{err}");
    assert!(err.is_fatal());
    assert_eq!(law.status(), STATUS_STOPPED);
    assert_eq!(sim.string("LOOP:STATUS").as_deref(), Some(STATUS_STOPPED));
    assert_eq!(law.stats().iterations, 1);
    assert_eq!(sim.scalar("HCM1"), Some(8.0));
}

#[test]
fn dry_run_computes_but_never_writes() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(2.0);
    let mut c = config_in(dir.path());
    c.loop_.dry_run = true;

    let mut law = control_law(c, dir.path(), &sim);
    let report = law.step_once().unwrap();
    assert_eq!(report.action, Action::DryRun);
    assert_eq!(report.correction.unwrap().values, vec![8.0, 24.0]);
    assert_eq!(sim.scalar("HCM1"), Some(10.0));
    assert_eq!(sim.scalar("HCM2"), Some(20.0));
    assert_eq!(law.stats().dry_runs, 1);
}

#[test]
fn failing_test_holds_then_releases() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "tests.toml",
        r#"
[columns]
ControlName = ["VAC1"]
MinimumValue = [0.0]
MaximumValue = [1.0]
"#,
    );
    let sim = one_by_two_plant(2.0);
    sim.set_scalar("VAC1", 5.0);
    let mut c = config_in(dir.path());
    c.tests.file = Some("tests.toml".into());

    let mut law = control_law(c, dir.path(), &sim);
    let report = law.step_once().unwrap();
    assert_eq!(report.action, Action::OutOfRange);
    assert_eq!(report.failed_tests.len(), 1);
    assert!(law.status().starts_with("Out of range"));
    assert_eq!(sim.scalar("HCM1"), Some(10.0));

    sim.set_scalar("VAC1", 0.5);
    assert_eq!(law.step_once().unwrap().action, Action::Wrote);
    assert_eq!(sim.scalar("HCM1"), Some(8.0));
}

#[test]
fn hold_off_after_tests_clear() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "tests.toml",
        r#"
[columns]
ControlName = ["VAC1"]
MinimumValue = [0.0]
MaximumValue = [1.0]
HoldOffTime = [60.0]
"#,
    );
    let sim = one_by_two_plant(2.0);
    sim.set_scalar("VAC1", 5.0);
    let mut c = config_in(dir.path());
    c.tests.file = Some("tests.toml".into());

    let mut law = control_law(c, dir.path(), &sim);
    assert_eq!(law.step_once().unwrap().action, Action::OutOfRange);
    sim.set_scalar("VAC1", 0.5);
    assert_eq!(law.step_once().unwrap().action, Action::HoldingOff);
    assert_eq!(law.status(), STATUS_HOLDING);
    assert_eq!(sim.scalar("HCM1"), Some(10.0));
}

#[test]
fn readback_failure_degrades_without_writing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let sim = one_by_two_plant(2.0);
    let mut law = control_law(config_in(dir.path()), dir.path(), &sim);

    sim.fail_reads("BPM1", true);
    assert_eq!(law.step_once().unwrap().action, Action::Degraded);
    assert_eq!(sim.scalar("HCM1"), Some(10.0));
    sim.fail_reads("BPM1", false);
    assert_eq!(law.step_once().unwrap().action, Action::Wrote);
    assert_eq!(law.stats().degraded, 1);
}

#[test]
fn glitch_flushes_history_oldest_first() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let glitch = dir.path().join("glitch.csv");
    let sim = one_by_two_plant(1.0);
    let mut c = config_in(dir.path());
    c.loop_.gain = 0.0;
    c.glitch.file = Some(glitch.clone());
    c.glitch.rows = 3;
    c.glitch.readback_rms = Some(5.0);

    let mut law = control_law(c, dir.path(), &sim);
    for _ in 0..5 {
        law.step_once().unwrap();
    }
    sim.set_scalar("BPM1", 10.0);
    law.step_once().unwrap();
    law.shutdown(None);

    let text = fs::read_to_string(&glitch).unwrap();
    let comments: Vec<&str> = text.lines().filter(|l| l.starts_with('#')).collect();
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("readback RMS"));
    let rows: Vec<&str> = text.lines().skip(1).filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows.len(), 4);
    assert!(rows[0].starts_with("2,"));
    assert!(rows[3].starts_with("5,"));
}

#[test]
fn quiet_loop_never_writes_glitch_rows() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let glitch = dir.path().join("glitch.csv");
    let sim = one_by_two_plant(1.0);
    let mut c = config_in(dir.path());
    c.loop_.gain = 0.0;
    c.glitch.file = Some(glitch.clone());
    c.glitch.readback_rms = Some(5.0);

    let mut law = control_law(c, dir.path(), &sim);
    for _ in 0..4 {
        law.step_once().unwrap();
    }
    drop(law);
    assert_eq!(fs::read_to_string(&glitch).unwrap().lines().count(), 1);
}

#[test]
fn hot_reload_swaps_configuration_or_keeps_it() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    let command_path = write(
        dir.path(),
        "loop.toml",
        "[loop]\ngain = 0.5\n\n[files]\nmatrix = \"matrix.toml\"\n",
    );
    let sim = one_by_two_plant(2.0);
    let command = CommandFile::load(&command_path, Overrides::default()).unwrap();
    let mut law = ControlLaw::new(command, Box::new(sim.handle()), Box::new(NullRunControl::new()))
        .unwrap()
        .with_signal_flags(private_flags());
    law.step_once().unwrap();
    assert_eq!(sim.scalar("HCM1"), Some(9.0));

    write(
        dir.path(),
        "loop.toml",
        "[loop]\ngain = 1.0\n\n[files]\nmatrix = \"matrix.toml\"\n",
    );
    law.reload().unwrap();
    assert_eq!(law.stats().reloads, 1);
    assert_eq!(law.state().gain, 1.0);
    law.step_once().unwrap();
    assert_eq!(sim.scalar("HCM1"), Some(7.0));

    write(
        dir.path(),
        "loop.toml",
        "[loop]\ngain = 2.0\n\n[files]\nmatrix = \"missing.toml\"\n",
    );
    law.reload().unwrap();
    assert_eq!(law.stats().reloads, 1);
    assert_eq!(law.state().gain, 1.0);
}

#[test]
fn simulated_plant_converges() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "matrix.toml",
        "[columns]\nControlName = [\"HCM1\"]\nBPM1 = [1.0]\n",
    );
    let sim = SimPvClient::new();
    sim.set_scalar("BPM1", 1.0);
    sim.set_scalar("HCM1", 0.0);
    sim.add_response(SimResponse {
        readback: "BPM1".to_string(),
        actuator: "HCM1".to_string(),
        coefficient: 1.0,
    });
    let mut c = config_in(dir.path());
    c.loop_.gain = 0.5;
    c.loop_.interval = 0.001;
    c.loop_.steps = Some(20);

    let mut law = control_law(c, dir.path(), &sim);
    let stats = law.run().unwrap();
    assert_eq!(stats.iterations, 20);
    assert_eq!(law.status(), STATUS_STOPPED);
    assert!(sim.scalar("BPM1").unwrap().abs() < 1e-3);
    assert!(close(sim.scalar("HCM1").unwrap(), -1.0 + sim.scalar("BPM1").unwrap()));
}
