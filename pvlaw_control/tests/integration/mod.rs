mod feedforward;
mod loader;
mod properties;
mod scenarios;

use pvlaw_common::pv::sim::SimPvClient;
use pvlaw_common::run_control::NullRunControl;
use pvlaw_control::config::{CommandFile, ControlLawConfig};
use pvlaw_control::cycle::ControlLaw;
use pvlaw_control::signals::SignalFlags;
use std::fs;
use std::path::{Path, PathBuf};

// ─── Helpers ────────────────────────────────────────────────────────

/// Write `text` to `dir/name`.
pub fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

/// Signal flags private to one test.
pub fn private_flags() -> &'static SignalFlags {
    Box::leak(Box::new(SignalFlags::new()))
}

/// Command file whose data files live in `dir`, matrix in `matrix.toml`.
pub fn config_in(dir: &Path) -> ControlLawConfig {
    let mut c = ControlLawConfig::default();
    c.files.matrix = dir.join("matrix.toml");
    c
}

/// Engine over the simulated plant `sim`.
pub fn control_law(config: ControlLawConfig, dir: &Path, sim: &SimPvClient) -> ControlLaw {
    let command = CommandFile::from_config(config, Some(dir)).unwrap();
    ControlLaw::new(command, Box::new(sim.handle()), Box::new(NullRunControl::new()))
        .unwrap()
        .with_signal_flags(private_flags())
}

/// One readback (`BPM1`) driving two actuators (`HCM1`, `HCM2`).
pub const ONE_BY_TWO: &str = r#"
[columns]
ControlName = ["HCM1", "HCM2"]
BPM1 = [1.0, -2.0]
"#;

pub fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
