//! Loading complete definitions from command files and data files.

use pvlaw_control::config::{CommandFile, ControlLawConfig, LimitSpec, WaveformLinkConfig};
use pvlaw_control::error::{ControlLawError, ErrorClass};
use pvlaw_control::loader;
use pvlaw_control::model::{Bounds, Limits, LoopDefinition, Source};
use tempfile::TempDir;

use super::{ONE_BY_TWO, config_in, write};

fn load(config: ControlLawConfig, dir: &TempDir) -> Result<LoopDefinition, ControlLawError> {
    loader::load(&CommandFile::from_config(config, Some(dir.path())).unwrap())
}

#[test]
fn xref_maps_symbolic_names_to_pvs() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "xref.toml",
        r#"
[columns]
SymbolicName = ["BPM1", "HCM1", "HCM2"]
ControlName = ["S1:BPM1:X", "S1:HCM1:SetCurrent", "S1:HCM2:SetCurrent"]
"#,
    );
    let mut c = config_in(dir.path());
    c.files.xref = Some("xref.toml".into());

    let def = load(c, &dir).unwrap();
    assert_eq!(def.readbacks.pv_names(), vec!["S1:BPM1:X"]);
    assert_eq!(
        def.actuators.pv_names(),
        vec!["S1:HCM1:SetCurrent", "S1:HCM2:SetCurrent"]
    );
    assert_eq!(def.actuators.symbolic_names(), vec!["HCM1", "HCM2"]);
}

#[test]
fn xref_reports_every_unmatched_name() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "xref.toml",
        "[columns]\nSymbolicName = [\"BPM1\"]\nControlName = [\"S1:BPM1:X\"]\n",
    );
    let mut c = config_in(dir.path());
    c.files.xref = Some("xref.toml".into());

    match load(c, &dir).unwrap_err() {
        ControlLawError::Unmatched { names, .. } => assert_eq!(names, vec!["HCM1", "HCM2"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn waveform_rows_sorted_by_index() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "matrix.toml",
        "[columns]\nControlName = [\"HCM1\"]\nBPM1 = [1.0]\nBPM2 = [1.0]\n",
    );
    write(
        dir.path(),
        "orbit.toml",
        "[columns]\nDeviceName = [\"BPM2\", \"BPM1\"]\nIndex = [7, 3]\n",
    );
    let mut c = config_in(dir.path());
    c.waveforms.readback.push(WaveformLinkConfig {
        pv: "S1:ORBIT:X".to_string(),
        file: "orbit.toml".into(),
    });

    let def = load(c, &dir).unwrap();
    assert_eq!(def.readbacks.waveforms(), ["S1:ORBIT:X".to_string()]);
    assert!(matches!(
        def.readbacks.get(0).unwrap().source,
        Source::Waveform { waveform: 0, index: 3 }
    ));
    assert!(matches!(
        def.readbacks.get(1).unwrap().source,
        Source::Waveform { waveform: 0, index: 7 }
    ));
    assert_eq!(def.pv_names(), vec!["S1:ORBIT:X", "HCM1"]);
}

#[test]
fn zero_a0_rejected_at_load() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "coef.toml",
        r#"
[columns]
DeviceName = ["HCM1", "HCM2"]
a0 = [1.0, 0.0]
b0 = [1.0, 1.0]
"#,
    );
    let mut c = config_in(dir.path());
    c.files.coefficients = Some("coef.toml".into());

    let err = load(c, &dir).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(err.is_fatal());
}

#[test]
fn per_channel_limit_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "matrix.toml", ONE_BY_TWO);
    write(
        dir.path(),
        "delta.toml",
        "[columns]\nControlName = [\"HCM2\"]\nDeltaLimit = [0.5]\n",
    );
    let mut c = config_in(dir.path());
    c.limits.delta = Some(LimitSpec {
        file: Some("delta.toml".into()),
        ..Default::default()
    });

    let def = load(c, &dir).unwrap();
    let limits = def.delta_limits.unwrap();
    assert_eq!(limits.bounds(0), None);
    assert_eq!(limits.bounds(1), Some(Bounds::symmetric(0.5)));
    assert!(matches!(limits, Limits::PerChannel(_)));
}

#[test]
fn missing_data_file_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let c = config_in(dir.path());
    let err = load(c, &dir).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
}
