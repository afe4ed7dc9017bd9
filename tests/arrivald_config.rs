use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use arrival_forecast::config::ArrivaldConfig;
use arrival_forecast::{ArrivalMode, ObjectClass};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ARRIVAL_CONFIG",
        "ARRIVAL_DB_PATH",
        "ARRIVAL_CAPTURE_DIR",
        "ARRIVAL_TARGET_CLASS",
        "ARRIVAL_MODE",
        "ARRIVAL_LINE_X",
        "ARRIVAL_COOLDOWN_SECS",
        "ARRIVAL_STALE_SECS",
        "ARRIVAL_RECOMPUTE_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ArrivaldConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "arrivals.db");
    assert_eq!(cfg.capture_dir.as_deref(), Some(std::path::Path::new("bus_captures")));
    assert_eq!(cfg.target_class, ObjectClass::Bus);
    assert_eq!(cfg.mode, ArrivalMode::Crossing);
    assert_eq!(cfg.tracker.line_x, None);
    assert_eq!(cfg.tracker.stale_after.as_secs(), 30);
    assert_eq!(cfg.dedup.cooldown.as_secs(), 60);
    assert_eq!(cfg.dedup.min_confidence, 0.4);
    assert_eq!(cfg.frame_interval.as_millis(), 250);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "stop_42.db",
        "capture_dir": "/var/lib/arrivals/captures",
        "target_class": "bus",
        "mode": "cooldown",
        "frame_interval_ms": 500,
        "recompute_secs": 120,
        "tracker": { "line_x": 320.0, "min_confidence": 0.6, "stale_secs": 45 },
        "dedup": { "min_confidence": 0.5, "cooldown_secs": 90 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("ARRIVAL_CONFIG", file.path());
    std::env::set_var("ARRIVAL_MODE", "crossing");
    std::env::set_var("ARRIVAL_COOLDOWN_SECS", "30");
    std::env::set_var("ARRIVAL_LINE_X", "700");

    let cfg = ArrivaldConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "stop_42.db");
    assert_eq!(
        cfg.capture_dir.as_deref(),
        Some(std::path::Path::new("/var/lib/arrivals/captures"))
    );
    assert_eq!(cfg.mode, ArrivalMode::Crossing);
    assert_eq!(cfg.tracker.line_x, Some(700.0));
    assert_eq!(cfg.tracker.min_confidence, 0.6);
    assert_eq!(cfg.tracker.stale_after.as_secs(), 45);
    assert_eq!(cfg.dedup.min_confidence, 0.5);
    assert_eq!(cfg.dedup.cooldown.as_secs(), 30);
    assert_eq!(cfg.frame_interval.as_millis(), 500);
    assert_eq!(cfg.recompute_interval.as_secs(), 120);

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.mode, ArrivalMode::Crossing);
    assert_eq!(settings.min_frame_interval.as_millis(), 500);

    clear_env();
}

#[test]
fn loads_toml_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
db_path = "toml.db"
target_class = "truck"

[tracker]
stale_secs = 10
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("ARRIVAL_CONFIG", file.path());
    std::env::set_var("ARRIVAL_CAPTURE_DIR", "");

    let cfg = ArrivaldConfig::load().expect("load toml config");
    assert_eq!(cfg.db_path, "toml.db");
    assert_eq!(cfg.target_class, ObjectClass::Truck);
    assert_eq!(cfg.tracker.target_class, ObjectClass::Truck);
    assert_eq!(cfg.dedup.target_class, ObjectClass::Truck);
    assert_eq!(cfg.tracker.stale_after.as_secs(), 10);
    assert_eq!(cfg.capture_dir, None);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ARRIVAL_MODE", "sideways");
    assert!(ArrivaldConfig::load().is_err());
    clear_env();

    std::env::set_var("ARRIVAL_STALE_SECS", "soon");
    assert!(ArrivaldConfig::load().is_err());
    clear_env();

    std::env::set_var("ARRIVAL_TARGET_CLASS", "giraffe");
    let err = ArrivaldConfig::load().unwrap_err();
    assert!(err.to_string().contains("target class"));
    clear_env();

    std::env::set_var("ARRIVAL_RECOMPUTE_SECS", "0");
    assert!(ArrivaldConfig::load().is_err());
    clear_env();

    std::env::set_var("ARRIVAL_STALE_SECS", u64::MAX.to_string());
    let err = ArrivaldConfig::load().unwrap_err();
    assert!(err.to_string().contains("tracker.stale_secs"));
    clear_env();

    std::env::set_var("ARRIVAL_COOLDOWN_SECS", "31536001");
    assert!(ArrivaldConfig::load().is_err());
    clear_env();
}

#[test]
fn one_year_spans_are_accepted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ARRIVAL_STALE_SECS", "31536000");
    let cfg = ArrivaldConfig::load().expect("one year is within bounds");
    assert_eq!(cfg.tracker.stale_after.as_secs(), 31_536_000);
    clear_env();
}

#[test]
fn empty_capture_dir_in_file_disables_snapshots() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "capture_dir": "" }"#)
        .expect("write config");
    std::env::set_var("ARRIVAL_CONFIG", file.path());

    let cfg = ArrivaldConfig::load().expect("load config");
    assert_eq!(cfg.capture_dir, None);

    clear_env();
}
