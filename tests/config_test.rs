//! Tests for loading and saving engine configuration files

mod common;

use std::time::Duration;
use stepflow::{EngineConfig, GraphError, Group, TimingMode};

#[test]
fn test_toml_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("engine.toml");

    let mut config = EngineConfig::default();
    config.default_period_ms = 4;
    config.default_timing_mode = TimingMode::FixedStep;
    config.logging.filter = "stepflow=trace".to_string();
    config.save(&path).unwrap();

    assert!(path.exists());
    assert_eq!(EngineConfig::load(&path).unwrap(), config);
}

#[test]
fn test_json_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");

    let config = EngineConfig {
        strict_validation: true,
        event_capacity: 8,
        ..EngineConfig::default()
    };
    config.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.trim_start().starts_with('{'));
    assert_eq!(EngineConfig::load(&path).unwrap(), config);
}

#[test]
fn test_invalid_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let zero = dir.path().join("zero.toml");
    std::fs::write(&zero, "default_period_ms = 0\n").unwrap();
    assert!(matches!(EngineConfig::load(&zero), Err(GraphError::Config(_))));

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, "{ not json").unwrap();
    assert!(matches!(EngineConfig::load(&garbage), Err(GraphError::Config(_))));

    let yaml = dir.path().join("engine.yaml");
    std::fs::write(&yaml, "default_period_ms: 5").unwrap();
    assert!(matches!(EngineConfig::load(&yaml), Err(GraphError::Config(_))));

    let missing = dir.path().join("missing.toml");
    assert!(EngineConfig::load(&missing).is_err());
    assert_eq!(EngineConfig::load_or_default(&missing), EngineConfig::default());
}

#[test]
fn test_loaded_config_shapes_new_loops() {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(
        &path,
        r#"
        default_period_ms = 25
        default_timing_mode = "simulated"
        max_catch_up_steps = 2
        "#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    let group = Group::builder("configured").config(config).build().unwrap();
    let t = group.create_looped_trigger("loop").unwrap();

    let settings = group.loop_settings(t).unwrap();
    assert_eq!(settings.period, Duration::from_millis(25));
    assert_eq!(settings.mode, TimingMode::Simulated);
    assert_eq!(settings.max_catch_up, 2);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = EngineConfig {
        event_capacity: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Group::builder("bad").config(config).build(),
        Err(GraphError::Config(_))
    ));
}
