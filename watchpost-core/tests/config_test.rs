//! Tests for loading service configs and scenario files from disk

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use watchpost_core::{
    DecoderKind, Error, JsonScenarioCatalog, ModelKind, Region, ScenarioCatalog, ServiceConfig,
};

fn write_fixture(dir: &TempDir) -> PathBuf {
    fs::create_dir_all(dir.path().join("scenarios")).unwrap();
    fs::write(
        dir.path().join("scenarios/haze.json"),
        r#"{
            "id": "haze",
            "name": "Haze check",
            "threshold": 0.6,
            "detection_regions": [[740, 420, 240, 240]],
            "models": [{"id": "cnn-haze", "type": "cnn", "path": "haze.onnx", "labels": ["hazy"]}]
        }"#,
    )
    .unwrap();

    let config_path = dir.path().join("service.json");
    fs::write(
        &config_path,
        r#"{
            "service": {"name": "dock-7"},
            "stream": {"url": "rtsp://10.0.0.2/stream", "frame_rate": 2, "decoder": "hardware"},
            "scenarios": {"haze": "scenarios/haze.json", "ghost": "scenarios/missing.json"},
            "active_scenarios": ["haze"],
            "eye": {"capture_timeout_ms": 3000}
        }"#,
    )
    .unwrap();
    config_path
}

#[test]
fn test_load_resolves_relative_paths() {
    let dir = TempDir::new().unwrap();
    let config_path = write_fixture(&dir);

    let config = ServiceConfig::load(&config_path).unwrap();
    assert_eq!(config.service.name, "dock-7");
    assert_eq!(config.stream.decoder, DecoderKind::Hardware);
    assert_eq!(config.stream.transport, "udp");
    assert_eq!(config.capture_dir, dir.path().join("captures"));
    assert_eq!(config.scenarios["haze"], dir.path().join("scenarios/haze.json"));
    assert_eq!(config.eye["capture_timeout_ms"], 3000);
    assert!(config.validate().is_ok());
}

#[test]
fn test_catalog_reads_scenario_file() {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig::load(&write_fixture(&dir)).unwrap();
    let catalog = JsonScenarioCatalog::from_config(&config);

    assert!(catalog.contains("haze"));
    assert!(!catalog.contains("smoke"));

    let descriptor = catalog.descriptor("haze").unwrap();
    assert_eq!(descriptor.model.kind, ModelKind::Cnn);
    assert_eq!(descriptor.detection_regions, vec![Region::new(740, 420, 240, 240)]);
    assert_eq!(
        descriptor.model.weights_path,
        dir.path().join("scenarios/haze.onnx")
    );
}

#[test]
fn test_catalog_missing_file_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig::load(&write_fixture(&dir)).unwrap();
    let catalog = JsonScenarioCatalog::from_config(&config);

    assert!(catalog.contains("ghost"));
    assert!(matches!(catalog.descriptor("ghost"), Err(Error::Configuration(_))));
    assert!(matches!(catalog.descriptor("nope"), Err(Error::UnknownScenario(_))));
}

#[test]
fn test_save_keeps_paths_relative() {
    let dir = TempDir::new().unwrap();
    let config_path = write_fixture(&dir);
    let mut config = ServiceConfig::load(&config_path).unwrap();
    config.set_active_scenarios(&[]);
    config.save(&config_path).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();
    assert_eq!(raw["scenarios"]["haze"], "scenarios/haze.json");
    assert_eq!(raw["active_scenarios"], serde_json::json!([]));

    let reloaded = ServiceConfig::load(&config_path).unwrap();
    assert!(reloaded.active_scenarios.is_empty());
    assert_eq!(reloaded.scenarios.len(), 2);
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = ServiceConfig::load(&dir.path().join("absent.json"));
    assert!(matches!(result, Err(Error::Configuration(_))));
}
