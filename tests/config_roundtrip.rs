//! Config persistence round-trip tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use vela::AgentConfig;

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = AgentConfig::default();
    config.audio.capture_sample_rate = 16_000;
    config.pipeline.confidence_threshold = 0.75;
    config.realtime.voice = "luna".to_owned();

    config.save_to_file(&path).unwrap();
    assert!(path.exists());

    let loaded = AgentConfig::from_file(&path).unwrap();
    assert_eq!(loaded.audio.capture_sample_rate, 16_000);
    assert!((loaded.pipeline.confidence_threshold - 0.75).abs() < f32::EPSILON);
    assert_eq!(loaded.realtime.voice, "luna");
}

#[test]
fn save_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deep").join("config.toml");
    AgentConfig::default().save_to_file(&path).unwrap();
    assert!(path.exists());
}

#[test]
fn from_file_nonexistent_returns_error() {
    let result = AgentConfig::from_file(std::path::Path::new("/nonexistent/vela/config.toml"));
    assert!(result.is_err());
}

#[test]
fn from_file_invalid_toml_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();
    assert!(AgentConfig::from_file(&path).is_err());
}
