//! Tests for configuration loading and defaults

use crate::Result;
use crate::config::{Config, HubConfig};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.hub.grace_period_ms, 30_000);
    assert_eq!(config.hub.viewer_buffer, 64);
    assert_eq!(config.hub.command_buffer, 256);
    assert_eq!(config.hub.pin_length, 4);
    assert!(config.server.socket_path.is_none());
    assert!(config.server.tcp_listen.is_none());
}

#[test]
fn test_config_parse_minimal() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_parse_partial() {
    let json = r#"{
        "hub": { "gracePeriodMs": 5000 },
        "server": { "tcpListen": "0.0.0.0:7777" }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.hub.grace_period_ms, 5_000);
    assert_eq!(config.hub.viewer_buffer, 64);
    assert_eq!(config.server.tcp_listen.as_deref(), Some("0.0.0.0:7777"));
}

#[test]
fn test_load_missing_file_gives_defaults() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load(&temp_dir.path().join("absent.json"))?;
    assert_eq!(config, Config::default());
    Ok(())
}

#[test]
fn test_load_sees_updated_file() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");

    fs::write(&config_path, r#"{"hub": {"pinLength": 6}}"#).unwrap();
    assert_eq!(Config::load(&config_path)?.hub.pin_length, 6);

    fs::write(&config_path, r#"{"hub": {"pinLength": 5}}"#).unwrap();
    assert_eq!(Config::load(&config_path)?.hub.pin_length, 5);
    Ok(())
}

#[test]
fn test_load_tolerates_unknown_fields() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    fs::write(
        &config_path,
        r#"{"hub": {"gracePeriodMs": 10, "colour": "red"}, "extra": true}"#,
    )
    .unwrap();

    let config = Config::load(&config_path)?;
    assert_eq!(config.hub.grace_period_ms, 10);
    Ok(())
}

#[test]
fn test_load_invalid_json_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    fs::write(&config_path, "{ not json").unwrap();

    assert!(matches!(
        Config::load(&config_path),
        Err(crate::Error::Json(_))
    ));
}

#[test]
fn test_load_sanitizes_hub_values() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    fs::write(
        &config_path,
        r#"{"hub": {"viewerBuffer": 0, "commandBuffer": 0, "pinLength": 40}}"#,
    )
    .unwrap();

    let hub = Config::load(&config_path)?.hub;
    assert_eq!(hub.viewer_buffer, 1);
    assert_eq!(hub.command_buffer, 1);
    assert_eq!(hub.pin_length, 9);
    Ok(())
}

#[test]
fn test_sanitized_keeps_valid_values() {
    let hub = HubConfig {
        grace_period_ms: 0,
        viewer_buffer: 8,
        command_buffer: 16,
        pin_length: 6,
    };
    assert_eq!(hub.clone().sanitized(), hub);
}

#[test]
fn test_save_and_load() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");

    let mut config = Config::default();
    config.hub.grace_period_ms = 1_500;
    config.server.socket_path = Some(PathBuf::from("/run/chorale/test.sock"));
    config.save(&config_path)?;

    let saved = fs::read_to_string(&config_path).unwrap();
    assert!(saved.contains("gracePeriodMs"));
    assert!(saved.contains("socketPath"));

    assert_eq!(Config::load(&config_path)?, config);
    Ok(())
}
