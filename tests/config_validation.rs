//! Integration tests for configuration validation

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use lorawan_storage::config::{
    parse_access_code, DirectoryConfig, ListenerMode, StorageBackend, DEFAULT_ACCESS_CODE,
    DEFAULT_CODE, DEFAULT_PORT,
};
use lorawan_storage::core::types::NetId;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = DirectoryConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert_eq!(config.auth.code, DEFAULT_CODE);
    assert_eq!(config.auth.access_code, DEFAULT_ACCESS_CODE);
    assert_eq!(config.server.socket_addr().unwrap().port(), DEFAULT_PORT);
    assert_eq!(config.server.mode, ListenerMode::EventLoop);
}

#[test]
fn test_invalid_server_address() {
    let mut config = DirectoryConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = DirectoryConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_json_listener_cannot_share_tcp_address() {
    let mut config = DirectoryConfig::default();
    config.server.json_address = Some(config.server.address.clone());
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("cannot share the binary TCP address")));

    config.server.tcp_enabled = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_json_address() {
    let mut config = DirectoryConfig::default();
    config.server.json_address = Some("nowhere".to_string());
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Invalid JSON listener address")));
}

#[test]
fn test_response_capacity_bounds() {
    let mut config = DirectoryConfig::default();
    config.server.response_capacity = 21;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Response capacity too small")));

    config.server.response_capacity = 22;
    assert!(config.validate().is_empty());

    config.server.response_capacity = 70_000;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Response capacity too large")));
}

#[test]
fn test_poll_interval_bounds() {
    let mut config = DirectoryConfig::default();
    config.server.poll_interval = Duration::from_millis(1);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Poll interval too short")));

    config.server.poll_interval = Duration::from_secs(60);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Poll interval too long")));
}

#[test]
fn test_json_backend_paths_must_differ() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DirectoryConfig::default();
    config.storage.backend = StorageBackend::Json;
    config.storage.identity_path = dir.path().join("same.json");
    config.storage.gateway_path = dir.path().join("same.json");

    assert!(config.validate().iter().any(|e| e.contains("must differ")));
}

#[test]
fn test_json_backend_missing_directory() {
    let mut config = DirectoryConfig::default();
    config.storage.backend = StorageBackend::Json;
    config.storage.identity_path = "/definitely/not/here/identity.json".into();

    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Storage directory does not exist")));
}

#[test]
fn test_empty_app_name() {
    let mut config = DirectoryConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_long_app_name() {
    let mut config = DirectoryConfig::default();
    config.logging.app_name = "a".repeat(100);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name too long")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = DirectoryConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = DirectoryConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = DirectoryConfig::default();
    config.server.address = String::new();

    let error = config.validate_strict().unwrap_err();
    assert!(error.to_string().contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = DirectoryConfig::default();
    config.server.address = String::new();
    config.server.response_capacity = 0;
    config.logging.app_name = String::new();
    config.logging.log_to_console = false;

    let errors = config.validate();
    assert!(
        errors.len() >= 4,
        "Expected at least 4 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_toml_roundtrip_keeps_hex_access_code() {
    let config = DirectoryConfig::default_with_overrides(|c| {
        c.server.mode = ListenerMode::Blocking;
        c.auth.access_code = 0xDEAD_BEEF;
        c.storage.net_id = Some(NetId::new(3, 0x2A).unwrap());
        c.logging.log_level = Level::DEBUG;
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("directory.toml");
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("deadbeef") || text.contains("DEADBEEF"), "{text}");
    assert!(text.contains("mode = \"blocking\""), "{text}");

    let loaded = DirectoryConfig::from_file(&path).unwrap();
    assert_eq!(loaded.auth.access_code, 0xDEAD_BEEF);
    assert_eq!(loaded.server.mode, ListenerMode::Blocking);
    assert_eq!(loaded.storage.net_id, config.storage.net_id);
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = DirectoryConfig::from_toml(
        r#"
        [server]
        address = "127.0.0.1:5000"

        [storage]
        backend = "json"
        "#,
    )
    .unwrap();
    assert_eq!(config.server.address, "127.0.0.1:5000");
    assert_eq!(config.storage.backend, StorageBackend::Json);
    assert_eq!(config.auth.code, DEFAULT_CODE);
}

#[test]
fn test_example_config_parses() {
    let text = DirectoryConfig::example_config();
    let config = DirectoryConfig::from_toml(&text).unwrap();
    assert!(config.validate().is_empty());
}

#[test]
fn test_parse_access_code() {
    assert_eq!(parse_access_code("2a").unwrap(), 0x2A);
    assert_eq!(parse_access_code("0x2A").unwrap(), 0x2A);
    assert_eq!(parse_access_code("ffffffffffffffff").unwrap(), u64::MAX);
    assert!(parse_access_code("xyz").is_err());
}

#[test]
fn test_mode_and_backend_from_str() {
    assert_eq!("blocking".parse::<ListenerMode>().unwrap(), ListenerMode::Blocking);
    assert_eq!("event-loop".parse::<ListenerMode>().unwrap(), ListenerMode::EventLoop);
    assert!("threads".parse::<ListenerMode>().is_err());
    assert_eq!("JSON".parse::<StorageBackend>().unwrap(), StorageBackend::Json);
    assert!("sqlite".parse::<StorageBackend>().is_err());
}
