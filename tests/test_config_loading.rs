//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use std::collections::HashMap;
use std::io::Write;
use tcp2mqtt::config::{BridgeConfig, ConfigError, OfflinePolicy, SessionMode};
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[listen]
host = "0.0.0.0"
port = 9100
close_connection = false
max_connections = 32

[broker]
url = "mqtts://broker.example.com"
topic = "plant/line-3"
session = "shared"
offline_policy = "queue"

[broker.reconnect]
backoff_ms = [100, 200]
sustained_delay_ms = 1000
max_attempts = 5
"#
    )
    .unwrap();

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.listen.address(), "0.0.0.0:9100");
    assert!(!config.listen.close_connection);
    assert_eq!(config.listen.max_connections, Some(32));
    assert_eq!(config.broker.url, "mqtts://broker.example.com");
    assert_eq!(config.broker.topic, "plant/line-3");
    assert_eq!(config.broker.session, SessionMode::Shared);
    assert_eq!(config.broker.offline_policy, OfflinePolicy::Queue);
    assert_eq!(config.broker.reconnect.max_attempts, Some(5));
}

#[test]
fn test_empty_file_gives_defaults() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config, BridgeConfig::default());
}

#[test]
fn test_missing_file_is_read_error() {
    let result = BridgeConfig::load_from_file(std::path::Path::new("/nonexistent/tcp2mqtt.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[listen\nport = ").unwrap();

    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unsupported_broker_scheme_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker]\nurl = \"http://localhost:1883\"").unwrap();

    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_wildcard_topic_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[broker]\ntopic = \"sensors/#\"").unwrap();

    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidTopic(_))));
}

#[test]
fn test_credentials_resolved_from_named_variables() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        "[broker]\nusername_env = \"PLANT_USER\"\npassword_env = \"PLANT_PASS\""
    )
    .unwrap();
    let mut config = BridgeConfig::load_from_file(temp_file.path()).unwrap();

    let env: HashMap<&str, &str> = [("PLANT_USER", "line3"), ("PLANT_PASS", "s3cret")].into();
    config
        .broker
        .resolve_credentials(|name| env.get(name).map(|v| v.to_string()));

    assert_eq!(config.broker.username.as_deref(), Some("line3"));
    assert_eq!(config.broker.password.as_deref(), Some("s3cret"));

    let shown = toml::to_string(&config.redacted()).unwrap();
    assert!(!shown.contains("s3cret"));
}
