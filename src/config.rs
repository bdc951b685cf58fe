//! Bridge configuration
//!
//! A [`BridgeConfig`] is built once at startup (defaults, optional TOML file,
//! command-line overrides, credential lookup) and shared read-only with every
//! connection worker afterwards.

use crate::transport::mqtt::{BrokerEndpoint, ReconnectConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default TCP listen port
pub const DEFAULT_PORT: u16 = 7777;
/// Default MQTT broker URL
pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:1883";
/// Default MQTT topic
pub const DEFAULT_TOPIC: &str = "topic";
/// Environment variable holding the broker username
pub const USERNAME_ENV: &str = "MQTT_USERNAME";
/// Environment variable holding the broker password
pub const PASSWORD_ENV: &str = "MQTT_PASSWORD";

const REDACTED: &str = "***";

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub broker: BrokerSection,
}

/// TCP side of the bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenSection {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Close each connection after its first frame
    #[serde(default = "default_close_connection")]
    pub close_connection: bool,
    /// Upper bound on concurrently served connections (None = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    /// Longest accepted frame in bytes, delimiter included (None = unbounded).
    /// A longer frame is a read failure and ends the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_bytes: Option<usize>,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            close_connection: true,
            max_connections: None,
            max_frame_bytes: None,
        }
    }
}

impl ListenSection {
    /// `host:port` string suitable for `TcpListener::bind`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MQTT side of the bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, e.g. `tcp://localhost:1883` or `mqtts://broker:8883`
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Topic every envelope is published to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Environment variable containing the username
    #[serde(
        default = "default_username_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub username_env: Option<String>,
    /// Environment variable containing the password
    #[serde(
        default = "default_password_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub password_env: Option<String>,
    /// Resolved username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Resolved password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Prefix for generated MQTT client ids
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on the wait for the broker's ConnAck
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub session: SessionMode,
    #[serde(default)]
    pub offline_policy: OfflinePolicy,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            topic: default_topic(),
            username_env: default_username_env(),
            password_env: default_password_env(),
            username: None,
            password: None,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            session: SessionMode::default(),
            offline_policy: OfflinePolicy::default(),
            reconnect: ReconnectSection::default(),
        }
    }
}

impl BrokerSection {
    /// Fill in credentials that were not given explicitly, using `lookup` to
    /// resolve the configured variable names (normally the process environment)
    pub fn resolve_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.username.is_none() {
            self.username = self.username_env.as_deref().and_then(&lookup);
        }
        if self.password.is_none() {
            self.password = self.password_env.as_deref().and_then(&lookup);
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// How broker sessions are managed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Open a fresh session for every publish and discard it afterwards
    #[default]
    PerPublish,
    /// One reconnecting session shared by every worker
    Shared,
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "per-publish" | "per_publish" => Ok(SessionMode::PerPublish),
            "shared" => Ok(SessionMode::Shared),
            other => Err(format!(
                "unknown session mode '{other}' (expected per-publish or shared)"
            )),
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::PerPublish => write!(f, "per-publish"),
            SessionMode::Shared => write!(f, "shared"),
        }
    }
}

/// What a shared session does with envelopes while the broker is unreachable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Log and discard
    #[default]
    Drop,
    /// Buffer in the client's request queue until reconnected
    Queue,
}

/// Reconnection backoff for shared sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
    /// None retries forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
            max_attempts: None,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        ReconnectConfig {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_close_connection() -> bool {
    true
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_username_env() -> Option<String> {
    Some(USERNAME_ENV.to_string())
}

fn default_password_env() -> Option<String> {
    Some(PASSWORD_ENV.to_string())
}

fn default_client_id_prefix() -> String {
    "tcp2mqtt".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_backoff_ms() -> Vec<u64> {
    vec![250, 500, 1000, 2000]
}

fn default_sustained_delay_ms() -> u64 {
    5000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "listen.host must not be empty".to_string(),
            ));
        }
        if self.listen.max_connections == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "listen.max_connections must be greater than 0 when set".to_string(),
            ));
        }
        if self.listen.max_frame_bytes == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "listen.max_frame_bytes must be greater than 0 when set".to_string(),
            ));
        }

        BrokerEndpoint::parse(&self.broker.url)
            .map_err(|e| ConfigError::InvalidBrokerUrl(e.to_string()))?;
        validate_topic(&self.broker.topic)?;

        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.broker.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.client_id_prefix must not be empty".to_string(),
            ));
        }

        ReconnectConfig::from(&self.broker.reconnect)
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    /// Copy of the configuration that is safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.broker.password.is_some() {
            config.broker.password = Some(REDACTED.to_string());
        }
        config
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let mut config = Self::default();
        config.listen.host = "127.0.0.1".to_string();
        config.listen.port = 0;
        config.broker.topic = "bridge/test".to_string();
        config
    }
}

/// Publish topics must be non-empty and free of wildcards
fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidTopic(format!(
            "'{topic}' contains a wildcard, which is not allowed for publishing"
        )));
    }
    if topic.contains('\0') {
        return Err(ConfigError::InvalidTopic(
            "topic must not contain NUL characters".to_string(),
        ));
    }
    Ok(())
}
