//! Pure connection state management for the MQTT publisher
//!
//! Broker URL parsing, option construction and the reconnection settings
//! live here, free of any I/O.

use crate::config::BrokerSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;

/// Connection state of a broker session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - waiting for ConnAck
    Connecting,
    /// ConnAck received, publishes go straight out
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Waiting to reconnect (attempt count)
    Reconnecting(u32),
    /// Reconnection given up or session closed
    PermanentlyDisconnected(String),
}

/// Reconnection configuration for shared sessions
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or unset for unlimited".to_string());
        }
        if self.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// MQTT publisher errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("ConnAck timeout after {0:?} - no connection confirmation received")]
    ConnectTimeout(std::time::Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
}

/// Broker address extracted from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse `tcp://`, `mqtt://` (plain) or `ssl://`, `tls://`, `mqtts://` (TLS) URLs
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let url =
            Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            other => {
                return Err(MqttError::InvalidBrokerUrl(format!(
                    "{broker_url} (unsupported scheme '{other}')"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = url.port().unwrap_or(if tls { TLS_PORT } else { PLAIN_PORT });

        Ok(Self { host, port, tls })
    }
}

/// Generate a client id that is unique per session
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Pure function to configure MQTT options from the broker section
pub fn configure_mqtt_options(broker: &BrokerSection) -> Result<MqttOptions, MqttError> {
    let endpoint = BrokerEndpoint::parse(&broker.url)?;

    let client_id = generate_client_id(&broker.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &broker.username {
        let password = broker.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(broker.keep_alive());
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}
