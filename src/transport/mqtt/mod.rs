//! MQTT publisher for the bridge
//!
//! This module separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Broker URL parsing, option construction, errors and state
//! - [`message_handler`] - Pure routing of event-loop events
//! - [`health_monitor`] - Pure reconnection and state-transition logic
//! - [`session`] - Single-use sessions (connect, publish, close)
//! - [`shared`] - Process-wide session with a reconnection supervisor
//! - [`client`] - [`MqttPublisher`], the [`crate::transport::Publisher`] implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use tcp2mqtt::config::BrokerSection;
//! use tcp2mqtt::transport::{mqtt::MqttPublisher, Publisher};
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerSection {
//!     url: "tcp://localhost:1883".to_string(),
//!     ..Default::default()
//! };
//!
//! let publisher = MqttPublisher::from_config(broker).await?;
//! publisher.publish("topic", br#"{"body":"hi"}"#.to_vec().into()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod session;
pub mod shared;

pub use client::MqttPublisher;
pub use connection::{
    configure_mqtt_options, BrokerEndpoint, ConnectionState, MqttError, ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::BrokerSession;
pub use shared::SharedSession;
