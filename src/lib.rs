//! tcp2mqtt - line-oriented TCP to MQTT bridge
//!
//! Accepts plain-text TCP connections, reads newline-terminated frames and
//! republishes each one, wrapped in a JSON envelope carrying the sender's
//! address, onto a single MQTT topic.
//!
//! # Overview
//!
//! - [`bridge::Listener`] binds the TCP endpoint and spawns one worker per connection
//! - [`bridge::ConnectionWorker`] reads frames, builds envelopes and publishes them
//! - [`transport::mqtt::MqttPublisher`] owns the broker session lifecycle
//!
//! # Quick Start
//!
//! ```rust
//! use tcp2mqtt::protocol::{EnvelopeEncoder, JsonEncoder, MessageEnvelope};
//! use std::net::SocketAddr;
//!
//! let peer: SocketAddr = "192.168.1.20:50312".parse().unwrap();
//! let envelope = MessageEnvelope::from_frame("  hello\r\n", peer);
//!
//! let payload = JsonEncoder.encode(&envelope).unwrap();
//! let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
//! assert_eq!(value["body"], "hello");
//! assert_eq!(value["ipFrom"], "192.168.1.20");
//! assert_eq!(value["port"], "50312");
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{serve, ConnectionWorker, Listener};
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use protocol::*;
pub use transport::mqtt::MqttPublisher;
pub use transport::Publisher;
