//! Message envelope published for every received frame
//!
//! The published payload is a JSON object with exactly three string fields:
//!
//! ```json
//! {"body": "hello", "ipFrom": "10.0.0.7", "port": "50312"}
//! ```
//!
//! Key order is not significant.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Frame body plus the address of the client that sent it
///
/// # Examples
/// ```
/// use tcp2mqtt::protocol::MessageEnvelope;
///
/// let peer = "[::1]:6000".parse().unwrap();
/// let envelope = MessageEnvelope::from_frame("ping\n", peer);
///
/// assert_eq!(envelope.body, "ping");
/// assert_eq!(envelope.ip_from, "::1");
/// assert_eq!(envelope.port, "6000");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Frame text with surrounding whitespace trimmed
    pub body: String,
    /// Sender host, without brackets or port
    #[serde(rename = "ipFrom")]
    pub ip_from: String,
    /// Sender port, as a decimal string
    pub port: String,
}

impl MessageEnvelope {
    /// Build an envelope for `frame` received from `peer`
    pub fn from_frame(frame: &str, peer: SocketAddr) -> Self {
        let (ip_from, port) = split_peer_address(peer);
        Self {
            body: frame.trim().to_string(),
            ip_from,
            port,
        }
    }
}

/// Split a peer address into host and port strings.
/// IPv4-mapped IPv6 peers are reported as plain IPv4.
pub fn split_peer_address(peer: SocketAddr) -> (String, String) {
    (peer.ip().to_canonical().to_string(), peer.port().to_string())
}

/// Serializes envelopes into broker payloads
pub trait EnvelopeEncoder: Send + Sync {
    fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>, serde_json::Error>;
}

/// Compact JSON encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl EnvelopeEncoder for JsonEncoder {
    fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(envelope)
    }
}
