//! Error types for the bridge
//!
//! Fatal errors (bind, accept, broker) end the service; per-connection
//! errors (read, encoding) only end or skip one worker iteration.

use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Failed to read frame from {peer}: {source}")]
    Read {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode envelope: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl BridgeError {
    /// Wrap any broker-side failure
    pub fn broker<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Broker(Box::new(error))
    }

    /// Whether this error should terminate the whole service
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::Read { .. } | BridgeError::Encoding(_))
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
