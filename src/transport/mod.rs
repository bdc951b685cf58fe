//! Transport layer for outbound messages
//!
//! Workers only see the [`Publisher`] trait; the MQTT implementation lives in
//! [`mqtt`] and test doubles in [`crate::testing`].

use bytes::Bytes;

pub mod mqtt;

/// Fire-and-forget publishing of encoded envelopes
///
/// An `Err` from [`Publisher::publish`] means the broker link is unusable and
/// is treated as fatal by the caller.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish `payload` to `topic` at most once
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Self::Error>;
}

