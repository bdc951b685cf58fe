//! Mock implementations for testing
//!
//! Provides a recording [`Publisher`], a publisher that always fails, and an
//! [`EnvelopeEncoder`] that always fails, so the bridge can be exercised
//! without a broker.

use crate::protocol::{EnvelopeEncoder, MessageEnvelope};
use crate::transport::Publisher;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

pub type PublishedMessage = (String, Vec<u8>);

/// Error returned by the failing mocks
#[derive(Debug, Error)]
#[error("Mock publish failure")]
pub struct MockError;

/// Publisher that records every message in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    notify: Arc<Notify>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Published payloads decoded as envelopes, in publish order.
    /// Panics on a payload that is not an envelope.
    pub async fn envelopes(&self) -> Vec<MessageEnvelope> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(_, payload)| {
                serde_json::from_slice(payload).expect("published payload is not an envelope")
            })
            .collect()
    }

    /// Wait until at least `count` messages were published, or `timeout`
    /// passes. Returns whatever has been recorded by then.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<PublishedMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let published = self.published.lock().await;
                if published.len() >= count {
                    return published.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.messages().await;
            }
        }
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    type Error = MockError;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Self::Error> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec()));
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Publisher that behaves like an unreachable broker
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    type Error = MockError;

    async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<(), Self::Error> {
        Err(MockError)
    }
}

/// Encoder that rejects every envelope
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingEncoder;

impl EnvelopeEncoder for FailingEncoder {
    fn encode(&self, _envelope: &MessageEnvelope) -> Result<Vec<u8>, serde_json::Error> {
        Err(<serde_json::Error as serde::ser::Error>::custom(
            "mock encoding failure",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_publisher_records_in_order() {
        let publisher = RecordingPublisher::new();
        publisher.publish("a", Bytes::from_static(b"1")).await.unwrap();
        publisher.publish("b", Bytes::from_static(b"2")).await.unwrap();

        let messages = publisher.messages().await;
        assert_eq!(messages[0], ("a".to_string(), b"1".to_vec()));
        assert_eq!(messages[1], ("b".to_string(), b"2".to_vec()));

        publisher.clear_history().await;
        assert!(publisher.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_publish() {
        let publisher = RecordingPublisher::new();
        let background = publisher.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            background.publish("t", Bytes::from_static(b"x")).await.unwrap();
        });

        let messages = publisher.wait_for(1, Duration::from_secs(2)).await;
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let publisher = RecordingPublisher::new();
        let messages = publisher.wait_for(1, Duration::from_millis(10)).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_failing_mocks() {
        assert!(FailingPublisher
            .publish("t", Bytes::from_static(b"x"))
            .await
            .is_err());

        let envelope = MessageEnvelope::from_frame("x", "127.0.0.1:1".parse().unwrap());
        assert!(FailingEncoder.encode(&envelope).is_err());
    }
}
