//! MQTT implementation of [`Publisher`]
//!
//! In per-publish mode every call opens a [`BrokerSession`], publishes once
//! and closes it. In shared mode all calls go through one [`SharedSession`]
//! created at startup.

use super::connection::{configure_mqtt_options, BrokerEndpoint, MqttError, ReconnectConfig};
use super::session::BrokerSession;
use super::shared::SharedSession;
use crate::config::{BrokerSection, SessionMode};
use crate::mqtt_span;
use crate::transport::Publisher;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, Instrument};

enum SessionStrategy {
    PerPublish,
    Shared(SharedSession),
}

/// Broker publisher for the bridge
pub struct MqttPublisher {
    broker: BrokerSection,
    strategy: SessionStrategy,
}

impl MqttPublisher {
    /// Build the publisher described by `broker.session`. Shared mode
    /// connects immediately and fails if the broker is unreachable.
    pub async fn from_config(broker: BrokerSection) -> Result<Self, MqttError> {
        match broker.session {
            SessionMode::PerPublish => Self::per_publish(broker),
            SessionMode::Shared => Self::shared(broker).await,
        }
    }

    /// Publisher that opens one session per message
    pub fn per_publish(broker: BrokerSection) -> Result<Self, MqttError> {
        BrokerEndpoint::parse(&broker.url)?;
        Ok(Self {
            broker,
            strategy: SessionStrategy::PerPublish,
        })
    }

    /// Publisher backed by one reconnecting session
    pub async fn shared(broker: BrokerSection) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(&broker)?;
        let session = SharedSession::connect(
            options,
            ReconnectConfig::from(&broker.reconnect),
            broker.offline_policy,
            broker.connect_timeout(),
        )
        .instrument(mqtt_span!(broker = %broker.url, mode = "shared"))
        .await?;

        info!(broker = %broker.url, "Shared broker session established");
        Ok(Self {
            broker,
            strategy: SessionStrategy::Shared(session),
        })
    }

    pub fn session_mode(&self) -> SessionMode {
        match self.strategy {
            SessionStrategy::PerPublish => SessionMode::PerPublish,
            SessionStrategy::Shared(_) => SessionMode::Shared,
        }
    }

    /// Open a new session to the configured broker, waiting up to the
    /// configured timeout for the ConnAck
    pub async fn connect(&self) -> Result<BrokerSession, MqttError> {
        let options = configure_mqtt_options(&self.broker)?;
        BrokerSession::connect(options, self.broker.connect_timeout()).await
    }

    /// Disconnect the shared session, if any
    pub async fn shutdown(&self) {
        if let SessionStrategy::Shared(session) = &self.strategy {
            session.shutdown().await;
        }
    }

    async fn publish_once(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        let session = self.connect().await?;
        let result = session.publish(topic, payload).await;
        session.close().await;
        result
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    type Error = MqttError;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), Self::Error> {
        let size = payload.len();
        match &self.strategy {
            SessionStrategy::PerPublish => {
                self.publish_once(topic, payload)
                    .instrument(mqtt_span!(broker = %self.broker.url, topic = %topic))
                    .await?
            }
            SessionStrategy::Shared(session) => session.publish(topic, payload).await?,
        }
        debug!(topic = %topic, bytes = size, "Published envelope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{find_subslice, FakeBroker};
    use std::time::Duration;

    fn unreachable_broker() -> BrokerSection {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        BrokerSection {
            url: format!("tcp://127.0.0.1:{port}"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_per_publish_does_not_connect_eagerly() {
        let publisher = MqttPublisher::from_config(unreachable_broker()).await.unwrap();
        assert_eq!(publisher.session_mode(), SessionMode::PerPublish);
    }

    #[tokio::test]
    async fn test_per_publish_rejects_invalid_url() {
        let broker = BrokerSection {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            MqttPublisher::per_publish(broker),
            Err(MqttError::InvalidBrokerUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_fails_when_broker_unreachable() {
        let publisher = MqttPublisher::per_publish(unreachable_broker()).unwrap();

        let result = publisher
            .publish("topic", Bytes::from_static(br#"{"body":"x"}"#))
            .await;

        assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_shared_mode_fails_at_startup_when_broker_unreachable() {
        let broker = BrokerSection {
            session: SessionMode::Shared,
            ..unreachable_broker()
        };
        assert!(MqttPublisher::from_config(broker).await.is_err());
    }

    #[tokio::test]
    async fn test_per_publish_session_on_the_wire() {
        const TOPIC: &str = "plant/frames";
        const PAYLOAD: &[u8] = br#"{"body":"hello","ipFrom":"10.0.0.7","port":"50312"}"#;

        let broker = FakeBroker::start().await.unwrap();
        let section = BrokerSection {
            url: broker.url(),
            username: Some("line3".to_string()),
            password: Some("s3cret".to_string()),
            ..Default::default()
        };
        let publisher = MqttPublisher::per_publish(section).unwrap();

        publisher
            .publish(TOPIC, Bytes::from_static(PAYLOAD))
            .await
            .unwrap();
        let wire = tokio::time::timeout(Duration::from_secs(5), broker.received())
            .await
            .expect("session should end after the publish")
            .unwrap();

        // CONNECT with credentials
        assert_eq!(wire[0], 0x10);
        assert!(find_subslice(&wire, b"line3").is_some());
        assert!(find_subslice(&wire, b"s3cret").is_some());

        // PUBLISH, QoS 0, retain off: topic, empty properties, then the envelope
        let mut expected = vec![0x30, (2 + TOPIC.len() + 1 + PAYLOAD.len()) as u8];
        expected.extend_from_slice(&(TOPIC.len() as u16).to_be_bytes());
        expected.extend_from_slice(TOPIC.as_bytes());
        expected.push(0x00);
        expected.extend_from_slice(PAYLOAD);
        assert!(
            find_subslice(&wire, &expected).is_some(),
            "PUBLISH packet not found in {wire:02x?}"
        );

        // Graceful DISCONNECT closes the session
        assert!(wire.ends_with(&[0xE0, 0x00]), "unexpected tail in {wire:02x?}");
    }
}
