//! Single-use broker sessions
//!
//! A [`BrokerSession`] walks `Connecting -> Connected -> Published` and is
//! then closed; it never reconnects.

use super::connection::{ConnectionState, MqttError};
use super::health_monitor::{ConnectionEvent, HealthMonitor};
use super::message_handler::{EventRoute, MessageHandler};
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the client request channel
pub(crate) const REQUEST_CAPACITY: usize = 64;

/// Grace period for flushing the DISCONNECT when a session is closed
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One established connection to the broker
pub struct BrokerSession {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    driver: Option<JoinHandle<()>>,
}

impl BrokerSession {
    /// Open a session and wait up to `timeout` for the broker's ConnAck
    pub async fn connect(options: MqttOptions, timeout: Duration) -> Result<Self, MqttError> {
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let driver = tokio::spawn(drive_event_loop(event_loop, state_tx));

        if let Err(e) = wait_for_connection_confirmation(state_rx.clone(), timeout).await {
            driver.abort();
            return Err(e);
        }

        Ok(Self {
            client,
            state_rx,
            driver: Some(driver),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// QoS 0, non-retained publish
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        let state = self.state();
        if !HealthMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }

        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    /// Send DISCONNECT after any queued publishes and wait for the event loop to finish
    pub async fn close(mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request not queued: {}", e);
        }

        if let Some(handle) = self.driver.take() {
            match tokio::time::timeout(CLOSE_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if !e.is_cancelled() => warn!("Session event loop ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => warn!("Session event loop did not stop in time, aborting"),
            }
        }
    }
}

impl Drop for BrokerSession {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.abort();
        }
    }
}

/// Poll a single-use event loop until the session ends
async fn drive_event_loop(mut event_loop: EventLoop, state_tx: watch::Sender<ConnectionState>) {
    loop {
        match event_loop.poll().await {
            Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    let _ = state_tx.send(HealthMonitor::determine_next_state(
                        ConnectionEvent::ConnAckReceived,
                    ));
                }
                EventRoute::PublishSent => {
                    tracing::trace!(target: "mqtt_transport", "Publish flushed");
                }
                EventRoute::DisconnectSent => {
                    let _ = state_tx.send(ConnectionState::PermanentlyDisconnected(
                        "Session closed".to_string(),
                    ));
                    break;
                }
                EventRoute::Disconnected => {
                    let _ = state_tx.send(HealthMonitor::determine_next_state(
                        ConnectionEvent::DisconnectedByBroker,
                    ));
                    break;
                }
                EventRoute::InfrastructureEvent(event) => {
                    tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                }
                EventRoute::OutgoingEvent => {}
            },
            Err(e) => {
                let _ = state_tx.send(HealthMonitor::determine_next_state(
                    ConnectionEvent::NetworkError(e.to_string()),
                ));
                break;
            }
        }
    }
}

/// Wait for connection confirmation (ConnAck) with timeout
pub(crate) async fn wait_for_connection_confirmation(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), MqttError> {
    let wait = async {
        loop {
            match &*state_rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected(reason) => {
                    return Err(MqttError::ConnectionFailed(reason.clone()));
                }
                ConnectionState::PermanentlyDisconnected(reason) => {
                    return Err(MqttError::ConnectionFailed(format!(
                        "Permanently disconnected: {reason}"
                    )));
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(MqttError::ConnectionFailed(
                    "State channel closed".to_string(),
                ));
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(MqttError::ConnectTimeout(timeout)),
    }
}
