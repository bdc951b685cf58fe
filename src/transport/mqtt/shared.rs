//! Process-wide broker session with a reconnection supervisor
//!
//! One [`SharedSession`] is created at startup and used by every connection
//! worker. A background task polls the rumqttc event loop; on errors it
//! backs off according to [`ReconnectConfig`] and polls again, which makes
//! rumqttc re-establish the connection.

use super::connection::{ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use super::session::{wait_for_connection_confirmation, REQUEST_CAPACITY};
use crate::config::OfflinePolicy;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared, reconnecting broker session
pub struct SharedSession {
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    offline_policy: OfflinePolicy,
    supervisor: Option<JoinHandle<()>>,
}

impl SharedSession {
    /// Connect and start the supervisor. Fails if the first ConnAck does not
    /// arrive within `timeout`.
    pub async fn connect(
        options: MqttOptions,
        reconnect_config: ReconnectConfig,
        offline_policy: OfflinePolicy,
        timeout: Duration,
    ) -> Result<Self, MqttError> {
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = tokio::spawn(supervise(
            event_loop,
            state_tx,
            shutdown_rx,
            reconnect_config,
        ));

        if let Err(e) = wait_for_connection_confirmation(state_rx.clone(), timeout).await {
            let _ = shutdown_tx.send(true);
            supervisor.abort();
            return Err(e);
        }

        Ok(Self {
            client,
            state_rx,
            shutdown_tx,
            offline_policy,
            supervisor: Some(supervisor),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// QoS 0, non-retained publish. While disconnected the offline policy
    /// applies; once the supervisor has given up every publish fails.
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        let state = self.state();

        if HealthMonitor::can_publish(&state) {
            return self
                .client
                .publish(topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(|e| MqttError::PublishFailed(Box::new(e)));
        }

        if HealthMonitor::is_terminal(&state) {
            return Err(MqttError::NotConnected { state });
        }

        match self.offline_policy {
            OfflinePolicy::Drop => {
                warn!(topic = %topic, state = ?state, "Broker offline, dropping message");
                Ok(())
            }
            OfflinePolicy::Queue => {
                match self
                    .client
                    .try_publish(topic, QoS::AtMostOnce, false, payload)
                {
                    Ok(()) => debug!(topic = %topic, "Broker offline, message queued"),
                    Err(e) => warn!(topic = %topic, error = %e, "Offline queue full, dropping message"),
                }
                Ok(())
            }
        }
    }

    /// Stop the supervisor and disconnect
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if HealthMonitor::can_publish(&self.state()) {
            if let Err(e) = self.client.disconnect().await {
                debug!("Disconnect request not queued: {}", e);
            }
        }
        info!("Shared broker session shut down");
    }
}

impl Drop for SharedSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

/// Poll the event loop for the lifetime of the session, reconnecting with backoff
async fn supervise(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnect_config: ReconnectConfig,
) {
    info!("Starting shared MQTT session supervisor");
    let mut reconnect_attempts = 0u32;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping session supervisor");
                    break;
                }
            }

            event_result = event_loop.poll() => {
                let keep_running = match event_result {
                    Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            reconnect_attempts = 0;
                            transition(&state_tx, ConnectionEvent::ConnAckReceived);
                            true
                        }
                        EventRoute::Disconnected => {
                            transition(&state_tx, ConnectionEvent::DisconnectedByBroker);
                            backoff(&mut reconnect_attempts, &reconnect_config, &state_tx, &shutdown_rx).await
                        }
                        EventRoute::DisconnectSent => false,
                        EventRoute::InfrastructureEvent(event) => {
                            tracing::debug!(target: "mqtt_transport", "MQTT event: {}", event);
                            true
                        }
                        EventRoute::PublishSent | EventRoute::OutgoingEvent => true,
                    },
                    Err(e) => {
                        error!("MQTT event loop error: {}", e);
                        transition(&state_tx, ConnectionEvent::NetworkError(e.to_string()));
                        backoff(&mut reconnect_attempts, &reconnect_config, &state_tx, &shutdown_rx).await
                    }
                };

                if !keep_running {
                    break;
                }
            }
        }
    }

    if !HealthMonitor::is_terminal(&state_tx.borrow()) {
        let _ = state_tx.send(ConnectionState::PermanentlyDisconnected(
            "Session supervisor stopped".to_string(),
        ));
    }
    info!("Shared MQTT session supervisor stopped");
}

fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    let next = HealthMonitor::determine_next_state(event);
    let previous = state_tx.send_replace(next.clone());
    if previous != next {
        HealthMonitor::log_state_transition(&previous, &next);
    }
}

/// Sleep before the next reconnection attempt.
/// Returns false when the supervisor should stop.
async fn backoff(
    reconnect_attempts: &mut u32,
    reconnect_config: &ReconnectConfig,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &watch::Receiver<bool>,
) -> bool {
    let decision = HealthMonitor::should_attempt_reconnection(
        *reconnect_attempts,
        reconnect_config,
        *shutdown_rx.borrow(),
    );

    match decision {
        ReconnectionDecision::Proceed { attempt, delay_ms } => {
            *reconnect_attempts = attempt;
            transition(state_tx, ConnectionEvent::ReconnectionStarted(attempt));

            let max_display = reconnect_config
                .max_attempts
                .map_or("∞".to_string(), |max| max.to_string());
            info!(
                "Attempting reconnection {}/{} after {}ms delay",
                attempt, max_display, delay_ms
            );

            interruptible_sleep(shutdown_rx.clone(), delay_ms).await
        }
        ReconnectionDecision::AbortShutdownRequested => false,
        ReconnectionDecision::AbortMaxAttemptsExceeded => {
            let reason = format!(
                "Max reconnection attempts ({}) exceeded",
                reconnect_config.max_attempts.unwrap_or_default()
            );
            transition(state_tx, ConnectionEvent::PermanentFailure(reason));
            false
        }
    }
}

/// Returns true if the sleep completed, false if shutdown was requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            !(changed.is_err() || *shutdown_rx.borrow())
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
