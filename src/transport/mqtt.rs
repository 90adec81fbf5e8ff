//! MQTT transport adapter over rumqttc
//!
//! The adapter owns the rumqttc event loop: `connect` spawns a pump task that
//! polls it, tracks link state, and translates broker events into
//! [`TransportEvent`]s. rumqttc re-dials on its own as long as the pump keeps
//! polling, so reconnection here is just backing off after an error and
//! polling again; the owning client re-subscribes when the next `Connected`
//! event arrives.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mombus::client::MomClient;
//! use mombus::config::BrokerSection;
//! use mombus::transport::mqtt::MqttTransport;
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerSection {
//!     url: "mqtt://localhost:1883".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 30,
//!     connect_timeout_secs: 10,
//! };
//!
//! let transport = MqttTransport::new("my-client", &broker)?;
//! let client = MomClient::connect_new(transport).await?;
//! client.publish_text("status/ping", "alive").await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BrokerSection;
use crate::transport::{Transport, TransportEvent};

/// Reconnect backoff: short steps first, then a sustained delay
const BACKOFF_PATTERN_MS: [u64; 4] = [250, 500, 1000, 2000];
const SUSTAINED_DELAY_MS: u64 = 5000;

/// Wire link state as seen by the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// Waiting for the broker to acknowledge the connection
    Connecting,
    /// Broker acknowledged; publishes and subscribes will be accepted
    Up,
    /// Link lost or refused, with reason
    Down(String),
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - link state: {state:?}")]
    NotConnected { state: LinkState },
}

/// MQTT implementation of the [`Transport`] capability
pub struct MqttTransport {
    client: AsyncClient,
    // Mutex keeps the transport Sync; the loop is taken out once at connect.
    event_loop: Mutex<Option<EventLoop>>,
    event_tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    state_tx: watch::Sender<LinkState>,
    state_rx: watch::Receiver<LinkState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    pump_handle: Option<JoinHandle<()>>,
    connect_timeout: Duration,
}

impl MqttTransport {
    /// Build a transport from broker configuration. Nothing touches the
    /// network until `connect`.
    pub fn new(client_id: &str, config: &BrokerSection) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(client_id, config)?;
        let (client, event_loop) = AsyncClient::new(options, 10);
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);

        Ok(Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            event_tx: Arc::new(Mutex::new(None)),
            state_tx,
            state_rx,
            shutdown_tx: None,
            pump_handle: None,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    /// Current wire link state
    pub fn link_state(&self) -> LinkState {
        self.state_rx.borrow().clone()
    }

    fn check_link_state(&self) -> Result<(), MqttError> {
        let state = self.link_state();
        if state != LinkState::Up {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    /// Wait until the pump reports the link up, or fail with the reason
    async fn wait_for_link_up(
        mut state_rx: watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow() {
                    LinkState::Up => return Ok(()),
                    LinkState::Down(reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone()));
                    }
                    LinkState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Pump loop: poll rumqttc, translate events, back off on errors
    async fn run_event_pump(
        mut event_loop: EventLoop,
        event_tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
        state_tx: watch::Sender<LinkState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut link_up = false;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event pump");
                        break;
                    }
                }

                result = event_loop.poll() => {
                    match result {
                        Ok(event) => {
                            if let Some(transport_event) = route_event(&event) {
                                match &transport_event {
                                    TransportEvent::Connected => {
                                        link_up = true;
                                        failures = 0;
                                        let _ = state_tx.send(LinkState::Up);
                                    }
                                    TransportEvent::Disconnected { reason } => {
                                        link_up = false;
                                        let _ = state_tx.send(LinkState::Down(reason.clone()));
                                    }
                                    _ => {}
                                }
                                Self::forward(&event_tx, transport_event).await;
                            }
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            // A failure before the first ConnAck is a refused
                            // attempt, afterwards it is a lost link.
                            let transport_event = if link_up {
                                TransportEvent::Disconnected { reason: reason.clone() }
                            } else {
                                TransportEvent::ConnectionFailed { reason: reason.clone() }
                            };
                            link_up = false;
                            let _ = state_tx.send(LinkState::Down(reason.clone()));
                            warn!("MQTT event loop error: {}", reason);
                            Self::forward(&event_tx, transport_event).await;

                            failures = failures.saturating_add(1);
                            let delay_ms = backoff_delay_ms(failures);
                            debug!(
                                "Backing off {}ms before next poll (attempt {})",
                                delay_ms,
                                failures
                            );
                            if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!("MQTT event pump stopped");
    }

    /// Deliver one event to the installed sender, outside any lock
    async fn forward(
        event_tx: &Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
        event: TransportEvent,
    ) {
        let sender = event_tx.lock().unwrap().clone();
        match sender {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    warn!("Event receiver dropped, discarding transport event");
                }
            }
            None => debug!("No event sender installed, discarding transport event"),
        }
    }

    /// Sleep that wakes early on shutdown. Returns false if shutdown was requested.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let event_loop = self.event_loop.lock().unwrap().take().ok_or_else(|| {
            MqttError::ConnectionFailed("Event pump already started".to_string())
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        let _ = self.state_tx.send(LinkState::Connecting);

        let handle = tokio::spawn(Self::run_event_pump(
            event_loop,
            self.event_tx.clone(),
            self.state_tx.clone(),
            shutdown_rx,
        ));
        self.pump_handle = Some(handle);

        Self::wait_for_link_up(self.state_rx.clone(), self.connect_timeout).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // Best effort: the link may already be gone.
        let _ = self.client.disconnect().await;
        let _ = self
            .state_tx
            .send(LinkState::Down("Client disconnected".to_string()));

        if let Some(handle) = self.pump_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("MQTT event pump shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("MQTT event pump ended with error: {e}");
                }
                Err(_) => warn!("MQTT event pump did not stop in time, aborting"),
                _ => {}
            }
        }

        info!("MQTT transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Up
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        self.check_link_state()?;

        // Fire-and-forget messaging: QoS 0, never retained.
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!("Published message to: {}", topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        self.check_link_state()?;

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        debug!("Subscribed to: {}", topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        self.check_link_state()?;

        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        debug!("Unsubscribed from: {}", topic);
        Ok(())
    }

    fn set_event_sender(&self, sender: mpsc::Sender<TransportEvent>) {
        *self.event_tx.lock().unwrap() = Some(sender);
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.pump_handle.take() {
            handle.abort();
        }
    }
}

/// Translate one rumqttc event into a transport event, if it concerns the client
fn route_event(event: &Event) -> Option<TransportEvent> {
    use rumqttc::v5::mqttbytes::v5::Packet;

    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => Some(TransportEvent::Connected),
            Packet::Publish(publish) => Some(TransportEvent::Message {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
            }),
            Packet::Disconnect(disconnect) => Some(TransportEvent::Disconnected {
                reason: format!("Broker disconnect: {:?}", disconnect.reason_code),
            }),
            other => {
                debug!("MQTT event: {other:?}");
                None
            }
        },
        Event::Outgoing(_) => None,
    }
}

/// Build rumqttc options from broker configuration
pub fn configure_mqtt_options(
    client_id: &str,
    config: &BrokerSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.url).map_err(|_| MqttError::InvalidBrokerUrl(config.url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    // Suffix the client id so a stale session on the broker never kicks us
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let wire_client_id = format!("{client_id}-{timestamp}");
    let mut mqtt_options = MqttOptions::new(wire_client_id, host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    // Default incoming limit is too small for whole-document JSON payloads.
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

/// Backoff delay for the given failure count: pattern first, then sustained
fn backoff_delay_ms(attempt: u32) -> u64 {
    let index = attempt.saturating_sub(1) as usize;
    BACKOFF_PATTERN_MS
        .get(index)
        .copied()
        .unwrap_or(SUSTAINED_DELAY_MS)
}
