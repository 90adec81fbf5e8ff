//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the client facade depends
//! on, plus the bundled MQTT implementation. A transport owns the wire
//! protocol (framing, keep-alive, reconnection) and reports deliveries and
//! lifecycle changes as [`TransportEvent`]s through a channel installed by
//! the client.

use bytes::Bytes;

pub mod mqtt;

/// Events a transport reports to its owning client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker acknowledged the connection (initial connect or reconnect)
    Connected,
    /// Connection dropped
    Disconnected { reason: String },
    /// A connection attempt was rejected
    ConnectionFailed { reason: String },
    /// One inbound message delivery
    Message { topic: String, payload: Bytes },
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over different wire protocols
/// (primarily MQTT) to enable dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Check if the transport is currently connected
    fn is_connected(&self) -> bool;

    /// Publish a message to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Add a wire subscription for a topic
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Remove the wire subscription for a topic
    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Install the channel the transport delivers events into.
    ///
    /// Must be called before `connect`; events raised without a sender
    /// installed are dropped.
    fn set_event_sender(&self, sender: tokio::sync::mpsc::Sender<TransportEvent>);
}

/// Type alias for the bundled MQTT transport
pub type DefaultTransport = mqtt::MqttTransport;
