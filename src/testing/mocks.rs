//! Mock implementations for testing
//!
//! Provides an in-memory [`Transport`] that records every wire operation and
//! lets tests inject broker-side events (messages, disconnects) by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::transport::{Transport, TransportEvent};

pub type PublishedMessage = (String, Vec<u8>);

/// Failure produced by a [`MockTransport`] configured with `with_failure`
#[derive(Debug, Error)]
#[error("simulated {operation} failure")]
pub struct MockTransportError {
    operation: &'static str,
}

impl MockTransportError {
    fn new(operation: &'static str) -> Self {
        Self { operation }
    }
}

/// Mock transport for testing.
///
/// Records published messages and wire (un)subscribes, and exposes the
/// captured event sender through `inject_*` helpers so a test can play the
/// broker side of the conversation.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub published: Arc<Mutex<Vec<PublishedMessage>>>,
    pub wire_subscribes: Arc<Mutex<Vec<String>>>,
    pub wire_unsubscribes: Arc<Mutex<Vec<String>>>,
    should_fail: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    // Sync mutex: installed from the sync trait method, never held across
    // an await.
    event_tx: Arc<std::sync::Mutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport where every operation fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        }
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn get_wire_subscribes(&self) -> Vec<String> {
        self.wire_subscribes.lock().await.clone()
    }

    pub async fn get_wire_unsubscribes(&self) -> Vec<String> {
        self.wire_unsubscribes.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.wire_subscribes.lock().await.clear();
        self.wire_unsubscribes.lock().await.clear();
    }

    /// A handle that can inject events after the transport moved into a client
    pub fn controller(&self) -> MockTransportController {
        MockTransportController {
            should_fail: self.should_fail.clone(),
            connected: self.connected.clone(),
            event_tx: self.event_tx.clone(),
            published: self.published.clone(),
            wire_subscribes: self.wire_subscribes.clone(),
            wire_unsubscribes: self.wire_unsubscribes.clone(),
        }
    }

    async fn emit(&self, event: TransportEvent) {
        let sender = self.event_tx.lock().unwrap().clone();
        if let Some(tx) = sender {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            self.emit(TransportEvent::ConnectionFailed {
                reason: "simulated connect failure".to_string(),
            })
            .await;
            return Err(MockTransportError::new("connect"));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected).await;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        // A deliberate disconnect produces no event, like a clean broker
        // goodbye. Tests simulate broker-side drops through the controller.
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("publish"));
        }
        self.published.lock().await.push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("subscribe"));
        }
        self.wire_subscribes.lock().await.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MockTransportError::new("unsubscribe"));
        }
        self.wire_unsubscribes.lock().await.push(topic.to_string());
        Ok(())
    }

    fn set_event_sender(&self, sender: mpsc::Sender<TransportEvent>) {
        *self.event_tx.lock().unwrap() = Some(sender);
    }
}

/// Broker-side handle to a [`MockTransport`] already owned by a client.
///
/// Clones the transport's shared state, so it stays valid after the
/// transport itself moves.
#[derive(Debug, Clone)]
pub struct MockTransportController {
    should_fail: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    event_tx: Arc<std::sync::Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    wire_subscribes: Arc<Mutex<Vec<String>>>,
    wire_unsubscribes: Arc<Mutex<Vec<String>>>,
}

impl MockTransportController {
    /// Deliver an inbound message as if the broker pushed it
    pub async fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) {
        self.emit(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
        .await;
    }

    /// Announce a (re)connect
    pub async fn inject_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Connected).await;
    }

    /// Announce an unexpected connection loss
    pub async fn inject_disconnected(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await;
    }

    /// Announce a failed connection attempt
    pub async fn inject_connection_failed(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::ConnectionFailed {
            reason: reason.to_string(),
        })
        .await;
    }

    /// Toggle simulated failures while a client owns the transport
    pub fn set_failure(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn get_wire_subscribes(&self) -> Vec<String> {
        self.wire_subscribes.lock().await.clone()
    }

    pub async fn get_wire_unsubscribes(&self) -> Vec<String> {
        self.wire_unsubscribes.lock().await.clone()
    }

    async fn emit(&self, event: TransportEvent) {
        let sender = self.event_tx.lock().unwrap().clone();
        if let Some(tx) = sender {
            let _ = tx.send(event).await;
        }
    }
}
