//! Client facade: session lifecycle, topic subscriptions, message dispatch
//!
//! `MomClient` ties the pieces together: it owns the transport, drains its
//! event channel on a pump task, keeps the topic registry, and dispatches
//! inbound messages to every matching handler. Failures on the dispatch path
//! are contained to the single message/handler pair that caused them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{MomError, MomResult};
use crate::handler::{HandlerDescriptor, Registration};
use crate::registry::{SubscribeOutcome, TopicRegistry};
use crate::transport::{Transport, TransportEvent};

/// Buffered transport events before the transport has to wait on the pump
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection lifecycle of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection lifecycle observer registered with a client.
///
/// All methods default to no-ops so implementations override only what they
/// care about.
pub trait ClientListener: Send + Sync {
    fn connected(&self) {}
    fn disconnected(&self) {}
    fn connection_failed(&self) {}
}

type Listeners = Arc<RwLock<Vec<Arc<dyn ClientListener>>>>;

/// MOM client facade over a [`Transport`]
pub struct MomClient<T: Transport> {
    transport: Arc<Mutex<T>>,
    registry: TopicRegistry,
    listeners: Listeners,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    pump_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl<T: Transport + 'static> MomClient<T> {
    /// Build a client around a transport; nothing connects until `connect`
    pub fn new(transport: T) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Self {
            transport: Arc::new(Mutex::new(transport)),
            registry: TopicRegistry::new(),
            listeners: Arc::new(RwLock::new(Vec::new())),
            state_tx,
            state_rx,
            pump_handle: None,
            shutdown_tx: None,
        }
    }

    /// Build and connect in one call
    pub async fn connect_new(transport: T) -> MomResult<Self> {
        let mut client = Self::new(transport);
        client.connect().await?;
        Ok(client)
    }

    /// Connect the transport and start the event pump.
    ///
    /// Returns once the broker acknowledged the connection and the session
    /// state reads `Connected`.
    pub async fn connect(&mut self) -> MomResult<()> {
        if self.pump_handle.is_some() {
            debug!("Connect called on an already-started client");
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _ = self.state_tx.send(SessionState::Connecting);

        {
            let transport = self.transport.lock().await;
            transport.set_event_sender(event_tx);
        }

        // Events raised during the handshake buffer in the channel until the
        // pump starts. The pump starts only once the transport is up, so a
        // failed attempt leaves nothing behind and the next connect starts
        // from scratch.
        let connect_result = {
            let mut transport = self.transport.lock().await;
            transport.connect().await
        };
        if let Err(e) = connect_result {
            let _ = self.state_tx.send(SessionState::Disconnected);
            notify_listeners(&self.listeners, "connection_failed", |l| l.connection_failed());
            return Err(MomError::Transport(Box::new(e)));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        self.pump_handle = Some(tokio::spawn(Self::run_event_pump(
            event_rx,
            shutdown_rx,
            self.registry.clone(),
            self.listeners.clone(),
            self.state_tx.clone(),
            self.transport.clone(),
        )));

        self.wait_until_connected().await;
        info!("MOM client connected");
        Ok(())
    }

    /// Disconnect the transport, stop the pump, and drain the registry
    pub async fn disconnect(&mut self) -> MomResult<()> {
        let was_connected = self.state() == SessionState::Connected;

        // Stop the pump first so the transport's own shutdown chatter is not
        // re-dispatched as lifecycle changes.
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        let disconnect_result = {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await
        };

        if let Some(handle) = self.pump_handle.take() {
            match tokio::time::timeout(std::time::Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Event pump shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event pump ended with error: {e}"),
                Err(_) => warn!("Event pump did not stop in time, aborting"),
                _ => {}
            }
        }

        self.registry.clear();
        let _ = self.state_tx.send(SessionState::Disconnected);
        if was_connected {
            notify_listeners(&self.listeners, "disconnected", |l| l.disconnected());
        }

        disconnect_result.map_err(|e| MomError::Transport(Box::new(e)))?;
        info!("MOM client disconnected");
        Ok(())
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Wait until the session state reads `Connected`
    pub async fn wait_until_connected(&self) {
        let mut state_rx = self.state_rx.clone();
        while *state_rx.borrow() != SessionState::Connected {
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Register a handler for a topic.
    ///
    /// Idempotent for an equal descriptor. The first handler for a topic
    /// triggers exactly one wire subscribe; while the transport is down the
    /// wire subscribe is deferred to the next `Connected` event, with the
    /// registration kept either way.
    pub async fn subscribe(&self, topic: &str, descriptor: HandlerDescriptor) -> SubscribeOutcome {
        let outcome = self.registry.subscribe(topic, descriptor);

        if outcome == SubscribeOutcome::FirstForTopic {
            let transport = self.transport.lock().await;
            if !transport.is_connected() {
                debug!("Not connected, deferring wire subscribe for topic: {}", topic);
            } else if let Err(e) = transport.subscribe(topic).await {
                warn!("Wire subscribe for {} failed, deferred until reconnect: {}", topic, e);
            }
        }
        outcome
    }

    /// Remove a topic and all of its handlers, dropping the wire subscription
    pub async fn unsubscribe(&self, topic: &str) -> bool {
        let removed = self.registry.unsubscribe(topic);

        if removed {
            let transport = self.transport.lock().await;
            if let Err(e) = transport.unsubscribe(topic).await {
                warn!("Failed to unsubscribe from {}: {}", topic, e);
            }
        }
        removed
    }

    /// Consume a handler registration list.
    ///
    /// An entry that fails descriptor construction (partial field bindings)
    /// is skipped with a logged error; the rest of the list still registers.
    /// Returns how many entries were registered.
    pub async fn register(&self, registrations: Vec<Registration>) -> usize {
        let mut registered = 0;
        for registration in registrations {
            let topic = registration.topic.clone();
            let name = registration.name.clone();
            match registration.into_descriptor() {
                Ok((topic, descriptor)) => {
                    self.subscribe(&topic, descriptor).await;
                    registered += 1;
                }
                Err(e) => {
                    warn!(
                        "Skipping handler registration: topic={}, handler={}, error={}",
                        topic,
                        name,
                        e
                    );
                }
            }
        }
        registered
    }

    /// Publish raw bytes to a topic.
    ///
    /// Fire-and-forget: while disconnected the message is dropped with a
    /// warning, never an error, and no transport write is attempted.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) {
        let transport = self.transport.lock().await;
        if !transport.is_connected() {
            warn!("Not connected, dropping publish to: {}", topic);
            return;
        }
        if let Err(e) = transport.publish(topic, payload).await {
            warn!("Publish to {} failed, message dropped: {}", topic, e);
        }
    }

    /// Publish a UTF-8 text message to a topic
    pub async fn publish_text(&self, topic: &str, message: &str) {
        self.publish(topic, message.as_bytes().to_vec()).await;
    }

    /// Register a connection lifecycle listener
    pub fn add_listener(&self, listener: Arc<dyn ClientListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Remove a previously registered listener (matched by identity).
    /// Returns `true` if it was present.
    pub fn remove_listener(&self, listener: &Arc<dyn ClientListener>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut listeners = self.listeners.write().unwrap();
        let before = listeners.len();
        listeners.retain(|l| Arc::as_ptr(l) as *const () != target);
        listeners.len() != before
    }

    /// Dispatch one inbound message to every handler registered for the topic.
    ///
    /// Safe to call from any task; takes no locks while handlers run. Topics
    /// with no handlers are a silent no-op.
    pub fn dispatch(&self, topic: &str, payload: &Bytes) {
        dispatch_message(&self.registry, topic, payload);
    }

    /// Number of topics with at least one registered handler
    pub fn topic_count(&self) -> usize {
        self.registry.topic_count()
    }

    /// Pump loop: transport events in, dispatch and lifecycle fan-out
    async fn run_event_pump(
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
        registry: TopicRegistry,
        listeners: Listeners,
        state_tx: watch::Sender<SessionState>,
        transport: Arc<Mutex<T>>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping event pump");
                        break;
                    }
                }

                event = events.recv() => {
                    match event {
                        Some(TransportEvent::Message { topic, payload }) => {
                            dispatch_message(&registry, &topic, &payload);
                        }
                        Some(TransportEvent::Connected) => {
                            info!("Transport connected");
                            // Wire subscriptions are restored before the
                            // Connected state becomes visible, so a caller
                            // that sees Connected can rely on them.
                            Self::resubscribe_all(&transport, &registry).await;
                            let _ = state_tx.send(SessionState::Connected);
                            notify_listeners(&listeners, "connected", |l| l.connected());
                        }
                        Some(TransportEvent::Disconnected { reason }) => {
                            warn!("Transport disconnected: {}", reason);
                            let _ = state_tx.send(SessionState::Disconnected);
                            notify_listeners(&listeners, "disconnected", |l| l.disconnected());
                        }
                        Some(TransportEvent::ConnectionFailed { reason }) => {
                            warn!("Connection attempt failed: {}", reason);
                            let _ = state_tx.send(SessionState::Disconnected);
                            notify_listeners(&listeners, "connection_failed", |l| {
                                l.connection_failed()
                            });
                        }
                        None => {
                            debug!("Transport event channel closed, stopping event pump");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Re-issue wire subscriptions for every registered topic.
    ///
    /// Runs on every `Connected` event, covering both topics registered
    /// while disconnected and subscriptions lost to a reconnect.
    async fn resubscribe_all(transport: &Arc<Mutex<T>>, registry: &TopicRegistry) {
        let topics = registry.topics();
        if topics.is_empty() {
            return;
        }

        let transport = transport.lock().await;
        for topic in topics {
            match transport.subscribe(&topic).await {
                Ok(()) => debug!("Re-subscribed to: {}", topic),
                Err(e) => warn!("Failed to re-subscribe to {}: {}", topic, e),
            }
        }
    }
}

impl<T: Transport> Drop for MomClient<T> {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.pump_handle.take() {
            handle.abort();
        }
    }
}

/// Deliver one message to every handler for the topic, independently.
///
/// Per handler: decode with its own decoder, then invoke. A decode failure,
/// an invocation error, or a panic is logged for that handler only and never
/// blocks delivery to the rest of the snapshot.
fn dispatch_message(registry: &TopicRegistry, topic: &str, payload: &Bytes) {
    let handlers = registry.lookup(topic);
    if handlers.is_empty() {
        debug!("No handlers registered for topic: {}", topic);
        return;
    }

    for handler in &handlers {
        match handler.decoder().decode(payload) {
            Ok(Some(args)) => {
                let invocation = catch_unwind(AssertUnwindSafe(|| handler.invoke(&args)));
                match invocation {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        let err = MomError::handler_failed(handler.name(), e.to_string());
                        warn!("Handler invocation failed on topic {}: {}", topic, err);
                    }
                    Err(panic) => {
                        let err =
                            MomError::handler_failed(handler.name(), panic_reason(panic.as_ref()));
                        error!("Handler panicked on topic {}: {}", topic, err);
                    }
                }
            }
            Ok(None) => {
                debug!(
                    "Empty payload on topic {}, skipping handler {}",
                    topic,
                    handler.name()
                );
            }
            Err(e) => {
                warn!(
                    "Payload decode failed: topic={}, handler={}, error={}",
                    topic,
                    handler.name(),
                    e
                );
            }
        }
    }
}

/// Fan a lifecycle change out to a snapshot of the listeners.
///
/// Listener code is application code: a panic is contained the same way
/// handler panics are.
fn notify_listeners(listeners: &Listeners, event: &str, notify: impl Fn(&dyn ClientListener)) {
    let snapshot: Vec<Arc<dyn ClientListener>> = listeners.read().unwrap().clone();
    for listener in snapshot {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref()))) {
            error!(
                "Client listener panicked during {} notification: {}",
                event,
                panic_reason(panic.as_ref())
            );
        }
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
