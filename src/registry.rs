//! Thread-safe mapping from topic to the set of subscribed handlers
//!
//! A topic key exists iff it has at least one handler: the first subscription
//! for a topic and the removal of its entry are the two points where the
//! owning client must touch the wire (subscribe/unsubscribe on the
//! transport). Lookups hand out cloned snapshots, so dispatch iteration is
//! never invalidated by a concurrent unsubscribe.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::handler::HandlerDescriptor;

/// Result of inserting a descriptor into the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Topic seen for the first time; the owning client must subscribe on the wire
    FirstForTopic,
    /// Added alongside existing handlers for an already-active topic
    Added,
    /// An equal descriptor is already present; nothing changed
    AlreadyRegistered,
}

/// Thread-safe registry of topic subscriptions
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: Arc<RwLock<HashMap<String, HashSet<HandlerDescriptor>>>>,
}

impl TopicRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a handler for a topic.
    ///
    /// Idempotent: an equal descriptor (same target, same format) already
    /// present for the topic is left alone and reported as
    /// `AlreadyRegistered`.
    pub fn subscribe(&self, topic: &str, descriptor: HandlerDescriptor) -> SubscribeOutcome {
        let mut topics = self.topics.write().unwrap();

        match topics.get_mut(topic) {
            Some(handlers) => {
                if handlers.insert(descriptor) {
                    debug!("Added handler to active topic: {}", topic);
                    SubscribeOutcome::Added
                } else {
                    debug!("Handler already registered for topic: {}", topic);
                    SubscribeOutcome::AlreadyRegistered
                }
            }
            None => {
                let mut handlers = HashSet::new();
                handlers.insert(descriptor);
                topics.insert(topic.to_string(), handlers);
                debug!("Tracking new topic: {}", topic);
                SubscribeOutcome::FirstForTopic
            }
        }
    }

    /// Remove a topic and all of its handlers.
    ///
    /// Returns `true` if the topic was present; the owning client then
    /// unsubscribes on the wire. Removal is topic-wide: callers that want to
    /// drop a single handler re-subscribe the remaining ones.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().unwrap();

        match topics.remove(topic) {
            Some(handlers) => {
                debug!("Dropped topic {} and its {} handler(s)", topic, handlers.len());
                true
            }
            None => false,
        }
    }

    /// Snapshot of the handlers for a topic, empty when none.
    ///
    /// The returned vector is a clone: safe to iterate while other tasks
    /// subscribe or unsubscribe, and mutating it never writes back.
    pub fn lookup(&self, topic: &str) -> Vec<HandlerDescriptor> {
        let topics = self.topics.read().unwrap();
        topics
            .get(topic)
            .map(|handlers| handlers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All topics that currently have at least one handler
    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().unwrap();
        topics.keys().cloned().collect()
    }

    /// Drop every topic and handler
    pub fn clear(&self) {
        let mut topics = self.topics.write().unwrap();
        let count = topics.len();
        topics.clear();
        if count > 0 {
            debug!("Cleared topic registry ({} topics)", count);
        }
    }

    /// Number of active topics
    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap().len()
    }

    /// Number of registered handlers across all topics
    pub fn handler_count(&self) -> usize {
        let topics = self.topics.read().unwrap();
        topics.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().unwrap().is_empty()
    }
}
