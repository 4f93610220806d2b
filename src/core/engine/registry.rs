use crate::core::errors::EngineError;
use crate::core::types::{AckState, Flow, TopicKey};
use serde_json::Value;
use std::collections::HashMap;

/// Decode-and-handle closure registered per topic: receives the full data
/// frame, decodes the payload into the caller's type and runs the callback.
pub type TopicHandler = Box<dyn FnMut(&Value) -> Result<Flow, EngineError> + Send>;

/// Proof of one registration. Unregistering with a token from a superseded
/// registration is a no-op, so re-subscribing can never tear down its
/// replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionToken {
    topic: String,
    generation: u64,
}

impl SubscriptionToken {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

pub struct SubscriptionEntry {
    key: TopicKey,
    handler: TopicHandler,
    state: AckState,
    generation: u64,
}

impl SubscriptionEntry {
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    pub fn state(&self) -> AckState {
        self.state
    }

    pub(crate) fn invoke(&mut self, frame: &Value) -> Result<Flow, EngineError> {
        (self.handler)(frame)
    }
}

/// Maps wire topics to subscription entries. Exactly one entry per key:
/// registering an already-present key atomically replaces the prior entry.
/// Lookup is a plain `HashMap` hit since it runs on every inbound frame.
#[derive(Default)]
pub struct TopicRegistry {
    entries: HashMap<String, SubscriptionEntry>,
    next_generation: u64,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, key: TopicKey, handler: TopicHandler) -> SubscriptionToken {
        let topic = key.topic();
        self.next_generation += 1;
        let generation = self.next_generation;

        self.entries.insert(
            topic.clone(),
            SubscriptionEntry {
                key,
                handler,
                state: AckState::Pending,
                generation,
            },
        );

        SubscriptionToken { topic, generation }
    }

    /// Remove the entry the token refers to. Returns false if the entry is
    /// gone or has since been replaced by a newer registration.
    pub fn unregister(&mut self, token: &SubscriptionToken) -> bool {
        match self.entries.get(&token.topic) {
            Some(entry) if entry.generation == token.generation => {
                self.entries.remove(&token.topic);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn resolve(&mut self, raw_topic: &str) -> Option<&mut SubscriptionEntry> {
        self.entries.get_mut(raw_topic)
    }

    pub fn state_of(&self, topic: &str) -> Option<AckState> {
        self.entries.get(topic).map(|entry| entry.state)
    }

    pub fn topics(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn set_state(&mut self, topic: &str, state: AckState) {
        if let Some(entry) = self.entries.get_mut(topic) {
            entry.state = state;
        }
    }

    pub(crate) fn set_state_all(&mut self, state: AckState) {
        for entry in self.entries.values_mut() {
            entry.state = state;
        }
    }
}
