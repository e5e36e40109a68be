//! Topic registration for node modules.

use heapless::{String, Vec};

use super::traits::TopicCollector;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// The topics the session subscribes to on every accepted connection.
///
/// Topics are copied on add and kept in registration order. Adding a topic
/// that is already present is a no-op, so each topic is subscribed once.
#[derive(Default)]
pub struct TopicRegistry<const MAX_TOPICS: usize> {
    topics: Vec<String<MAX_TOPIC_LEN>, MAX_TOPICS>,
}

impl<const MAX_TOPICS: usize> TopicRegistry<MAX_TOPICS> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic to the registry by copying the string.
    ///
    /// Returns `true` if the topic is now registered, `false` if the registry
    /// is full or the topic is too long.
    pub fn add_topic(&mut self, topic: &str) -> bool {
        if self.contains(topic) {
            return true;
        }

        let mut owned = String::new();
        if owned.push_str(topic).is_err() {
            return false;
        }

        self.topics.push(owned).is_ok()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t.as_str() == topic)
    }

    /// Registered topics in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl<const MAX_TOPICS: usize> TopicCollector for TopicRegistry<MAX_TOPICS> {
    fn add(&mut self, topic: &str) -> bool {
        self.add_topic(topic)
    }
}
