//! Topic naming and routing.
//!
//! Topics follow the pattern `{category}-events`:
//! - `driver-events` - driver lifecycle events
//! - `load-events` - load lifecycle events
//! - `gamification-events` - achievements and leaderboards
//!
//! Every topic has exactly one dead-letter companion named `{topic}-dlq`.

use crate::event::{Event, EventCategory};
use std::collections::HashMap;

/// Suffix appended to a topic name to form its dead-letter companion.
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Name of the dead-letter topic paired with `topic`.
///
/// # Examples
///
/// ```
/// use freight_events_core::topic::dead_letter_topic;
///
/// assert_eq!(dead_letter_topic("driver-events"), "driver-events-dlq");
/// ```
#[must_use]
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// Returns true if `topic` is itself a dead-letter topic.
#[must_use]
pub fn is_dead_letter_topic(topic: &str) -> bool {
    topic.ends_with(DEAD_LETTER_SUFFIX)
}

/// A topic the bus needs, with its creation parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicDescriptor {
    /// Topic name
    pub name: String,
    /// Partition count used when the topic has to be created
    pub partitions: i32,
    /// Replication factor used when the topic has to be created
    pub replication_factor: i32,
}

impl TopicDescriptor {
    /// Describe a topic with a replication factor of 1.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: 1,
        }
    }

    /// Set the replication factor.
    #[must_use]
    pub const fn with_replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    /// The dead-letter companion of this topic, with the same partitioning.
    #[must_use]
    pub fn dead_letter(&self) -> Self {
        Self {
            name: dead_letter_topic(&self.name),
            partitions: self.partitions,
            replication_factor: self.replication_factor,
        }
    }
}

/// Expand `descriptors` so each non-DLQ topic is followed by its dead-letter
/// companion. Duplicates are dropped, first occurrence wins.
#[must_use]
pub fn descriptors_with_dead_letters(descriptors: &[TopicDescriptor]) -> Vec<TopicDescriptor> {
    let mut expanded: Vec<TopicDescriptor> = Vec::with_capacity(descriptors.len() * 2);
    let mut push = |descriptor: TopicDescriptor| {
        if !expanded.iter().any(|d| d.name == descriptor.name) {
            expanded.push(descriptor);
        }
    };
    for descriptor in descriptors {
        push(descriptor.clone());
        if !is_dead_letter_topic(&descriptor.name) {
            push(descriptor.dead_letter());
        }
    }
    expanded
}

/// Resolves the destination topic of an event from its category.
///
/// Categories map to `{category}-events` unless overridden.
#[derive(Clone, Debug, Default)]
pub struct TopicRouter {
    overrides: HashMap<EventCategory, String>,
}

impl TopicRouter {
    /// Router with the default naming convention only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send every event of `category` to `topic` instead of the default.
    #[must_use]
    pub fn with_override(mut self, category: EventCategory, topic: impl Into<String>) -> Self {
        self.overrides.insert(category, topic.into());
        self
    }

    /// Topic for a category.
    #[must_use]
    pub fn topic_for_category(&self, category: EventCategory) -> String {
        self.overrides
            .get(&category)
            .cloned()
            .unwrap_or_else(|| category.default_topic())
    }

    /// Topic an event is published to.
    #[must_use]
    pub fn topic_for(&self, event: &Event) -> String {
        self.topic_for_category(event.metadata().category())
    }

    /// One topic per category, in category order, without duplicates.
    #[must_use]
    pub fn all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for category in EventCategory::ALL {
            let topic = self.topic_for_category(category);
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }
}
