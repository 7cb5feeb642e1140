//! Broker client abstraction.
//!
//! The bus talks to the partitioned log only through the traits in this module,
//! so every component above it can run against an in-memory fake in tests and
//! against Kafka/Redpanda in production.
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │   BrokerClient   │  (factory)
//!                 └───┬──────┬───┬───┘
//!                     │      │   │
//!          ┌──────────┘      │   └───────────┐
//!          ▼                 ▼               ▼
//! ┌────────────────┐ ┌──────────────┐ ┌────────────────┐
//! │ ProducerClient │ │ AdminClient  │ │ ConsumerClient │ one per group
//! └────────────────┘ └──────────────┘ └────────────────┘
//! ```
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] instead of using `async fn` so the clients can
//! be shared as `Arc<dyn ProducerClient>` across tasks.

use crate::error::BrokerError;
use crate::topic::TopicDescriptor;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::sync::Arc;

/// Ordered list of message headers. Keys are unique; inserting an existing key
/// replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    entries: Vec<(String, Vec<u8>)>,
}

impl MessageHeaders {
    /// Empty header list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace a header.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(key, value);
        self
    }

    /// Raw header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Header value decoded as UTF-8 (lossy).
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(key).map(String::from_utf8_lossy)
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A record to append to a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Destination topic
    pub topic: String,
    /// Partition key; `None` lets the broker pick a partition
    pub key: Option<Vec<u8>>,
    /// Message value; `None` sends a null value (tombstone)
    pub value: Option<Vec<u8>>,
    /// Message headers
    pub headers: MessageHeaders,
}

impl OutboundRecord {
    /// Record with no key and no headers.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: Some(value),
            headers: MessageHeaders::new(),
        }
    }

    /// Record with a null value, no key and no headers.
    #[must_use]
    pub fn tombstone(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: None,
            headers: MessageHeaders::new(),
        }
    }

    /// Set the partition key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }
}

/// Broker acknowledgement of a send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Topic the record landed in
    pub topic: String,
    /// Partition the record landed in
    pub partition: i32,
    /// Offset assigned to the record
    pub offset: i64,
}

/// A message pulled from a topic, with its raw bytes untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key, if any
    pub key: Option<Vec<u8>>,
    /// Message value; `None` for tombstones
    pub value: Option<Vec<u8>>,
    /// Message headers
    pub headers: MessageHeaders,
}

impl InboundMessage {
    /// Key rendered for logs (`<none>` when absent).
    #[must_use]
    pub fn display_key(&self) -> Cow<'_, str> {
        self.key
            .as_deref()
            .map_or(Cow::Borrowed("<none>"), String::from_utf8_lossy)
    }
}

/// Sends records to the broker.
pub trait ProducerClient: Send + Sync {
    /// Establish the connection and verify the broker is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if no broker answers.
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Send one record and wait for the broker's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the record was not acknowledged.
    fn send(&self, record: OutboundRecord) -> BoxFuture<'_, Result<DeliveryReport, BrokerError>>;

    /// Flush pending sends and release the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the flush did not complete.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Topic administration.
pub trait AdminClient: Send + Sync {
    /// Establish the connection and verify the broker is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if no broker answers.
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Names of all topics on the cluster.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the metadata request fails.
    fn list_topics(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>>;

    /// Create the given topics. Topics that already exist count as created.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if any topic could not be created.
    fn create_topics<'a>(
        &'a self,
        topics: &'a [TopicDescriptor],
    ) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the client could not be closed cleanly.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Pulls messages for one consumer group.
///
/// `recv` must be cancel-safe: the pulling loop races it against a shutdown
/// signal and drops the future when shutdown wins.
pub trait ConsumerClient: Send + Sync {
    /// Join the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if no broker answers.
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;

    /// Subscribe to `topics`, reading from the group's committed offset or, for
    /// a new group, from the end of each partition.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the subscription is refused.
    fn subscribe<'a>(&'a self, topics: &'a [String]) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Wait for the next message.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the broker connection fails.
    fn recv(&self) -> BoxFuture<'_, Result<InboundMessage, BrokerError>>;

    /// Mark `message` (and everything before it on its partition) as processed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::CommitFailed`] if the offset could not be stored.
    fn commit<'a>(&'a self, message: &'a InboundMessage) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Stop fetching from `topic`/`partition` until [`resume`](Self::resume)
    /// is called. Other partitions keep flowing.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the partition is not assigned or the
    /// client is not connected.
    fn pause<'a>(&'a self, topic: &'a str, partition: i32) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Resume fetching from a paused partition.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the partition is not assigned or the
    /// client is not connected.
    fn resume<'a>(&'a self, topic: &'a str, partition: i32) -> BoxFuture<'a, Result<(), BrokerError>>;

    /// Commit the offsets of processed messages, leave the group and release
    /// the connection. Messages received but never committed are redelivered
    /// to the group's next consumer.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the client could not be closed cleanly.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>>;
}

/// Factory for the three client kinds.
///
/// `producer` and `admin` return the same shared instance on every call;
/// `consumer` builds a new client per consumer group.
pub trait BrokerClient: Send + Sync {
    /// The shared producer.
    fn producer(&self) -> Arc<dyn ProducerClient>;

    /// The shared admin client.
    fn admin(&self) -> Arc<dyn AdminClient>;

    /// A new consumer joined to `group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if the consumer cannot be built.
    fn consumer(&self, group_id: &str) -> Result<Arc<dyn ConsumerClient>, BrokerError>;
}
