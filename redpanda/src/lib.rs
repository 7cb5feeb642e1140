//! Redpanda broker client for the freight event bus.
//!
//! This crate provides the production implementations of the broker and
//! schema registry traits from `freight-events-core`:
//!
//! - [`RedpandaBroker`]: a [`BrokerClient`] over rdkafka, the Kafka protocol
//!   client, so it works with Redpanda, Apache Kafka, AWS MSK and other
//!   Kafka-compatible systems
//! - [`HttpSchemaRegistry`]: a [`SchemaRegistryClient`] over the registry's
//!   HTTP API
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  RedpandaBroker  │
//!                 └───┬──────┬───┬───┘
//!                     │      │   │
//!          ┌──────────┘      │   └─────────────┐
//!          ▼                 ▼                 ▼
//! ┌──────────────────┐ ┌───────────────┐ ┌──────────────────┐
//! │ RedpandaProducer │ │ RedpandaAdmin │ │ RedpandaConsumer │
//! │ (FutureProducer) │ │ (AdminClient) │ │ (StreamConsumer) │
//! └──────────────────┘ └───────────────┘ └──────────────────┘
//! ```
//!
//! Clients are created lazily on `connect` and dropped on `disconnect`, so a
//! broker value can be built before the cluster is reachable.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - `enable.auto.commit` is off; the runtime commits each message once it has
//!   been handled or dead-lettered
//! - A new consumer group starts at the end of each partition
//!   (`auto.offset.reset = latest`)
//! - Ordering is guaranteed within a partition; records sharing a key share a
//!   partition
//!
//! # Example
//!
//! ```no_run
//! use freight_events_redpanda::{HttpSchemaRegistry, RedpandaBroker};
//! use freight_events_runtime::{BusConfig, EventBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BusConfig::from_env()?;
//! let broker = RedpandaBroker::from_config(&config)?;
//! let registry = HttpSchemaRegistry::from_config(&config);
//!
//! let bus = EventBus::new(config, Arc::new(broker), Arc::new(registry));
//! bus.initialize().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admin;
mod consumer;
mod convert;
mod producer;
mod registry;
mod settings;

pub use admin::RedpandaAdmin;
pub use consumer::RedpandaConsumer;
pub use producer::RedpandaProducer;
pub use registry::HttpSchemaRegistry;
pub use settings::ClientSettings;

use freight_events_core::broker::{AdminClient, BrokerClient, ConsumerClient, ProducerClient};
use freight_events_core::error::BrokerError;
use freight_events_runtime::BusConfig;
use std::sync::Arc;
use std::time::Duration;

/// Redpanda implementation of [`BrokerClient`].
///
/// The producer and admin client are shared; every consumer group gets its
/// own consumer.
///
/// # Example
///
/// ```no_run
/// use freight_events_redpanda::RedpandaBroker;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let broker = RedpandaBroker::new("localhost:9092")?;
///
/// // Custom configuration
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .client_id("load-service")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    settings: Arc<ClientSettings>,
    producer: Arc<RedpandaProducer>,
    admin: Arc<RedpandaAdmin>,
}

impl RedpandaBroker {
    /// Create a broker client with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if `brokers` is empty.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a broker client from the bus configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if no brokers are configured.
    pub fn from_config(config: &BusConfig) -> Result<Self, BrokerError> {
        Self::builder()
            .brokers(&config.brokers)
            .client_id(&config.client_id)
            .timeout(config.producer_timeout)
            .build()
    }

    /// Create a new builder for configuring the broker client.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.settings.brokers
    }

    /// Client settings shared by every client this broker creates.
    #[must_use]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

impl BrokerClient for RedpandaBroker {
    fn producer(&self) -> Arc<dyn ProducerClient> {
        Arc::clone(&self.producer) as Arc<dyn ProducerClient>
    }

    fn admin(&self) -> Arc<dyn AdminClient> {
        Arc::clone(&self.admin) as Arc<dyn AdminClient>
    }

    fn consumer(&self, group_id: &str) -> Result<Arc<dyn ConsumerClient>, BrokerError> {
        if group_id.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "consumer group id must not be empty".to_string(),
            ));
        }
        Ok(Arc::new(RedpandaConsumer::new(
            Arc::clone(&self.settings),
            group_id,
        )))
    }
}

impl std::fmt::Debug for RedpandaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaBroker")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the client id reported to the broker.
    ///
    /// Default: "freight-events"
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// # Parameters
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// # Parameters
    ///
    /// - `compression`: "none", "gzip", "snappy", "lz4", "zstd"
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the timeout for sends, metadata requests and topic creation.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where a new consumer group starts reading:
    /// - `"earliest"`: Start from the beginning of the topic
    /// - `"latest"`: Start from the end (only new events)
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer group session timeout.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// No connection is attempted here; clients connect on `connect`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if brokers are not set or the
    /// offset reset policy is unknown.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| BrokerError::Configuration("Brokers not configured".to_string()))?;

        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "latest".to_string());
        if !matches!(auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(BrokerError::Configuration(format!(
                "auto_offset_reset must be 'earliest' or 'latest', got '{auto_offset_reset}'"
            )));
        }

        let settings = Arc::new(ClientSettings {
            brokers,
            client_id: self.client_id.unwrap_or_else(|| "freight-events".to_string()),
            producer_acks: self.producer_acks.unwrap_or_else(|| "all".to_string()),
            compression: self.compression.unwrap_or_else(|| "none".to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(10)),
        });

        tracing::info!(
            brokers = %settings.brokers,
            client_id = %settings.client_id,
            acks = %settings.producer_acks,
            compression = %settings.compression,
            auto_offset_reset = %settings.auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer: Arc::new(RedpandaProducer::new(Arc::clone(&settings))),
            admin: Arc::new(RedpandaAdmin::new(Arc::clone(&settings))),
            settings,
        })
    }
}
