//! Event bus configuration.
//!
//! Loaded from environment variables with defaults suitable for a local
//! single-broker Redpanda:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KAFKA_BROKERS` | `localhost:9092` |
//! | `SCHEMA_REGISTRY_URL` | `http://localhost:8081` |
//! | `EVENT_BUS_CLIENT_ID` | `freight-events` |
//! | `EVENT_BUS_PRODUCER_TIMEOUT_MS` | `5000` |
//! | `TOPIC_AUTO_CREATION_ENABLED` | `true` |
//! | `TOPIC_DEFAULT_PARTITIONS` | `3` |
//! | `TOPIC_REPLICATION_FACTOR` | `1` |
//! | `EVENT_BUS_PROVISION_DLQ` | `true` |
//! | `EVENT_BUS_HANDLER_MAX_RETRIES` | `0` |

use crate::retry::RetryPolicy;
use freight_events_core::event::EventCategory;
use freight_events_core::topic::{TopicDescriptor, TopicRouter};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable or setting has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable or setting name
        var: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Topic provisioning settings.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Create missing topics at startup and dead-letter topics on demand
    pub auto_create: bool,
    /// Partition count for topics the bus creates
    pub default_partitions: i32,
    /// Replication factor for topics the bus creates
    pub replication_factor: i32,
    /// Pre-provision a `-dlq` companion for every topic at startup
    pub provision_dead_letter_topics: bool,
    /// Category to topic mapping
    pub router: TopicRouter,
    /// Extra topics to provision besides the category topics
    pub extra_topics: Vec<String>,
}

impl TopicConfig {
    /// Descriptor for `name` with the configured partitioning.
    #[must_use]
    pub fn descriptor(&self, name: impl Into<String>) -> TopicDescriptor {
        TopicDescriptor::new(name, self.default_partitions)
            .with_replication_factor(self.replication_factor)
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            auto_create: true,
            default_partitions: 3,
            replication_factor: 1,
            provision_dead_letter_topics: true,
            router: TopicRouter::new(),
            extra_topics: Vec::new(),
        }
    }
}

/// Consumer group runtime settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// In-process retries of a failing handler before dead-lettering
    pub handler_retry: RetryPolicy,
    /// Backoff for reconnecting the pulling loop after broker failures
    pub reconnect: RetryPolicy,
    /// Backoff for schema lookups while the registry is unreachable
    pub schema_retry: RetryPolicy,
    /// Queued messages per partition before the partition is paused at the broker
    pub partition_queue_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            handler_retry: RetryPolicy::no_retries(),
            reconnect: RetryPolicy::builder()
                .max_retries(usize::MAX)
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(true)
                .build(),
            schema_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(5))
                .build(),
            partition_queue_capacity: 64,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Schema registry base URL
    pub schema_registry_url: String,
    /// Client id reported to the broker
    pub client_id: String,
    /// How long a publish waits for the broker acknowledgement
    pub producer_timeout: Duration,
    /// Topic provisioning settings
    pub topics: TopicConfig,
    /// Consumer group settings
    pub consumer: ConsumerConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            schema_registry_url: "http://localhost:8081".to_string(),
            client_id: "freight-events".to_string(),
            producer_timeout: Duration::from_millis(5000),
            topics: TopicConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl BusConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an unusable
    /// value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value. Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an unusable
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |var: &str, default: String| lookup(var).unwrap_or(default);

        let max_retries: usize = parse_var(&lookup, "EVENT_BUS_HANDLER_MAX_RETRIES", 0)?;
        let handler_retry = if max_retries == 0 {
            RetryPolicy::no_retries()
        } else {
            RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(5))
                .build()
        };

        let config = Self {
            brokers: string("KAFKA_BROKERS", defaults.brokers),
            schema_registry_url: string("SCHEMA_REGISTRY_URL", defaults.schema_registry_url),
            client_id: string("EVENT_BUS_CLIENT_ID", defaults.client_id),
            producer_timeout: Duration::from_millis(parse_var(
                &lookup,
                "EVENT_BUS_PRODUCER_TIMEOUT_MS",
                5000_u64,
            )?),
            topics: TopicConfig {
                auto_create: parse_bool(&lookup, "TOPIC_AUTO_CREATION_ENABLED", true)?,
                default_partitions: parse_var(&lookup, "TOPIC_DEFAULT_PARTITIONS", 3)?,
                replication_factor: parse_var(&lookup, "TOPIC_REPLICATION_FACTOR", 1)?,
                provision_dead_letter_topics: parse_bool(&lookup, "EVENT_BUS_PROVISION_DLQ", true)?,
                ..defaults.topics
            },
            consumer: ConsumerConfig {
                handler_retry,
                ..defaults.consumer
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for empty broker lists, non-positive
    /// partition or replication counts, a zero producer timeout or a zero
    /// partition queue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.trim().is_empty() {
            return Err(invalid("KAFKA_BROKERS", "must not be empty"));
        }
        if self.topics.default_partitions < 1 {
            return Err(invalid("TOPIC_DEFAULT_PARTITIONS", "must be at least 1"));
        }
        if self.topics.replication_factor < 1 {
            return Err(invalid("TOPIC_REPLICATION_FACTOR", "must be at least 1"));
        }
        if self.producer_timeout.is_zero() {
            return Err(invalid("EVENT_BUS_PRODUCER_TIMEOUT_MS", "must be greater than 0"));
        }
        if self.consumer.partition_queue_capacity == 0 {
            return Err(invalid("partition_queue_capacity", "must be greater than 0"));
        }
        Ok(())
    }

    /// Set the broker addresses.
    #[must_use]
    pub fn with_brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = brokers.into();
        self
    }

    /// Set the schema registry URL.
    #[must_use]
    pub fn with_schema_registry_url(mut self, url: impl Into<String>) -> Self {
        self.schema_registry_url = url.into();
        self
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Enable or disable topic auto-creation.
    #[must_use]
    pub const fn with_auto_create_topics(mut self, enabled: bool) -> Self {
        self.topics.auto_create = enabled;
        self
    }

    /// Set the partition count for created topics.
    #[must_use]
    pub const fn with_default_partitions(mut self, partitions: i32) -> Self {
        self.topics.default_partitions = partitions;
        self
    }

    /// Enable or disable pre-provisioning of dead-letter topics.
    #[must_use]
    pub const fn with_dead_letter_provisioning(mut self, enabled: bool) -> Self {
        self.topics.provision_dead_letter_topics = enabled;
        self
    }

    /// Route `category` to `topic` instead of `<category>-events`.
    #[must_use]
    pub fn with_topic_override(mut self, category: EventCategory, topic: impl Into<String>) -> Self {
        self.topics.router = self.topics.router.with_override(category, topic);
        self
    }

    /// Provision `topic` at startup in addition to the category topics.
    #[must_use]
    pub fn with_extra_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.extra_topics.push(topic.into());
        self
    }

    /// Set the handler retry policy.
    #[must_use]
    pub fn with_handler_retry(mut self, policy: RetryPolicy) -> Self {
        self.consumer.handler_retry = policy;
        self
    }

    /// Set the pulling loop reconnect policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.consumer.reconnect = policy;
        self
    }

    /// Set the schema lookup retry policy.
    #[must_use]
    pub fn with_schema_retry(mut self, policy: RetryPolicy) -> Self {
        self.consumer.schema_retry = policy;
        self
    }

    /// Topics provisioned at startup: one per category plus extra topics, each
    /// followed by its dead-letter companion when pre-provisioning is on.
    #[must_use]
    pub fn startup_topics(&self) -> Vec<TopicDescriptor> {
        let mut names = self.topics.router.all_topics();
        for topic in &self.topics.extra_topics {
            if !names.contains(topic) {
                names.push(topic.clone());
            }
        }
        let descriptors: Vec<TopicDescriptor> =
            names.into_iter().map(|name| self.topics.descriptor(name)).collect();

        if self.topics.provision_dead_letter_topics {
            freight_events_core::topic::descriptors_with_dead_letters(&descriptors)
        } else {
            descriptors
        }
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(invalid(var, format!("'{raw}' is not a boolean"))),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = BusConfig::from_lookup(lookup(&[])).expect("defaults are valid");

        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.schema_registry_url, "http://localhost:8081");
        assert!(config.topics.auto_create);
        assert_eq!(config.topics.default_partitions, 3);
        assert_eq!(config.topics.replication_factor, 1);
        assert_eq!(config.producer_timeout, Duration::from_secs(5));
        assert_eq!(config.consumer.handler_retry.max_retries, 0);
    }

    #[test]
    fn env_values_override_defaults() {
        let config = BusConfig::from_lookup(lookup(&[
            ("KAFKA_BROKERS", "redpanda-0:9092,redpanda-1:9092"),
            ("TOPIC_AUTO_CREATION_ENABLED", "false"),
            ("TOPIC_DEFAULT_PARTITIONS", "12"),
            ("EVENT_BUS_HANDLER_MAX_RETRIES", "2"),
        ]))
        .expect("valid config");

        assert_eq!(config.brokers, "redpanda-0:9092,redpanda-1:9092");
        assert!(!config.topics.auto_create);
        assert_eq!(config.topics.default_partitions, 12);
        assert_eq!(config.consumer.handler_retry.max_retries, 2);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = BusConfig::from_lookup(lookup(&[("TOPIC_DEFAULT_PARTITIONS", "three")]))
            .expect_err("non-numeric partitions");
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "TOPIC_DEFAULT_PARTITIONS", .. }
        ));

        let err = BusConfig::from_lookup(lookup(&[("TOPIC_AUTO_CREATION_ENABLED", "maybe")]))
            .expect_err("non-boolean flag");
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "TOPIC_AUTO_CREATION_ENABLED", .. }
        ));

        let err = BusConfig::from_lookup(lookup(&[("TOPIC_REPLICATION_FACTOR", "0")]))
            .expect_err("zero replication");
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "TOPIC_REPLICATION_FACTOR", .. }
        ));
    }

    #[test]
    fn startup_topics_include_dead_letter_companions() {
        let config = BusConfig::default().with_extra_topic("audit-events");
        let names: Vec<String> = config.startup_topics().into_iter().map(|d| d.name).collect();

        assert!(names.contains(&"driver-events".to_string()));
        assert!(names.contains(&"driver-events-dlq".to_string()));
        assert!(names.contains(&"audit-events-dlq".to_string()));
        assert_eq!(names.len(), (EventCategory::ALL.len() + 1) * 2);
    }

    #[test]
    fn startup_topics_without_dead_letters() {
        let config = BusConfig::default()
            .with_dead_letter_provisioning(false)
            .with_topic_override(EventCategory::Market, "market-intel");
        let names: Vec<String> = config.startup_topics().into_iter().map(|d| d.name).collect();

        assert!(names.contains(&"market-intel".to_string()));
        assert!(names.iter().all(|n| !n.ends_with("-dlq")));
    }
}
