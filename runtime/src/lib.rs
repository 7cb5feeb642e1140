//! # Freight Events Runtime
//!
//! Runtime implementation of the freight platform's event bus client.
//!
//! This crate turns the broker and registry traits from `freight-events-core`
//! into a working bus: validated publishing, consumer groups with per-partition
//! ordering, dead-letter routing and an ordered startup/shutdown lifecycle.
//!
//! ## Core Components
//!
//! - **Schema Validator**: checks payloads against registry schemas, caching
//!   each compiled schema once per process
//! - **Topic Provisioner**: creates missing topics on startup
//! - **Publisher**: validates, serializes and sends events
//! - **Consumer Group**: subscribes, dispatches to handlers, commits offsets
//! - **Dead-Letter Router**: sends failed messages to `<topic>-dlq` with
//!   failure headers
//! - **Event Bus**: the lifecycle manager tying the above together
//!
//! ## Example
//!
//! ```ignore
//! use freight_events_runtime::{BusConfig, EventBus};
//!
//! let bus = EventBus::new(BusConfig::from_env()?, broker, registry);
//! bus.initialize().await?;
//! bus.publish(&event).await?;
//! bus.consume(&["load-events"], "gamification", handlers).await?;
//! bus.shutdown().await;
//! ```

/// Bus configuration loaded from the environment
pub mod config;

/// Consumer group runtime
pub mod consumer;

/// Dead-letter routing for messages that cannot be processed
pub mod dead_letter;

/// Startup, shutdown and health of the whole bus
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Topic provisioning
pub mod provisioner;

/// Event publishing
pub mod publisher;

/// Retry logic with exponential backoff
pub mod retry;

/// Shared bus status
pub mod status;

/// Payload validation against registry schemas
pub mod validator;

pub use config::{BusConfig, ConfigError, ConsumerConfig, TopicConfig};
pub use consumer::{ConsumerGroup, GroupServices};
pub use dead_letter::{DeadLetterRouter, Failure, FailureKind};
pub use lifecycle::{EventBus, shutdown_signal};
pub use metrics::{MetricsError, MetricsExporter};
pub use provisioner::TopicProvisioner;
pub use publisher::{PublishReceipt, Publisher};
pub use retry::RetryPolicy;
pub use status::{BusState, GroupHealth, GroupState, HealthStatus, StatusView};
pub use validator::SchemaValidator;
