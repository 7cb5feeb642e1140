//! # Freight Events Testing
//!
//! Testing utilities for the freight event bus.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a partitioned log with recorded client calls and
//!   failure injection, implementing `BrokerClient`
//! - [`InMemorySchemaRegistry`]: a schema registry that counts fetches
//! - [`fixtures`]: ready-made events and JSON Schemas
//! - [`properties`]: proptest strategies for event types and keys
//! - [`init_test_tracing`]: log output for failing tests
//!
//! ## Example
//!
//! ```
//! use freight_events_core::broker::BrokerClient;
//! use freight_events_testing::{InMemoryBroker, fixtures};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let registry = fixtures::registry_with_fixture_schemas();
//! let event = fixtures::driver_created("123");
//!
//! broker.producer().connect().await?;
//! assert_eq!(broker.producer_calls().connects, 1);
//! # let _ = (registry, event);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod fixtures;
pub mod properties;
pub mod registry;

pub use broker::{ClientCalls, InMemoryAdmin, InMemoryBroker, InMemoryConsumer, InMemoryProducer};
pub use registry::InMemorySchemaRegistry;

/// Install a `tracing` subscriber that writes to the test output.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
