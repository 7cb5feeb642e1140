//! # Freight Events Core
//!
//! Core types and traits for the freight platform's event bus.
//!
//! Every microservice (users, loads, carriers, gamification, market
//! intelligence, notifications) talks to the bus through two narrow
//! interfaces: *publish an event* and *register a handler for event type X in
//! consumer group G*. This crate defines the vocabulary those interfaces are
//! written in:
//!
//! - [`event`]: the [`Event`](event::Event) envelope and its wire format
//! - [`topic`]: topic naming, dead-letter companions and routing
//! - [`broker`]: producer/admin/consumer client traits
//! - [`schema`]: the schema registry client trait
//! - [`handler`]: handler trait and per-group registries
//! - [`error`]: the error taxonomy
//!
//! The runtime that implements publishing, consuming and lifecycle lives in
//! `freight-events-runtime`; the Kafka/Redpanda client lives in
//! `freight-events-redpanda`.

pub mod broker;
pub mod error;
pub mod event;
pub mod handler;
pub mod schema;
pub mod topic;

// Re-export commonly used types
pub use broker::{
    AdminClient, BrokerClient, ConsumerClient, DeliveryReport, InboundMessage, MessageHeaders,
    OutboundRecord, ProducerClient,
};
pub use error::{
    BrokerError, DlqError, EventError, LifecycleError, ProvisionError, PublishError,
    RegistrationError, SchemaError,
};
pub use event::{Event, EventBuilder, EventCategory, EventMetadata, EventType, EventVersion};
pub use handler::{EventHandler, HandlerContext, HandlerError, HandlerRegistry};
pub use schema::{SchemaKey, SchemaRegistryClient};
pub use topic::{
    TopicDescriptor, TopicRouter, dead_letter_topic, descriptors_with_dead_letters,
    is_dead_letter_topic,
};
