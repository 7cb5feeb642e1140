//! Error taxonomy for the event bus.
//!
//! Each concern gets its own error enum so callers can tell at the type level
//! which failures are their responsibility (schema and initialization errors on
//! publish) and which ones the bus contains internally (handler failures, lazy
//! dead-letter provisioning).
//!
//! | Error | Raised by | Retried by the bus? |
//! |-------|-----------|---------------------|
//! | [`PublishError::NotInitialized`] | publisher | never |
//! | [`SchemaError`] | schema validator | never |
//! | [`BrokerError`] | broker clients | on consume only, with backoff |
//! | [`ProvisionError`] | topic provisioner | never |
//! | [`DlqError`] | dead-letter router | never (logged as data loss) |

use thiserror::Error;

/// Errors building, encoding or decoding an [`Event`](crate::event::Event).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize an event to its wire format.
    #[error("Failed to serialize event: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize an event from its wire format.
    #[error("Failed to deserialize event: {0}")]
    DeserializationFailed(String),

    /// The event type tag is not part of the platform's event catalogue.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The event category tag is not known.
    #[error("Unknown event category: {0}")]
    UnknownCategory(String),

    /// The event version is not a `MAJOR.MINOR.PATCH` semantic version.
    #[error("Invalid event version '{0}': expected MAJOR.MINOR.PATCH")]
    InvalidVersion(String),

    /// A required builder field was missing or empty.
    #[error("Missing required event field: {0}")]
    MissingField(&'static str),
}

/// Errors from payload schema validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// No schema is registered for the `(event_type, event_version)` pair.
    #[error("No schema registered for {event_type} version {version}")]
    UnknownType {
        /// The event type that was looked up
        event_type: String,
        /// The event version that was looked up
        version: String,
    },

    /// The payload does not conform to its registered schema.
    #[error("Payload for {event_type} version {version} violates its schema: {}", .violations.join("; "))]
    PayloadMismatch {
        /// The event type being validated
        event_type: String,
        /// The event version being validated
        version: String,
        /// One entry per violation, formatted as `path: message`
        violations: Vec<String>,
    },

    /// The registry returned a schema document that does not compile.
    #[error("Registered schema for {event_type} version {version} is invalid: {reason}")]
    InvalidSchema {
        /// The event type whose schema is broken
        event_type: String,
        /// The event version whose schema is broken
        version: String,
        /// Compiler error
        reason: String,
    },

    /// The schema registry could not be reached.
    #[error("Schema registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl SchemaError {
    /// Returns true if the failure is a transport problem rather than a verdict
    /// about the event itself.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryUnavailable(_))
    }
}

/// Errors reported by broker client implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached or the connection dropped.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The client was used before `connect` or after `disconnect`.
    #[error("Client not connected: {0}")]
    NotConnected(String),

    /// The broker rejected a request for a specific topic.
    #[error("Broker rejected request for topic '{topic}': {reason}")]
    Rejected {
        /// Topic involved in the request
        topic: String,
        /// Broker-supplied reason
        reason: String,
    },

    /// The client could not be configured.
    #[error("Invalid broker client configuration: {0}")]
    Configuration(String),

    /// Offset commit failed.
    #[error("Offset commit failed: {0}")]
    CommitFailed(String),
}

impl BrokerError {
    /// Returns true if retrying the operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::NotConnected(_))
    }
}

/// Errors returned to callers of `publish`.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The bus has not been initialized. This is a contract violation by the
    /// caller and is never retried by the bus.
    #[error("Event bus is not initialized")]
    NotInitialized,

    /// The event failed schema validation; nothing was sent.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The event could not be serialized; nothing was sent.
    #[error(transparent)]
    Serialization(#[from] EventError),

    /// The broker did not acknowledge the send. Safe for the caller to retry.
    #[error("Broker unavailable while publishing to '{topic}': {reason}")]
    BrokerUnavailable {
        /// Destination topic
        topic: String,
        /// Underlying broker failure
        reason: String,
    },
}

/// Errors from topic provisioning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// Listing existing topics failed.
    #[error("Failed to list topics: {0}")]
    ListFailed(String),

    /// Creating one or more topics failed.
    #[error("Failed to create topics {topics:?}: {reason}")]
    CreateFailed {
        /// Topics that were requested
        topics: Vec<String>,
        /// Underlying broker failure
        reason: String,
    },
}

/// Errors from the dead-letter router. Any of these means the failed message
/// could not be preserved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DlqError {
    /// The dead-letter record could not be sent.
    #[error("Failed to send to dead-letter topic '{topic}': {reason}")]
    SendFailed {
        /// Dead-letter topic name
        topic: String,
        /// Underlying broker failure
        reason: String,
    },
}

/// Errors registering handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A handler for this event type already exists in the registry.
    #[error("A handler for {0} is already registered")]
    DuplicateHandler(String),
}

/// Errors from bus startup and consumer group management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Operation requires an initialized bus.
    #[error("Event bus is not initialized")]
    NotInitialized,

    /// Connecting a client failed.
    #[error("Failed to connect {client}: {source}")]
    Connect {
        /// Which client failed (`producer`, `admin`, `consumer`)
        client: &'static str,
        /// Underlying broker failure
        source: BrokerError,
    },

    /// Required topics could not be provisioned.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Subscribing the consumer failed.
    #[error("Failed to subscribe group '{group_id}' to {topics:?}: {source}")]
    Subscribe {
        /// Consumer group id
        group_id: String,
        /// Requested topics
        topics: Vec<String>,
        /// Underlying broker failure
        source: BrokerError,
    },

    /// A consumer group with the same id is already running in this process.
    #[error("Consumer group '{0}' is already running")]
    GroupAlreadyRunning(String),

    /// A consumer group was started with no topics.
    #[error("Consumer group '{0}' has no topics to subscribe to")]
    NoTopics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_mismatch_lists_every_violation() {
        let err = SchemaError::PayloadMismatch {
            event_type: "DRIVER_CREATED".to_string(),
            version: "1.0.0".to_string(),
            violations: vec![
                "/driverId: 123 is not of type \"string\"".to_string(),
                "root: \"name\" is a required property".to_string(),
            ],
        };

        let message = err.to_string();
        assert!(message.contains("DRIVER_CREATED"));
        assert!(message.contains("/driverId"));
        assert!(message.contains("required property"));
    }

    #[test]
    fn only_registry_outages_are_transient_schema_errors() {
        assert!(SchemaError::RegistryUnavailable("timeout".to_string()).is_transient());
        assert!(
            !SchemaError::UnknownType {
                event_type: "LOAD_CREATED".to_string(),
                version: "9.0.0".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn broker_transience() {
        assert!(BrokerError::Unavailable("down".to_string()).is_transient());
        assert!(BrokerError::NotConnected("producer".to_string()).is_transient());
        assert!(
            !BrokerError::Rejected {
                topic: "driver-events".to_string(),
                reason: "authorization failed".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn schema_error_converts_into_publish_error() {
        let err: PublishError = SchemaError::RegistryUnavailable("refused".to_string()).into();
        assert!(matches!(err, PublishError::Schema(_)));
        assert_eq!(err.to_string(), "Schema registry unavailable: refused");
    }
}
