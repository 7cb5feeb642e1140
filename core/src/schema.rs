//! Schema registry abstraction.
//!
//! The registry is an external service that maps `(event_type, event_version)`
//! to a JSON Schema document. The bus only queries it; registering and
//! evolving schemas happens elsewhere.

use crate::error::SchemaError;
use crate::event::{Event, EventType, EventVersion};
use futures::future::BoxFuture;
use std::fmt;

/// Registry lookup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaKey {
    /// Event type tag
    pub event_type: EventType,
    /// Payload schema version
    pub version: EventVersion,
}

impl SchemaKey {
    /// Create a key.
    #[must_use]
    pub const fn new(event_type: EventType, version: EventVersion) -> Self {
        Self {
            event_type,
            version,
        }
    }

    /// Key for an event's own type and version.
    #[must_use]
    pub const fn of(event: &Event) -> Self {
        Self::new(event.event_type(), event.event_version())
    }

    /// Registry subject name, e.g. `DRIVER_CREATED`.
    #[must_use]
    pub const fn subject(&self) -> &'static str {
        self.event_type.as_str()
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_type, self.version)
    }
}

/// Read-only client for the external schema registry.
pub trait SchemaRegistryClient: Send + Sync {
    /// Fetch the JSON Schema for `key`.
    ///
    /// Returns `Ok(None)` when the registry answers but has no schema for the
    /// pair.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::RegistryUnavailable`] if the registry cannot be
    /// reached or answers with a server error.
    fn fetch_schema(
        &self,
        key: SchemaKey,
    ) -> BoxFuture<'_, Result<Option<serde_json::Value>, SchemaError>>;
}
