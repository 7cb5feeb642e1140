//! In-memory schema registry.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks only panic if a test thread already panicked

use freight_events_core::error::SchemaError;
use freight_events_core::event::{EventType, EventVersion};
use freight_events_core::schema::{SchemaKey, SchemaRegistryClient};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// In-memory [`SchemaRegistryClient`] that counts fetches per key.
///
/// Cloning shares the schemas and counters.
///
/// # Example
///
/// ```
/// use freight_events_core::event::{EventType, EventVersion};
/// use freight_events_core::schema::{SchemaKey, SchemaRegistryClient};
/// use freight_events_testing::InMemorySchemaRegistry;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = InMemorySchemaRegistry::new();
/// registry.register(EventType::DriverCreated, EventVersion::new(1, 0, 0), json!({ "type": "object" }));
///
/// let key = SchemaKey::new(EventType::DriverCreated, EventVersion::new(1, 0, 0));
/// assert!(registry.fetch_schema(key).await?.is_some());
/// assert_eq!(registry.fetch_count(key), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemorySchemaRegistry {
    schemas: Arc<RwLock<HashMap<SchemaKey, serde_json::Value>>>,
    fetches: Arc<Mutex<HashMap<SchemaKey, usize>>>,
    unavailable: Arc<AtomicBool>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl InMemorySchemaRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` for `event_type` at `version`.
    pub fn register(&self, event_type: EventType, version: EventVersion, schema: serde_json::Value) {
        self.schemas
            .write()
            .unwrap()
            .insert(SchemaKey::new(event_type, version), schema);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_schema(
        self,
        event_type: EventType,
        version: EventVersion,
        schema: serde_json::Value,
    ) -> Self {
        self.register(event_type, version, schema);
        self
    }

    /// Simulate an outage: every fetch fails with
    /// [`SchemaError::RegistryUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every fetch, to widen race windows in concurrency tests.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap() = delay;
    }

    /// Number of fetches issued for `key`, including failed ones.
    #[must_use]
    pub fn fetch_count(&self, key: SchemaKey) -> usize {
        self.fetches.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    /// Number of fetches issued for any key.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

impl std::fmt::Debug for InMemorySchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySchemaRegistry")
            .field("schemas", &self.schemas.read().unwrap().len())
            .field("total_fetches", &self.total_fetches())
            .finish()
    }
}

impl SchemaRegistryClient for InMemorySchemaRegistry {
    fn fetch_schema(
        &self,
        key: SchemaKey,
    ) -> BoxFuture<'_, Result<Option<serde_json::Value>, SchemaError>> {
        Box::pin(async move {
            *self.fetches.lock().unwrap().entry(key).or_insert(0) += 1;

            let delay = *self.delay.read().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.unavailable.load(Ordering::SeqCst) {
                return Err(SchemaError::RegistryUnavailable(
                    "connection refused".to_string(),
                ));
            }
            Ok(self.schemas.read().unwrap().get(&key).cloned())
        })
    }
}
