//! Payload validation against the schema registry.
//!
//! Schemas are fetched on first use and compiled once. The cache is keyed by
//! `(event_type, event_version)` and never invalidated: a published schema
//! version is immutable, so a cached entry is always current.
//!
//! Only successful lookups are cached. Registry outages and unknown pairs are
//! retried on the next call, so a schema registered after the first miss
//! becomes visible without a restart.

use freight_events_core::error::SchemaError;
use freight_events_core::event::Event;
use freight_events_core::schema::{SchemaKey, SchemaRegistryClient};
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

type CacheSlot = Arc<OnceCell<Arc<JSONSchema>>>;

/// Validates event payloads against registered JSON Schemas.
pub struct SchemaValidator {
    registry: Arc<dyn SchemaRegistryClient>,
    cache: Mutex<HashMap<SchemaKey, CacheSlot>>,
}

impl SchemaValidator {
    /// Create a validator backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn SchemaRegistryClient>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `event`'s payload against the schema for its type and version.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::UnknownType`] if no schema is registered for the pair
    /// - [`SchemaError::PayloadMismatch`] listing every violation
    /// - [`SchemaError::InvalidSchema`] if the registered schema does not compile
    /// - [`SchemaError::RegistryUnavailable`] if the registry cannot be reached
    pub async fn validate(&self, event: &Event) -> Result<(), SchemaError> {
        let key = SchemaKey::of(event);
        let schema = self.schema_for(key).await?;

        if let Err(errors) = schema.validate(event.payload()) {
            let violations: Vec<String> = errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    let path = if path.is_empty() { "root".to_string() } else { path };
                    format!("{path}: {error}")
                })
                .collect();
            debug!(
                event_id = %event.event_id(),
                schema = %key,
                violations = violations.len(),
                "Payload rejected by schema"
            );
            return Err(SchemaError::PayloadMismatch {
                event_type: key.event_type.to_string(),
                version: key.version.to_string(),
                violations,
            });
        }

        Ok(())
    }

    /// Number of compiled schemas currently cached.
    pub async fn cached_schemas(&self) -> usize {
        self.cache
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    async fn schema_for(&self, key: SchemaKey) -> Result<Arc<JSONSchema>, SchemaError> {
        let slot = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(key).or_default())
        };

        // Concurrent callers for the same key wait on one fetch; a failed
        // fetch leaves the slot empty for the next caller.
        slot.get_or_try_init(|| self.fetch_and_compile(key))
            .await
            .map(Arc::clone)
    }

    async fn fetch_and_compile(&self, key: SchemaKey) -> Result<Arc<JSONSchema>, SchemaError> {
        debug!(schema = %key, "Fetching schema from registry");
        let document = self.registry.fetch_schema(key).await.map_err(|err| {
            warn!(schema = %key, error = %err, "Schema registry lookup failed");
            err
        })?;

        let Some(document) = document else {
            return Err(SchemaError::UnknownType {
                event_type: key.event_type.to_string(),
                version: key.version.to_string(),
            });
        };

        let compiled = JSONSchema::compile(&document).map_err(|e| SchemaError::InvalidSchema {
            event_type: key.event_type.to_string(),
            version: key.version.to_string(),
            reason: e.to_string(),
        })?;

        debug!(schema = %key, "Schema compiled and cached");
        Ok(Arc::new(compiled))
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}
