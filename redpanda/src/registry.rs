//! Schema registry client over HTTP.
//!
//! Schemas are looked up with
//! `GET {base_url}/subjects/{EVENT_TYPE}/versions/{MAJOR.MINOR.PATCH}`.
//! The response may be a Confluent-style envelope whose `schema` field holds
//! the schema document as a JSON string, or the schema document itself.

use freight_events_core::error::SchemaError;
use freight_events_core::schema::{SchemaKey, SchemaRegistryClient};
use freight_events_runtime::BusConfig;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// [`SchemaRegistryClient`] backed by the registry's HTTP API.
#[derive(Clone)]
pub struct HttpSchemaRegistry {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct SchemaEnvelope {
    schema: Value,
}

impl HttpSchemaRegistry {
    /// Create a client for the registry at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client for the registry configured in `config`.
    #[must_use]
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(&config.schema_registry_url)
    }

    /// Create a client that reuses an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Set the per-request timeout (default: 5 seconds).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registry base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn schema_url(&self, key: SchemaKey) -> String {
        format!(
            "{}/subjects/{}/versions/{}",
            self.base_url,
            key.subject(),
            key.version
        )
    }

    async fn fetch(&self, key: SchemaKey) -> Result<Option<Value>, SchemaError> {
        let url = self.schema_url(key);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SchemaError::RegistryUnavailable(format!("GET {url}: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .json::<Value>()
                    .await
                    .map_err(|e| SchemaError::RegistryUnavailable(format!("GET {url}: {e}")))?;
                schema_document(body)
                    .map(Some)
                    .map_err(|reason| SchemaError::InvalidSchema {
                        event_type: key.event_type.to_string(),
                        version: key.version.to_string(),
                        reason,
                    })
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SchemaError::RegistryUnavailable(format!(
                    "GET {url} returned {status}: {body}"
                )))
            }
        }
    }
}

impl SchemaRegistryClient for HttpSchemaRegistry {
    fn fetch_schema(&self, key: SchemaKey) -> BoxFuture<'_, Result<Option<Value>, SchemaError>> {
        Box::pin(async move {
            tracing::debug!(schema = %key, "Fetching schema");
            self.fetch(key).await
        })
    }
}

impl std::fmt::Debug for HttpSchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSchemaRegistry")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Extract the schema document from a registry response body.
fn schema_document(body: Value) -> Result<Value, String> {
    match serde_json::from_value::<SchemaEnvelope>(body.clone()) {
        Ok(SchemaEnvelope {
            schema: Value::String(raw),
        }) => serde_json::from_str(&raw).map_err(|e| format!("schema field is not JSON: {e}")),
        Ok(SchemaEnvelope {
            schema: document @ Value::Object(_),
        }) => Ok(document),
        _ => Ok(body),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use freight_events_core::event::{EventType, EventVersion};
    use serde_json::json;

    fn key() -> SchemaKey {
        SchemaKey::new(EventType::DriverCreated, EventVersion::new(1, 2, 0))
    }

    #[test]
    fn url_uses_subject_and_semantic_version() {
        let registry = HttpSchemaRegistry::new("http://registry:8081/");

        assert_eq!(registry.base_url(), "http://registry:8081");
        assert_eq!(
            registry.schema_url(key()),
            "http://registry:8081/subjects/DRIVER_CREATED/versions/1.2.0"
        );
    }

    #[test]
    fn envelope_with_string_schema_is_unwrapped() {
        let body = json!({
            "subject": "DRIVER_CREATED",
            "version": 3,
            "schema": "{\"type\":\"object\",\"required\":[\"driverId\"]}"
        });

        let document = schema_document(body).expect("document");

        assert_eq!(document, json!({ "type": "object", "required": ["driverId"] }));
    }

    #[test]
    fn envelope_with_object_schema_is_unwrapped() {
        let body = json!({ "schema": { "type": "object" } });
        assert_eq!(schema_document(body).expect("document"), json!({ "type": "object" }));
    }

    #[test]
    fn bare_schema_document_is_used_as_is() {
        let body = json!({ "type": "object", "properties": { "loadId": { "type": "string" } } });
        assert_eq!(schema_document(body.clone()).expect("document"), body);
    }

    #[test]
    fn malformed_schema_string_is_reported() {
        let body = json!({ "schema": "{not json" });
        assert!(schema_document(body).is_err());
    }

    #[tokio::test]
    async fn unreachable_registry_is_transient() {
        // Nothing listens on port 1
        let registry = HttpSchemaRegistry::new("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(2));

        let err = registry.fetch_schema(key()).await.expect_err("unreachable");

        assert!(matches!(err, SchemaError::RegistryUnavailable(_)));
        assert!(err.is_transient());
    }
}
