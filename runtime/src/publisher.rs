//! Event publishing.
//!
//! A publish is one validated, awaited send. The publisher never buffers or
//! retries: a broker failure is returned to the caller, who knows whether the
//! operation that produced the event can be repeated.

use crate::metrics::PublishMetrics;
use crate::status::StatusView;
use crate::validator::SchemaValidator;
use freight_events_core::broker::{MessageHeaders, OutboundRecord, ProducerClient};
use freight_events_core::error::PublishError;
use freight_events_core::event::Event;
use freight_events_core::topic::TopicRouter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Header carrying the event type tag.
pub const EVENT_TYPE_HEADER: &str = "event-type";
/// Header carrying the payload schema version.
pub const EVENT_VERSION_HEADER: &str = "event-version";
/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Where a published event landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Destination topic
    pub topic: String,
    /// Partition assigned by the broker
    pub partition: i32,
    /// Offset assigned by the broker
    pub offset: i64,
    /// Id of the published event
    pub event_id: Uuid,
}

/// Validates, serializes and sends events.
pub struct Publisher {
    producer: Arc<dyn ProducerClient>,
    validator: Arc<SchemaValidator>,
    router: TopicRouter,
    status: StatusView,
    timeout: Duration,
}

impl Publisher {
    /// Create a publisher.
    ///
    /// `status` gates every publish: nothing is sent until the bus reports
    /// itself initialized.
    #[must_use]
    pub fn new(
        producer: Arc<dyn ProducerClient>,
        validator: Arc<SchemaValidator>,
        router: TopicRouter,
        status: StatusView,
        timeout: Duration,
    ) -> Self {
        Self {
            producer,
            validator,
            router,
            status,
            timeout,
        }
    }

    /// Publish `event` keyed by its event id.
    ///
    /// # Errors
    ///
    /// See [`publish_with_key`](Self::publish_with_key).
    pub async fn publish(&self, event: &Event) -> Result<PublishReceipt, PublishError> {
        self.send(event, None).await
    }

    /// Publish `event` with an explicit partition key. Events sharing a key are
    /// delivered in publish order.
    ///
    /// # Errors
    ///
    /// - [`PublishError::NotInitialized`] before the bus is initialized
    /// - [`PublishError::Schema`] if the payload fails validation
    /// - [`PublishError::Serialization`] if the event cannot be encoded
    /// - [`PublishError::BrokerUnavailable`] if the broker does not acknowledge
    pub async fn publish_with_key(
        &self,
        event: &Event,
        key: impl AsRef<[u8]>,
    ) -> Result<PublishReceipt, PublishError> {
        self.send(event, Some(key.as_ref())).await
    }

    /// Topic `event` will be published to.
    #[must_use]
    pub fn topic_for(&self, event: &Event) -> String {
        self.router.topic_for(event)
    }

    async fn send(&self, event: &Event, key: Option<&[u8]>) -> Result<PublishReceipt, PublishError> {
        let event_type = event.event_type().as_str();

        if !self.status.is_initialized() {
            PublishMetrics::record_error(event_type, "not_initialized");
            return Err(PublishError::NotInitialized);
        }

        if let Err(err) = self.validator.validate(event).await {
            PublishMetrics::record_error(event_type, "schema");
            warn!(event_id = %event.event_id(), event_type, error = %err, "Event rejected before publish");
            return Err(err.into());
        }

        let value = event.to_bytes().inspect_err(|_| {
            PublishMetrics::record_error(event_type, "serialization");
        })?;

        let topic = self.router.topic_for(event);
        let key = key.map_or_else(|| event.event_id().to_string().into_bytes(), <[u8]>::to_vec);
        let headers = MessageHeaders::new()
            .with(EVENT_TYPE_HEADER, event_type)
            .with(EVENT_VERSION_HEADER, event.event_version().to_string())
            .with(CORRELATION_ID_HEADER, event.metadata().correlation_id());
        let record = OutboundRecord::new(topic.clone(), value)
            .with_key(key)
            .with_headers(headers);

        let started = Instant::now();
        let delivery = match tokio::time::timeout(self.timeout, self.producer.send(record)).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(err)) => {
                PublishMetrics::record_error(event_type, "broker");
                warn!(topic = %topic, event_id = %event.event_id(), error = %err, "Publish failed");
                return Err(PublishError::BrokerUnavailable {
                    topic,
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                PublishMetrics::record_error(event_type, "timeout");
                warn!(topic = %topic, event_id = %event.event_id(), "Publish timed out");
                return Err(PublishError::BrokerUnavailable {
                    topic,
                    reason: format!("no acknowledgement within {}ms", self.timeout.as_millis()),
                });
            }
        };

        PublishMetrics::record_publish(&delivery.topic, event_type, started.elapsed());
        debug!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            event_id = %event.event_id(),
            event_type,
            "Event published"
        );

        Ok(PublishReceipt {
            topic: delivery.topic,
            partition: delivery.partition,
            offset: delivery.offset,
            event_id: event.event_id(),
        })
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("router", &self.router)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
