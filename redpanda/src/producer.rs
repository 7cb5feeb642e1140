//! Producer client over rdkafka's `FutureProducer`.

use crate::convert::{join_error, send_error, to_kafka_headers};
use crate::settings::ClientSettings;
use freight_events_core::broker::{DeliveryReport, OutboundRecord, ProducerClient};
use freight_events_core::error::BrokerError;
use futures::future::BoxFuture;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared producer. Created on `connect`, flushed and dropped on `disconnect`.
pub struct RedpandaProducer {
    settings: Arc<ClientSettings>,
    producer: RwLock<Option<FutureProducer>>,
}

impl RedpandaProducer {
    pub(crate) fn new(settings: Arc<ClientSettings>) -> Self {
        Self {
            settings,
            producer: RwLock::new(None),
        }
    }

    async fn current(&self) -> Result<FutureProducer, BrokerError> {
        self.producer
            .read()
            .await
            .clone()
            .ok_or_else(|| BrokerError::NotConnected("producer".to_string()))
    }
}

impl ProducerClient for RedpandaProducer {
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut slot = self.producer.write().await;
            if slot.is_some() {
                return Ok(());
            }

            let producer: FutureProducer = self
                .settings
                .producer_config()
                .create()
                .map_err(|e| BrokerError::Configuration(format!("Failed to create producer: {e}")))?;

            // Creating the client does not contact the cluster; a metadata
            // request does.
            let probe = producer.clone();
            let timeout = self.settings.timeout;
            let metadata = tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout))
                .await
                .map_err(|e| join_error(&e))?
                .map_err(|e| BrokerError::Unavailable(format!("Failed to reach brokers: {e}")))?;

            tracing::info!(
                brokers = %self.settings.brokers,
                cluster_brokers = metadata.brokers().len(),
                "Producer connected"
            );
            *slot = Some(producer);
            Ok(())
        })
    }

    fn send(&self, record: OutboundRecord) -> BoxFuture<'_, Result<DeliveryReport, BrokerError>> {
        Box::pin(async move {
            let producer = self.current().await?;

            let mut kafka_record = FutureRecord::<[u8], [u8]>::to(&record.topic)
                .headers(to_kafka_headers(&record.headers));
            if let Some(value) = record.value.as_deref() {
                kafka_record = kafka_record.payload(value);
            }
            if let Some(key) = record.key.as_deref() {
                kafka_record = kafka_record.key(key);
            }

            match producer
                .send(kafka_record, Timeout::After(self.settings.timeout))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        topic = %record.topic,
                        partition = partition,
                        offset = offset,
                        "Record acknowledged"
                    );
                    Ok(DeliveryReport {
                        topic: record.topic.clone(),
                        partition,
                        offset,
                    })
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %record.topic,
                        error = %kafka_error,
                        "Failed to send record"
                    );
                    Err(send_error(&record.topic, &kafka_error))
                }
            }
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let Some(producer) = self.producer.write().await.take() else {
                return Ok(());
            };

            let timeout = self.settings.timeout;
            tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| join_error(&e))?
                .map_err(|e| BrokerError::Unavailable(format!("Failed to flush producer: {e}")))?;

            tracing::info!("Producer disconnected");
            Ok(())
        })
    }
}

impl std::fmt::Debug for RedpandaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaProducer")
            .field("brokers", &self.settings.brokers)
            .finish_non_exhaustive()
    }
}
