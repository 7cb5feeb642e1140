//! Consumer client over rdkafka's `StreamConsumer`.

use crate::convert::{join_error, to_inbound};
use crate::settings::ClientSettings;
use freight_events_core::broker::{ConsumerClient, InboundMessage};
use freight_events_core::error::BrokerError;
use futures::future::BoxFuture;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consumer for one consumer group. Created on `connect`; `disconnect`
/// commits the offsets of processed messages and leaves the group.
pub struct RedpandaConsumer {
    settings: Arc<ClientSettings>,
    group_id: String,
    consumer: RwLock<Option<Arc<StreamConsumer>>>,
}

impl RedpandaConsumer {
    pub(crate) fn new(settings: Arc<ClientSettings>, group_id: &str) -> Self {
        Self {
            settings,
            group_id: group_id.to_string(),
            consumer: RwLock::new(None),
        }
    }

    /// Consumer group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn current(&self) -> Result<Arc<StreamConsumer>, BrokerError> {
        self.consumer
            .read()
            .await
            .clone()
            .ok_or_else(|| BrokerError::NotConnected(format!("consumer {}", self.group_id)))
    }
}

impl ConsumerClient for RedpandaConsumer {
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let consumer: StreamConsumer = self
                .settings
                .consumer_config(&self.group_id)
                .create()
                .map_err(|e| BrokerError::Configuration(format!("Failed to create consumer: {e}")))?;
            let consumer = Arc::new(consumer);

            let probe = Arc::clone(&consumer);
            let timeout = self.settings.timeout;
            tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout))
                .await
                .map_err(|e| join_error(&e))?
                .map_err(|e| BrokerError::Unavailable(format!("Failed to reach brokers: {e}")))?;

            // A reconnect replaces the previous client
            *self.consumer.write().await = Some(consumer);
            tracing::info!(consumer_group = %self.group_id, "Consumer connected");
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topics: &'a [String]) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let consumer = self.current().await?;
            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| BrokerError::Rejected {
                topic: topics.join(","),
                reason: format!("Failed to subscribe: {e}"),
            })?;

            tracing::info!(
                consumer_group = %self.group_id,
                topics = ?topics,
                auto_offset_reset = %self.settings.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );
            Ok(())
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<InboundMessage, BrokerError>> {
        Box::pin(async move {
            let consumer = self.current().await?;
            let message = consumer
                .recv()
                .await
                .map_err(|e| BrokerError::Unavailable(format!("Failed to receive message: {e}")))?;
            let inbound = to_inbound(&message);
            tracing::trace!(
                consumer_group = %self.group_id,
                topic = %inbound.topic,
                partition = inbound.partition,
                offset = inbound.offset,
                "Received message"
            );
            Ok(inbound)
        })
    }

    fn commit<'a>(&'a self, message: &'a InboundMessage) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let consumer = self.current().await?;

            // The committed offset is the next one to read
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| BrokerError::CommitFailed(e.to_string()))?;

            // Stored offsets are what the final commit on disconnect flushes
            consumer
                .store_offsets(&tpl)
                .map_err(|e| BrokerError::CommitFailed(e.to_string()))?;
            consumer
                .commit(&tpl, CommitMode::Async)
                .map_err(|e| BrokerError::CommitFailed(e.to_string()))
        })
    }

    fn pause<'a>(&'a self, topic: &'a str, partition: i32) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let consumer = self.current().await?;
            consumer
                .pause(&single_partition(topic, partition))
                .map_err(|e| BrokerError::Rejected {
                    topic: topic.to_string(),
                    reason: format!("Failed to pause partition {partition}: {e}"),
                })?;
            tracing::debug!(consumer_group = %self.group_id, topic, partition, "Partition paused");
            Ok(())
        })
    }

    fn resume<'a>(&'a self, topic: &'a str, partition: i32) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let consumer = self.current().await?;
            consumer
                .resume(&single_partition(topic, partition))
                .map_err(|e| BrokerError::Rejected {
                    topic: topic.to_string(),
                    reason: format!("Failed to resume partition {partition}: {e}"),
                })?;
            tracing::debug!(consumer_group = %self.group_id, topic, partition, "Partition resumed");
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let Some(consumer) = self.consumer.write().await.take() else {
                return Ok(());
            };

            let result = tokio::task::spawn_blocking(move || {
                // Commits stored offsets only, which cover processed messages
                let committed = match consumer.commit_consumer_state(CommitMode::Sync) {
                    // Nothing processed since the last commit
                    Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
                    other => other,
                };
                consumer.unsubscribe();
                committed
            })
            .await
            .map_err(|e| join_error(&e))?;

            tracing::info!(consumer_group = %self.group_id, "Consumer disconnected");
            result.map_err(|e| BrokerError::CommitFailed(e.to_string()))
        })
    }
}

fn single_partition(topic: &str, partition: i32) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(topic, partition);
    tpl
}

impl std::fmt::Debug for RedpandaConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaConsumer")
            .field("group_id", &self.group_id)
            .field("brokers", &self.settings.brokers)
            .finish_non_exhaustive()
    }
}
