//! Admin client over rdkafka's `AdminClient`.

use crate::convert::join_error;
use crate::settings::ClientSettings;
use freight_events_core::broker::AdminClient;
use freight_events_core::error::BrokerError;
use freight_events_core::topic::TopicDescriptor;
use futures::future::BoxFuture;
use rdkafka::admin::{AdminClient as KafkaAdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::Arc;
use tokio::sync::RwLock;

type Inner = Arc<KafkaAdminClient<DefaultClientContext>>;

/// Shared admin client. Created on `connect`, dropped on `disconnect`.
pub struct RedpandaAdmin {
    settings: Arc<ClientSettings>,
    admin: RwLock<Option<Inner>>,
}

impl RedpandaAdmin {
    pub(crate) fn new(settings: Arc<ClientSettings>) -> Self {
        Self {
            settings,
            admin: RwLock::new(None),
        }
    }

    async fn current(&self) -> Result<Inner, BrokerError> {
        self.admin
            .read()
            .await
            .clone()
            .ok_or_else(|| BrokerError::NotConnected("admin client".to_string()))
    }

    async fn fetch_topic_names(&self, admin: Inner) -> Result<Vec<String>, BrokerError> {
        let timeout = self.settings.timeout;
        let metadata = tokio::task::spawn_blocking(move || admin.inner().fetch_metadata(None, timeout))
            .await
            .map_err(|e| join_error(&e))?
            .map_err(|e| BrokerError::Unavailable(format!("Failed to fetch metadata: {e}")))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|topic| topic.name().to_string())
            .collect())
    }
}

impl AdminClient for RedpandaAdmin {
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut slot = self.admin.write().await;
            if slot.is_some() {
                return Ok(());
            }

            let admin: KafkaAdminClient<DefaultClientContext> = self
                .settings
                .admin_config()
                .create()
                .map_err(|e| {
                    BrokerError::Configuration(format!("Failed to create admin client: {e}"))
                })?;
            let admin = Arc::new(admin);

            let topics = self.fetch_topic_names(Arc::clone(&admin)).await?;
            tracing::info!(
                brokers = %self.settings.brokers,
                topics = topics.len(),
                "Admin client connected"
            );
            *slot = Some(admin);
            Ok(())
        })
    }

    fn list_topics(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        Box::pin(async move {
            let admin = self.current().await?;
            self.fetch_topic_names(admin).await
        })
    }

    fn create_topics<'a>(
        &'a self,
        topics: &'a [TopicDescriptor],
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let admin = self.current().await?;

            let new_topics: Vec<NewTopic<'_>> = topics
                .iter()
                .map(|topic| {
                    NewTopic::new(
                        &topic.name,
                        topic.partitions,
                        TopicReplication::Fixed(topic.replication_factor),
                    )
                })
                .collect();
            let options = AdminOptions::new().operation_timeout(Some(self.settings.timeout));

            let results = admin
                .create_topics(&new_topics, &options)
                .await
                .map_err(|e| BrokerError::Unavailable(format!("Failed to create topics: {e}")))?;

            for result in results {
                match result {
                    Ok(name) => tracing::debug!(topic = %name, "Topic created"),
                    // Another instance won the race
                    Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        tracing::debug!(topic = %name, "Topic already exists");
                    }
                    Err((name, code)) => {
                        return Err(BrokerError::Rejected {
                            topic: name,
                            reason: code.to_string(),
                        });
                    }
                }
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if self.admin.write().await.take().is_some() {
                tracing::info!("Admin client disconnected");
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for RedpandaAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaAdmin")
            .field("brokers", &self.settings.brokers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use crate::RedpandaBroker;
    use freight_events_core::broker::BrokerClient;

    #[tokio::test]
    async fn admin_calls_require_connection() {
        let broker = RedpandaBroker::new("localhost:9092").expect("build");
        let admin = broker.admin();

        assert!(matches!(
            admin.list_topics().await,
            Err(BrokerError::NotConnected(_))
        ));
        assert!(matches!(
            admin
                .create_topics(&[TopicDescriptor::new("driver-events", 3)])
                .await,
            Err(BrokerError::NotConnected(_))
        ));
    }
}
