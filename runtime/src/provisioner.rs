//! Topic provisioning.
//!
//! [`TopicProvisioner::ensure_topics`] lists existing topics and creates only
//! the missing ones, so calling it on every startup (and from several instances
//! at once) is safe. When auto-creation is disabled it does nothing at all and
//! leaves topic management to operators.

use freight_events_core::broker::AdminClient;
use freight_events_core::error::ProvisionError;
use freight_events_core::topic::TopicDescriptor;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ensures topics exist on the broker.
#[derive(Clone)]
pub struct TopicProvisioner {
    admin: Arc<dyn AdminClient>,
    auto_create: bool,
}

impl TopicProvisioner {
    /// Create a provisioner. With `auto_create` off, `ensure_topics` issues no
    /// broker calls.
    #[must_use]
    pub fn new(admin: Arc<dyn AdminClient>, auto_create: bool) -> Self {
        Self { admin, auto_create }
    }

    /// Whether this provisioner creates topics.
    #[must_use]
    pub const fn auto_create(&self) -> bool {
        self.auto_create
    }

    /// Create every topic in `descriptors` that does not exist yet.
    ///
    /// Returns the names of the topics that were created.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::ListFailed`] if existing topics cannot be listed
    /// - [`ProvisionError::CreateFailed`] if creation is refused
    pub async fn ensure_topics(
        &self,
        descriptors: &[TopicDescriptor],
    ) -> Result<Vec<String>, ProvisionError> {
        if !self.auto_create {
            warn!(
                topics = descriptors.len(),
                "Topic auto-creation disabled; assuming topics are managed externally"
            );
            return Ok(Vec::new());
        }
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        let existing: HashSet<String> = self
            .admin
            .list_topics()
            .await
            .map_err(|e| ProvisionError::ListFailed(e.to_string()))?
            .into_iter()
            .collect();

        let mut seen = HashSet::new();
        let missing: Vec<TopicDescriptor> = descriptors
            .iter()
            .filter(|d| !existing.contains(&d.name) && seen.insert(d.name.clone()))
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(topics = descriptors.len(), "All topics already exist");
            return Ok(Vec::new());
        }

        let names: Vec<String> = missing.iter().map(|d| d.name.clone()).collect();
        self.admin
            .create_topics(&missing)
            .await
            .map_err(|e| ProvisionError::CreateFailed {
                topics: names.clone(),
                reason: e.to_string(),
            })?;

        info!(topics = ?names, "Created topics");
        Ok(names)
    }
}

impl std::fmt::Debug for TopicProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicProvisioner")
            .field("auto_create", &self.auto_create)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use freight_events_core::broker::BrokerClient;
    use freight_events_core::topic::descriptors_with_dead_letters;
    use freight_events_testing::InMemoryBroker;

    fn descriptors() -> Vec<TopicDescriptor> {
        vec![
            TopicDescriptor::new("driver-events", 3),
            TopicDescriptor::new("load-events", 6),
        ]
    }

    #[tokio::test]
    async fn second_call_creates_nothing() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), true);

        let created = provisioner.ensure_topics(&descriptors()).await.expect("provision");
        assert_eq!(created, vec!["driver-events", "load-events"]);

        let created = provisioner.ensure_topics(&descriptors()).await.expect("provision again");
        assert!(created.is_empty());
        assert_eq!(broker.create_topic_calls().len(), 1);
        assert_eq!(broker.list_topic_calls(), 2);
        assert_eq!(broker.partition_count("load-events"), Some(6));
    }

    #[tokio::test]
    async fn only_missing_topics_are_created() {
        let broker = InMemoryBroker::new();
        broker.create_topic("driver-events", 3);
        let provisioner = TopicProvisioner::new(broker.admin(), true);

        provisioner
            .ensure_topics(&descriptors_with_dead_letters(&descriptors()))
            .await
            .expect("provision");

        assert_eq!(
            broker.create_topic_calls(),
            vec![vec![
                "driver-events-dlq".to_string(),
                "load-events".to_string(),
                "load-events-dlq".to_string(),
            ]]
        );
    }

    #[tokio::test]
    async fn disabled_mode_makes_no_calls() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), false);

        let created = provisioner.ensure_topics(&descriptors()).await.expect("no-op");

        assert!(created.is_empty());
        assert_eq!(broker.list_topic_calls(), 0);
        assert!(broker.create_topic_calls().is_empty());
    }

    #[tokio::test]
    async fn failures_are_reported() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), true);

        broker.fail_list_topics(true);
        assert!(matches!(
            provisioner.ensure_topics(&descriptors()).await,
            Err(ProvisionError::ListFailed(_))
        ));

        broker.fail_list_topics(false);
        broker.fail_create_topics(true);
        let err = provisioner
            .ensure_topics(&descriptors())
            .await
            .expect_err("create refused");
        assert!(matches!(err, ProvisionError::CreateFailed { ref topics, .. } if topics.len() == 2));
    }
}
