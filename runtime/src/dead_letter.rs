//! Dead-letter routing.
//!
//! A message that cannot be processed is forwarded, byte for byte, to the
//! companion topic `<topic>-dlq` together with headers describing the failure.
//! The consumer group then commits past it, so one poison message never stalls
//! its partition.
//!
//! # Dead-letter headers
//!
//! | Header | Value |
//! |--------|-------|
//! | `original-topic` | source topic |
//! | `original-partition` | source partition |
//! | `original-offset` | source offset |
//! | `consumer-group` | group that failed to process the message |
//! | `failure-kind` | `handler`, `schema` or `deserialization` |
//! | `error-message` | the error's display text |
//! | `error-stack` | the error's debug text and source chain |
//!
//! The source message's own headers are carried over before these are set.

use crate::metrics::DeadLetterMetrics;
use crate::provisioner::TopicProvisioner;
use freight_events_core::broker::{InboundMessage, OutboundRecord, ProducerClient};
use freight_events_core::error::DlqError;
use freight_events_core::handler::HandlerError;
use freight_events_core::topic::{TopicDescriptor, dead_letter_topic};
use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Source topic header.
pub const ORIGINAL_TOPIC_HEADER: &str = "original-topic";
/// Source partition header.
pub const ORIGINAL_PARTITION_HEADER: &str = "original-partition";
/// Source offset header.
pub const ORIGINAL_OFFSET_HEADER: &str = "original-offset";
/// Consumer group header.
pub const CONSUMER_GROUP_HEADER: &str = "consumer-group";
/// Failure kind header.
pub const FAILURE_KIND_HEADER: &str = "failure-kind";
/// Error message header.
pub const ERROR_MESSAGE_HEADER: &str = "error-message";
/// Error detail header.
pub const ERROR_STACK_HEADER: &str = "error-stack";

/// Why a message was dead-lettered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The handler returned an error
    Handler,
    /// The payload failed schema validation or the schema was unavailable
    Schema,
    /// The message value is not a well-formed event
    Deserialization,
}

impl FailureKind {
    /// Header value for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Handler => "handler",
            Self::Schema => "schema",
            Self::Deserialization => "deserialization",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details attached to a dead-letter record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// Failure category
    pub kind: FailureKind,
    /// Consumer group that gave up on the message
    pub consumer_group: String,
    /// Error display text
    pub message: String,
    /// Error debug text followed by its source chain
    pub stack: String,
}

impl Failure {
    /// Describe `err` as a failure of `kind` in `consumer_group`.
    pub fn new(
        kind: FailureKind,
        consumer_group: impl Into<String>,
        err: &(dyn StdError + 'static),
    ) -> Self {
        Self {
            kind,
            consumer_group: consumer_group.into(),
            message: err.to_string(),
            stack: render_stack(err),
        }
    }

    /// Failure raised by a handler.
    pub fn handler(consumer_group: impl Into<String>, err: &HandlerError) -> Self {
        Self::new(FailureKind::Handler, consumer_group, &**err)
    }
}

fn render_stack(err: &(dyn StdError + 'static)) -> String {
    let mut stack = format!("{err:?}");
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(stack, "\ncaused by: {cause}");
        source = cause.source();
    }
    stack
}

/// Forwards failed messages to their dead-letter topics.
pub struct DeadLetterRouter {
    producer: Arc<dyn ProducerClient>,
    provisioner: TopicProvisioner,
    partitions: i32,
    replication_factor: i32,
    ensured: Mutex<HashSet<String>>,
}

impl DeadLetterRouter {
    /// Create a router. Dead-letter topics it has to create get `partitions`
    /// partitions and `replication_factor` replicas.
    #[must_use]
    pub fn new(
        producer: Arc<dyn ProducerClient>,
        provisioner: TopicProvisioner,
        partitions: i32,
        replication_factor: i32,
    ) -> Self {
        Self {
            producer,
            provisioner,
            partitions,
            replication_factor,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    /// Record dead-letter topics that already exist, so routing to them skips
    /// the provisioning round trip.
    pub async fn mark_provisioned<I>(&self, topics: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.ensured.lock().await.extend(topics);
    }

    /// Forward `message` from `source_topic` to `<source_topic>-dlq`.
    ///
    /// Key, value and headers are copied unchanged, a null value included;
    /// failure headers are added.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::SendFailed`] if the record could not be sent. The
    /// message is then lost; this is also logged at error level.
    pub async fn route(
        &self,
        source_topic: &str,
        message: &InboundMessage,
        failure: &Failure,
    ) -> Result<(), DlqError> {
        let dlq_topic = dead_letter_topic(source_topic);
        self.ensure_dead_letter_topic(&dlq_topic).await;

        let mut headers = message.headers.clone();
        headers.insert(ORIGINAL_TOPIC_HEADER, source_topic);
        headers.insert(ORIGINAL_PARTITION_HEADER, message.partition.to_string());
        headers.insert(ORIGINAL_OFFSET_HEADER, message.offset.to_string());
        headers.insert(CONSUMER_GROUP_HEADER, failure.consumer_group.as_str());
        headers.insert(FAILURE_KIND_HEADER, failure.kind.as_str());
        headers.insert(ERROR_MESSAGE_HEADER, failure.message.as_str());
        headers.insert(ERROR_STACK_HEADER, failure.stack.as_str());

        let record = OutboundRecord {
            topic: dlq_topic.clone(),
            key: message.key.clone(),
            value: message.value.clone(),
            headers,
        };

        match self.producer.send(record).await {
            Ok(delivery) => {
                DeadLetterMetrics::record_routed(source_topic);
                warn!(
                    topic = %source_topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.display_key(),
                    dlq_topic = %dlq_topic,
                    dlq_offset = delivery.offset,
                    failure_kind = %failure.kind,
                    error = %failure.message,
                    "Message dead-lettered"
                );
                Ok(())
            }
            Err(err) => {
                DeadLetterMetrics::record_lost(source_topic);
                error!(
                    topic = %source_topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.display_key(),
                    dlq_topic = %dlq_topic,
                    failure_kind = %failure.kind,
                    error = %failure.message,
                    dlq_error = %err,
                    "DATA LOSS: failed message could not be dead-lettered"
                );
                Err(DlqError::SendFailed {
                    topic: dlq_topic,
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn ensure_dead_letter_topic(&self, dlq_topic: &str) {
        let mut ensured = self.ensured.lock().await;
        if ensured.contains(dlq_topic) {
            return;
        }

        let descriptor = TopicDescriptor::new(dlq_topic, self.partitions)
            .with_replication_factor(self.replication_factor);
        match self.provisioner.ensure_topics(&[descriptor]).await {
            Ok(created) => {
                if !created.is_empty() {
                    info!(dlq_topic, "Dead-letter topic created on first failure");
                }
                ensured.insert(dlq_topic.to_string());
            }
            // Not fatal: the broker may still accept the send
            Err(err) => warn!(dlq_topic, error = %err, "Dead-letter topic could not be provisioned"),
        }
    }
}

impl fmt::Debug for DeadLetterRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterRouter")
            .field("partitions", &self.partitions)
            .field("replication_factor", &self.replication_factor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use freight_events_core::broker::{BrokerClient, MessageHeaders};
    use freight_events_testing::InMemoryBroker;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("carrier lookup failed")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn poison() -> InboundMessage {
        InboundMessage {
            topic: "driver-events".to_string(),
            partition: 2,
            offset: 41,
            key: Some(b"driver-9".to_vec()),
            value: Some(b"{not json".to_vec()),
            headers: MessageHeaders::new().with("trace-id", "abc"),
        }
    }

    async fn router(broker: &InMemoryBroker) -> DeadLetterRouter {
        broker.producer().connect().await.expect("connect");
        DeadLetterRouter::new(
            broker.producer(),
            TopicProvisioner::new(broker.admin(), true),
            3,
            1,
        )
    }

    #[test]
    fn stack_includes_source_chain() {
        let err = Outer(std::io::Error::other("connection refused"));
        let failure = Failure::new(FailureKind::Handler, "gamification", &err);

        assert_eq!(failure.message, "carrier lookup failed");
        assert!(failure.stack.contains("caused by: connection refused"));
    }

    #[tokio::test]
    async fn message_is_copied_with_failure_headers() {
        let broker = InMemoryBroker::new();
        let router = router(&broker).await;
        let err: HandlerError = "boom".into();

        router
            .route("driver-events", &poison(), &Failure::handler("gamification", &err))
            .await
            .expect("routed");

        let dead = broker.messages("driver-events-dlq");
        assert_eq!(dead.len(), 1);
        let record = &dead[0];
        assert_eq!(record.key.as_deref(), Some(b"driver-9".as_slice()));
        assert_eq!(record.value.as_deref(), Some(b"{not json".as_slice()));
        assert_eq!(record.headers.get_str(ORIGINAL_TOPIC_HEADER).as_deref(), Some("driver-events"));
        assert_eq!(record.headers.get_str(ORIGINAL_OFFSET_HEADER).as_deref(), Some("41"));
        assert_eq!(record.headers.get_str(ERROR_MESSAGE_HEADER).as_deref(), Some("boom"));
        assert_eq!(record.headers.get_str(FAILURE_KIND_HEADER).as_deref(), Some("handler"));
        assert_eq!(record.headers.get_str("trace-id").as_deref(), Some("abc"));
        assert!(!record.headers.get_str(ERROR_STACK_HEADER).unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn null_value_stays_null() {
        let broker = InMemoryBroker::new();
        let router = router(&broker).await;
        let err: HandlerError = "boom".into();
        let tombstone = InboundMessage {
            value: None,
            ..poison()
        };

        router
            .route("driver-events", &tombstone, &Failure::handler("gamification", &err))
            .await
            .expect("routed");

        let dead = broker.messages("driver-events-dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].value, None);
        assert_eq!(dead[0].key.as_deref(), Some(b"driver-9".as_slice()));
    }

    #[tokio::test]
    async fn dead_letter_topic_is_provisioned_once() {
        let broker = InMemoryBroker::new();
        let router = router(&broker).await;
        let err: HandlerError = "boom".into();
        let failure = Failure::handler("gamification", &err);

        router.route("driver-events", &poison(), &failure).await.expect("first");
        router.route("driver-events", &poison(), &failure).await.expect("second");

        assert_eq!(broker.create_topic_calls(), vec![vec!["driver-events-dlq".to_string()]]);
        assert_eq!(broker.list_topic_calls(), 1);
        assert_eq!(broker.partition_count("driver-events-dlq"), Some(3));
    }

    #[tokio::test]
    async fn provisioning_failure_still_attempts_send() {
        let broker = InMemoryBroker::new();
        let router = router(&broker).await;
        broker.fail_create_topics(true);
        let err: HandlerError = "boom".into();

        router
            .route("load-events", &poison(), &Failure::handler("billing", &err))
            .await
            .expect("broker auto-creates on send");

        assert_eq!(broker.messages("load-events-dlq").len(), 1);
    }

    #[tokio::test]
    async fn send_failure_is_reported() {
        let broker = InMemoryBroker::new();
        let router = router(&broker).await;
        broker.fail_sends_to("driver-events-dlq");
        let err: HandlerError = "boom".into();

        let result = router
            .route("driver-events", &poison(), &Failure::handler("gamification", &err))
            .await;

        assert!(matches!(result, Err(DlqError::SendFailed { ref topic, .. }) if topic == "driver-events-dlq"));
    }
}
