//! In-memory broker for fast, deterministic tests.
//!
//! [`InMemoryBroker`] implements [`BrokerClient`] on top of a shared
//! partitioned log held in memory. Every client call is recorded so tests can
//! assert on side effects (connects, disconnects, topic creation, sends,
//! commits), and failures can be injected per client.
//!
//! Semantics that matter to the bus are kept:
//! - keyed records always land on the same partition
//! - a new consumer group starts at the end of each existing partition
//! - a group resumes from its committed offset after reconnecting, so
//!   messages received but never committed are redelivered
//! - paused partitions deliver nothing until resumed
//! - creating a topic that already exists is a no-op

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks only panic if a test thread already panicked

use freight_events_core::broker::{
    AdminClient, BrokerClient, ConsumerClient, DeliveryReport, InboundMessage, MessageHeaders,
    OutboundRecord, ProducerClient,
};
use freight_events_core::error::BrokerError;
use freight_events_core::topic::TopicDescriptor;
use futures::future::BoxFuture;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Connect/disconnect counts for one client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientCalls {
    /// Successful `connect` calls
    pub connects: usize,
    /// `disconnect` calls
    pub disconnects: usize,
    /// Currently connected
    pub connected: bool,
}

#[derive(Clone, Debug)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    headers: MessageHeaders,
}

#[derive(Debug, Default)]
struct Failures {
    producer_connect: bool,
    admin_connect: bool,
    consumer_connect: bool,
    list_topics: bool,
    create_topics: bool,
    all_sends: bool,
    send_topics: HashSet<String>,
    receives: usize,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, Vec<Vec<StoredRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    paused: HashSet<(String, String, i32)>,
    sent: Vec<OutboundRecord>,
    list_calls: usize,
    create_calls: Vec<Vec<String>>,
    commit_calls: usize,
    producer: ClientCalls,
    admin: ClientCalls,
    consumers: HashMap<String, ClientCalls>,
    failures: Failures,
    round_robin: usize,
}

impl BrokerState {
    fn ensure_topic(&mut self, name: &str, partitions: i32) -> bool {
        if self.topics.contains_key(name) {
            return false;
        }
        let count = usize::try_from(partitions.max(1)).unwrap_or(1);
        self.topics.insert(name.to_string(), vec![Vec::new(); count]);
        true
    }

    fn pick_partition(&mut self, key: Option<&[u8]>, partitions: usize) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish() % partitions as u64).unwrap_or(0)
            }
            None => {
                self.round_robin = self.round_robin.wrapping_add(1);
                self.round_robin % partitions
            }
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    appended: Notify,
    auto_create_partitions: i32,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }
}

/// In-memory [`BrokerClient`].
///
/// Cloning shares the underlying log, so a test can keep one handle for
/// assertions while the bus owns another.
///
/// # Example
///
/// ```
/// use freight_events_core::broker::{BrokerClient, OutboundRecord};
/// use freight_events_testing::InMemoryBroker;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let producer = broker.producer();
/// producer.connect().await?;
/// producer
///     .send(OutboundRecord::new("driver-events", b"{}".to_vec()).with_key("driver-1"))
///     .await?;
///
/// assert_eq!(broker.messages("driver-events").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
    producer: Arc<InMemoryProducer>,
    admin: Arc<InMemoryAdmin>,
}

impl InMemoryBroker {
    /// Broker that auto-creates unknown topics with one partition on send.
    #[must_use]
    pub fn new() -> Self {
        Self::with_auto_create_partitions(1)
    }

    /// Broker that auto-creates unknown topics with `partitions` partitions on
    /// send.
    #[must_use]
    pub fn with_auto_create_partitions(partitions: i32) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(BrokerState::default()),
            appended: Notify::new(),
            auto_create_partitions: partitions,
        });
        Self {
            producer: Arc::new(InMemoryProducer {
                shared: Arc::clone(&shared),
            }),
            admin: Arc::new(InMemoryAdmin {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Create a topic directly, bypassing the admin client and its call log.
    pub fn create_topic(&self, name: &str, partitions: i32) {
        self.shared.state().ensure_topic(name, partitions);
    }

    /// Append a raw record directly, bypassing the producer and its call log.
    /// Useful for injecting malformed messages.
    pub fn inject(&self, topic: &str, key: Option<&[u8]>, value: Option<&[u8]>) -> DeliveryReport {
        self.inject_record(topic, None, key, value)
    }

    /// Like [`inject`](Self::inject), but onto a chosen partition.
    pub fn inject_at(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> DeliveryReport {
        self.inject_record(topic, Some(partition), key, value)
    }

    fn inject_record(
        &self,
        topic: &str,
        partition: Option<i32>,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> DeliveryReport {
        let report = {
            let mut state = self.shared.state();
            state.ensure_topic(topic, self.shared.auto_create_partitions);
            let record = StoredRecord {
                key: key.map(<[u8]>::to_vec),
                value: value.map(<[u8]>::to_vec),
                headers: MessageHeaders::new(),
            };
            match partition {
                Some(partition) => append_to(&mut state, topic, partition, record),
                None => append(&mut state, topic, record),
            }
        };
        self.shared.appended.notify_waiters();
        report
    }

    /// Names of all topics.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.shared.state().topics.keys().cloned().collect()
    }

    /// Partition count of `topic`, if it exists.
    #[must_use]
    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.shared.state().topics.get(topic).map(Vec::len)
    }

    /// Every message stored in `topic`, ordered by partition then offset.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        let state = self.shared.state();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records
                    .iter()
                    .enumerate()
                    .map(move |(offset, record)| to_inbound(topic, partition, offset, record))
            })
            .collect()
    }

    /// Records accepted by the producer, in send order.
    #[must_use]
    pub fn sent_records(&self) -> Vec<OutboundRecord> {
        self.shared.state().sent.clone()
    }

    /// Number of `list_topics` calls.
    #[must_use]
    pub fn list_topic_calls(&self) -> usize {
        self.shared.state().list_calls
    }

    /// Topic names passed to each `create_topics` call.
    #[must_use]
    pub fn create_topic_calls(&self) -> Vec<Vec<String>> {
        self.shared.state().create_calls.clone()
    }

    /// Number of `commit` calls across all consumers.
    #[must_use]
    pub fn commit_calls(&self) -> usize {
        self.shared.state().commit_calls
    }

    /// Next offset `group` will read from `topic`/`partition`.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .state()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Returns true while `group` has `topic`/`partition` paused.
    #[must_use]
    pub fn is_paused(&self, group: &str, topic: &str, partition: i32) -> bool {
        self.shared
            .state()
            .paused
            .contains(&(group.to_string(), topic.to_string(), partition))
    }

    /// Producer call counts.
    #[must_use]
    pub fn producer_calls(&self) -> ClientCalls {
        self.shared.state().producer
    }

    /// Admin client call counts.
    #[must_use]
    pub fn admin_calls(&self) -> ClientCalls {
        self.shared.state().admin
    }

    /// Call counts of the consumers built for `group`.
    #[must_use]
    pub fn consumer_calls(&self, group: &str) -> ClientCalls {
        self.shared
            .state()
            .consumers
            .get(group)
            .copied()
            .unwrap_or_default()
    }

    /// Make producer `connect` fail.
    pub fn fail_producer_connect(&self, fail: bool) {
        self.shared.state().failures.producer_connect = fail;
    }

    /// Make admin `connect` fail.
    pub fn fail_admin_connect(&self, fail: bool) {
        self.shared.state().failures.admin_connect = fail;
    }

    /// Make consumer `connect` fail.
    pub fn fail_consumer_connect(&self, fail: bool) {
        self.shared.state().failures.consumer_connect = fail;
    }

    /// Make `list_topics` fail.
    pub fn fail_list_topics(&self, fail: bool) {
        self.shared.state().failures.list_topics = fail;
    }

    /// Make `create_topics` fail.
    pub fn fail_create_topics(&self, fail: bool) {
        self.shared.state().failures.create_topics = fail;
    }

    /// Make every send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.state().failures.all_sends = fail;
    }

    /// Make sends to `topic` fail.
    pub fn fail_sends_to(&self, topic: &str) {
        self.shared
            .state()
            .failures
            .send_topics
            .insert(topic.to_string());
    }

    /// Make the next `count` consumer receives fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.shared.state().failures.receives = count;
        self.shared.appended.notify_waiters();
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("topics", &self.topic_names())
            .finish_non_exhaustive()
    }
}

impl BrokerClient for InMemoryBroker {
    fn producer(&self) -> Arc<dyn ProducerClient> {
        Arc::clone(&self.producer) as Arc<dyn ProducerClient>
    }

    fn admin(&self) -> Arc<dyn AdminClient> {
        Arc::clone(&self.admin) as Arc<dyn AdminClient>
    }

    fn consumer(&self, group_id: &str) -> Result<Arc<dyn ConsumerClient>, BrokerError> {
        if group_id.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "consumer group id must not be empty".to_string(),
            ));
        }
        Ok(Arc::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            group_id: group_id.to_string(),
            subscription: Mutex::new(Vec::new()),
            positions: Mutex::new(HashMap::new()),
        }))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn append(state: &mut BrokerState, topic: &str, record: StoredRecord) -> DeliveryReport {
    let partition_count = state.topics.get(topic).map_or(1, Vec::len);
    let partition = state.pick_partition(record.key.as_deref(), partition_count);
    let partitions = state.topics.entry(topic.to_string()).or_default();
    if partitions.is_empty() {
        partitions.push(Vec::new());
    }
    let last = partitions.len() - 1;
    let log = &mut partitions[partition.min(last)];
    log.push(record);
    DeliveryReport {
        topic: topic.to_string(),
        partition: partition as i32,
        offset: (log.len() - 1) as i64,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn append_to(state: &mut BrokerState, topic: &str, partition: i32, record: StoredRecord) -> DeliveryReport {
    let partitions = state.topics.entry(topic.to_string()).or_default();
    let index = usize::try_from(partition).unwrap_or(0);
    if partitions.len() <= index {
        partitions.resize_with(index + 1, Vec::new);
    }
    let log = &mut partitions[index];
    log.push(record);
    DeliveryReport {
        topic: topic.to_string(),
        partition,
        offset: (log.len() - 1) as i64,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn to_inbound(topic: &str, partition: usize, offset: usize, record: &StoredRecord) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        partition: partition as i32,
        offset: offset as i64,
        key: record.key.clone(),
        value: record.value.clone(),
        headers: record.headers.clone(),
    }
}

/// Producer half of [`InMemoryBroker`].
pub struct InMemoryProducer {
    shared: Arc<Shared>,
}

impl ProducerClient for InMemoryProducer {
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            if state.failures.producer_connect {
                return Err(BrokerError::Unavailable("producer connect refused".to_string()));
            }
            state.producer.connects += 1;
            state.producer.connected = true;
            Ok(())
        })
    }

    fn send(&self, record: OutboundRecord) -> BoxFuture<'_, Result<DeliveryReport, BrokerError>> {
        Box::pin(async move {
            let report = {
                let mut state = self.shared.state();
                if !state.producer.connected {
                    return Err(BrokerError::NotConnected("producer".to_string()));
                }
                if state.failures.all_sends || state.failures.send_topics.contains(&record.topic) {
                    return Err(BrokerError::Unavailable(format!(
                        "send to '{}' timed out",
                        record.topic
                    )));
                }
                state.ensure_topic(&record.topic, self.shared.auto_create_partitions);
                let report = append(
                    &mut state,
                    &record.topic,
                    StoredRecord {
                        key: record.key.clone(),
                        value: record.value.clone(),
                        headers: record.headers.clone(),
                    },
                );
                state.sent.push(record);
                report
            };
            self.shared.appended.notify_waiters();
            Ok(report)
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            state.producer.disconnects += 1;
            state.producer.connected = false;
            Ok(())
        })
    }
}

/// Admin half of [`InMemoryBroker`].
pub struct InMemoryAdmin {
    shared: Arc<Shared>,
}

impl AdminClient for InMemoryAdmin {
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            if state.failures.admin_connect {
                return Err(BrokerError::Unavailable("admin connect refused".to_string()));
            }
            state.admin.connects += 1;
            state.admin.connected = true;
            Ok(())
        })
    }

    fn list_topics(&self) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            state.list_calls += 1;
            if state.failures.list_topics {
                return Err(BrokerError::Unavailable("metadata request timed out".to_string()));
            }
            Ok(state.topics.keys().cloned().collect())
        })
    }

    fn create_topics<'a>(
        &'a self,
        topics: &'a [TopicDescriptor],
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            state
                .create_calls
                .push(topics.iter().map(|t| t.name.clone()).collect());
            if state.failures.create_topics {
                return Err(BrokerError::Rejected {
                    topic: topics.first().map(|t| t.name.clone()).unwrap_or_default(),
                    reason: "topic authorization failed".to_string(),
                });
            }
            for topic in topics {
                state.ensure_topic(&topic.name, topic.partitions);
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            state.admin.disconnects += 1;
            state.admin.connected = false;
            Ok(())
        })
    }
}

/// Consumer half of [`InMemoryBroker`], one per group.
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    subscription: Mutex<Vec<String>>,
    positions: Mutex<HashMap<(String, i32), usize>>,
}

impl InMemoryConsumer {
    fn try_next(&self) -> Result<Option<InboundMessage>, BrokerError> {
        let mut state = self.shared.state();
        if state.failures.receives > 0 {
            state.failures.receives -= 1;
            return Err(BrokerError::Unavailable("connection reset by broker".to_string()));
        }
        let connected = state
            .consumers
            .get(&self.group_id)
            .is_some_and(|calls| calls.connected);
        if !connected {
            return Err(BrokerError::NotConnected(format!("consumer {}", self.group_id)));
        }

        let subscription = self.subscription.lock().unwrap();
        let mut positions = self.positions.lock().unwrap();
        for topic in subscription.iter() {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (partition, records) in partitions.iter().enumerate() {
                let partition_id = i32::try_from(partition).unwrap_or(i32::MAX);
                if state
                    .paused
                    .contains(&(self.group_id.clone(), topic.clone(), partition_id))
                {
                    continue;
                }
                // Partitions that appeared after subscribing are read from the start
                let position = positions.entry((topic.clone(), partition_id)).or_insert(0);
                if let Some(record) = records.get(*position) {
                    let message = to_inbound(topic, partition, *position, record);
                    *position += 1;
                    return Ok(Some(message));
                }
            }
        }
        Ok(None)
    }
}

impl ConsumerClient for InMemoryConsumer {
    fn connect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            if state.failures.consumer_connect {
                return Err(BrokerError::Unavailable("consumer connect refused".to_string()));
            }
            let calls = state.consumers.entry(self.group_id.clone()).or_default();
            calls.connects += 1;
            calls.connected = true;
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topics: &'a [String]) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let state = self.shared.state();
            let mut positions = self.positions.lock().unwrap();
            for topic in topics {
                let Some(partitions) = state.topics.get(topic) else {
                    continue;
                };
                for (partition, records) in partitions.iter().enumerate() {
                    let partition_id = i32::try_from(partition).unwrap_or(i32::MAX);
                    let committed = state
                        .committed
                        .get(&(self.group_id.clone(), topic.clone(), partition_id))
                        .and_then(|offset| usize::try_from(*offset).ok());
                    // Resubscribing keeps the current position
                    positions
                        .entry((topic.clone(), partition_id))
                        .or_insert_with(|| committed.unwrap_or(records.len()));
                }
            }
            *self.subscription.lock().unwrap() = topics.to_vec();
            Ok(())
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<InboundMessage, BrokerError>> {
        Box::pin(async move {
            loop {
                let notified = self.shared.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(message) = self.try_next()? {
                    return Ok(message);
                }
                notified.await;
            }
        })
    }

    fn commit<'a>(&'a self, message: &'a InboundMessage) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            state.commit_calls += 1;
            let next = message.offset + 1;
            let entry = state
                .committed
                .entry((self.group_id.clone(), message.topic.clone(), message.partition))
                .or_insert(next);
            *entry = (*entry).max(next);
            Ok(())
        })
    }

    fn pause<'a>(&'a self, topic: &'a str, partition: i32) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.shared
                .state()
                .paused
                .insert((self.group_id.clone(), topic.to_string(), partition));
            Ok(())
        })
    }

    fn resume<'a>(&'a self, topic: &'a str, partition: i32) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            self.shared
                .state()
                .paused
                .remove(&(self.group_id.clone(), topic.to_string(), partition));
            self.shared.appended.notify_waiters();
            Ok(())
        })
    }

    // Only explicit commits count: positions read past the committed offset
    // are forgotten, so those messages go to the group's next consumer.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let mut state = self.shared.state();
            let group = self.group_id.clone();
            state.paused.retain(|(g, _, _)| *g != group);
            let calls = state.consumers.entry(group).or_default();
            calls.disconnects += 1;
            calls.connected = false;
            drop(state);
            self.positions.lock().unwrap().clear();
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn keyed_records_share_a_partition() {
        let broker = InMemoryBroker::new();
        broker.create_topic("load-events", 4);
        let producer = broker.producer();
        producer.connect().await.expect("connect");

        let first = producer
            .send(OutboundRecord::new("load-events", b"1".to_vec()).with_key("load-7"))
            .await
            .expect("send");
        let second = producer
            .send(OutboundRecord::new("load-events", b"2".to_vec()).with_key("load-7"))
            .await
            .expect("send");

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let broker = InMemoryBroker::new();
        let result = broker
            .producer()
            .send(OutboundRecord::new("driver-events", b"{}".to_vec()))
            .await;
        assert!(matches!(result, Err(BrokerError::NotConnected(_))));
    }

    #[tokio::test]
    async fn new_group_starts_at_latest() {
        let broker = InMemoryBroker::new();
        broker.inject("driver-events", None, Some(b"old"));

        let consumer = broker.consumer("gamification").expect("consumer");
        consumer.connect().await.expect("connect");
        consumer
            .subscribe(&["driver-events".to_string()])
            .await
            .expect("subscribe");
        broker.inject("driver-events", None, Some(b"new"));

        let message = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
            .await
            .expect("message arrives")
            .expect("recv");
        assert_eq!(message.value.as_deref(), Some(b"new".as_slice()));
        assert_eq!(message.offset, 1);
    }

    #[tokio::test]
    async fn group_resumes_from_committed_offset() {
        let broker = InMemoryBroker::new();
        broker.create_topic("load-events", 1);
        let topics = vec!["load-events".to_string()];

        let first = broker.consumer("notifications").expect("consumer");
        first.connect().await.expect("connect");
        first.subscribe(&topics).await.expect("subscribe");
        broker.inject("load-events", None, Some(b"a"));
        broker.inject("load-events", None, Some(b"b"));
        let a = first.recv().await.expect("recv");
        first.commit(&a).await.expect("commit");
        first.disconnect().await.expect("disconnect");

        let second = broker.consumer("notifications").expect("consumer");
        second.connect().await.expect("connect");
        second.subscribe(&topics).await.expect("subscribe");
        let b = second.recv().await.expect("recv");

        assert_eq!(b.value.as_deref(), Some(b"b".as_slice()));
        assert_eq!(broker.committed_offset("notifications", "load-events", 0), Some(1));
    }

    #[tokio::test]
    async fn paused_partition_is_skipped_until_resumed() {
        let broker = InMemoryBroker::new();
        broker.create_topic("load-events", 2);
        let consumer = broker.consumer("billing").expect("consumer");
        consumer.connect().await.expect("connect");
        consumer
            .subscribe(&["load-events".to_string()])
            .await
            .expect("subscribe");

        consumer.pause("load-events", 0).await.expect("pause");
        assert!(broker.is_paused("billing", "load-events", 0));
        broker.inject_at("load-events", 0, None, Some(b"held"));
        broker.inject_at("load-events", 1, None, Some(b"flowing"));

        let first = consumer.recv().await.expect("recv");
        assert_eq!(first.partition, 1);

        consumer.resume("load-events", 0).await.expect("resume");
        let second = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
            .await
            .expect("message arrives")
            .expect("recv");
        assert_eq!(second.value.as_deref(), Some(b"held".as_slice()));
        assert!(!broker.is_paused("billing", "load-events", 0));
    }

    #[tokio::test]
    async fn uncommitted_messages_go_to_the_next_consumer() {
        let broker = InMemoryBroker::new();
        broker.create_topic("load-events", 1);
        let topics = vec!["load-events".to_string()];

        let first = broker.consumer("notifications").expect("consumer");
        first.connect().await.expect("connect");
        first.subscribe(&topics).await.expect("subscribe");
        broker.inject("load-events", None, Some(b"a"));
        broker.inject("load-events", None, Some(b"b"));
        let a = first.recv().await.expect("recv");
        first.recv().await.expect("recv b without committing");
        first.commit(&a).await.expect("commit");
        first.disconnect().await.expect("disconnect");

        let second = broker.consumer("notifications").expect("consumer");
        second.connect().await.expect("connect");
        second.subscribe(&topics).await.expect("subscribe");
        let again = second.recv().await.expect("recv");

        assert_eq!(again.value.as_deref(), Some(b"b".as_slice()));
    }

    #[tokio::test]
    async fn injected_receive_failures_surface_once_each() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer("g").expect("consumer");
        consumer.connect().await.expect("connect");
        consumer.subscribe(&["t".to_string()]).await.expect("subscribe");
        broker.fail_next_receives(2);

        assert!(consumer.recv().await.is_err());
        assert!(consumer.recv().await.is_err());
        broker.inject("t", None, Some(b"ok"));
        assert!(consumer.recv().await.is_ok());
    }

    #[tokio::test]
    async fn create_topics_is_recorded_and_idempotent() {
        let broker = InMemoryBroker::new();
        let admin = broker.admin();
        let topics = [TopicDescriptor::new("driver-events", 3)];

        admin.create_topics(&topics).await.expect("create");
        admin.create_topics(&topics).await.expect("create again");

        assert_eq!(broker.create_topic_calls().len(), 2);
        assert_eq!(broker.partition_count("driver-events"), Some(3));
    }
}
