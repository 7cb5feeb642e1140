//! Consumer group runtime.
//!
//! A [`ConsumerGroup`] owns one consumer client and one pulling task. The
//! pulling task fans messages out to one worker per `(topic, partition)`:
//!
//! ```text
//!                    ┌──────────────┐
//!   broker ──recv──► │ pulling loop │──┬──► worker (driver-events, 0) ──► handler
//!                    └──────────────┘  ├──► worker (driver-events, 1) ──► handler
//!                                      └──► worker (load-events, 0)   ──► handler
//! ```
//!
//! Each worker processes its partition's messages one at a time, so ordering
//! per partition key is preserved while independent partitions progress
//! concurrently. Handing a message to a worker never blocks the pulling loop:
//! when a partition's backlog reaches `partition_queue_capacity` the partition
//! is paused at the broker, and the worker resumes it once the backlog drains.
//! A hung handler therefore stalls its own partition only.
//!
//! # Per-message pipeline
//!
//! 1. Deserialize the value into an [`Event`]
//! 2. Validate the payload against its schema
//! 3. Look up the handler for the event type; unhandled types are skipped
//! 4. Invoke the handler (with optional in-process retries)
//! 5. On failure, forward the raw message to the dead-letter topic
//! 6. Commit the offset
//!
//! Every message is committed exactly once it reaches a final outcome, so a
//! failing message is never redelivered in a loop.
//!
//! # Shutdown
//!
//! [`ConsumerGroup::stop`] moves the group to `Draining`, stops pulling, lets
//! every worker finish the message it is processing, then disconnects the
//! consumer (which commits the offsets of processed messages) and moves to
//! `Stopped`. Handlers are never aborted mid-execution. Messages still queued
//! for a worker are not committed and are redelivered to the group's next
//! consumer.

use crate::config::ConsumerConfig;
use crate::dead_letter::{DeadLetterRouter, Failure, FailureKind};
use crate::metrics::ConsumeMetrics;
use crate::retry::retry_with_predicate;
use crate::status::{GroupHealth, GroupState};
use crate::validator::SchemaValidator;
use freight_events_core::broker::{ConsumerClient, InboundMessage};
use freight_events_core::error::{EventError, LifecycleError, SchemaError};
use freight_events_core::event::{Event, EventType};
use freight_events_core::handler::{EventHandler, HandlerContext, HandlerError, HandlerRegistry};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared services every consumer group uses.
#[derive(Clone)]
pub struct GroupServices {
    /// Payload validator
    pub validator: Arc<SchemaValidator>,
    /// Dead-letter router
    pub dead_letters: Arc<DeadLetterRouter>,
    /// Retry, reconnect and buffering settings
    pub config: ConsumerConfig,
}

/// A running consumer group.
pub struct ConsumerGroup {
    group_id: String,
    topics: Vec<String>,
    state: Arc<watch::Sender<GroupState>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerGroup {
    /// Connect `consumer`, subscribe it to `topics` and start pulling.
    ///
    /// `handlers` is frozen for the lifetime of the group.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NoTopics`] if `topics` is empty
    /// - [`LifecycleError::Connect`] if the consumer cannot connect
    /// - [`LifecycleError::Subscribe`] if the subscription is refused
    pub async fn start(
        consumer: Arc<dyn ConsumerClient>,
        group_id: impl Into<String>,
        topics: Vec<String>,
        handlers: HandlerRegistry,
        services: GroupServices,
    ) -> Result<Self, LifecycleError> {
        let group_id = group_id.into();
        if topics.is_empty() {
            return Err(LifecycleError::NoTopics(group_id));
        }

        let state = Arc::new(watch::channel(GroupState::Stopped).0);
        state.send_replace(GroupState::Connecting);

        if let Err(source) = consumer.connect().await {
            state.send_replace(GroupState::Stopped);
            return Err(LifecycleError::Connect {
                client: "consumer",
                source,
            });
        }

        if let Err(source) = consumer.subscribe(&topics).await {
            if let Err(err) = consumer.disconnect().await {
                warn!(consumer_group = %group_id, error = %err, "Consumer disconnect failed");
            }
            state.send_replace(GroupState::Stopped);
            return Err(LifecycleError::Subscribe {
                group_id,
                topics,
                source,
            });
        }
        state.send_replace(GroupState::Subscribed);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = Arc::new(Dispatcher {
            group_id: group_id.clone(),
            consumer,
            handlers: Arc::new(handlers),
            services,
        });
        let pulling = PullingLoop {
            dispatcher,
            topics: topics.clone(),
            shutdown: shutdown_rx,
            state: Arc::clone(&state),
        };

        state.send_replace(GroupState::Running);
        let task = tokio::spawn(pulling.run());

        info!(
            consumer_group = %group_id,
            topics = ?topics,
            "Consumer group started"
        );

        Ok(Self {
            group_id,
            topics,
            state,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    /// Consumer group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Subscribed topics.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> GroupState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<GroupState> {
        self.state.subscribe()
    }

    /// Health entry for this group.
    #[must_use]
    pub fn health(&self) -> GroupHealth {
        GroupHealth {
            group_id: self.group_id.clone(),
            topics: self.topics.clone(),
            state: self.state(),
        }
    }

    /// Stop pulling, wait for in-flight handlers, commit and disconnect.
    ///
    /// Calling `stop` on a stopped group does nothing.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        info!(consumer_group = %self.group_id, "Stopping consumer group");
        self.state.send_replace(GroupState::Draining);
        self.shutdown.send_replace(true);

        if let Err(err) = task.await {
            error!(consumer_group = %self.group_id, error = %err, "Pulling task failed");
        }
        self.state.send_replace(GroupState::Stopped);
        info!(consumer_group = %self.group_id, "Consumer group stopped");
    }
}

impl std::fmt::Debug for ConsumerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerGroup")
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Resolves when shutdown has been requested or the group was dropped.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

struct PullingLoop {
    dispatcher: Arc<Dispatcher>,
    topics: Vec<String>,
    shutdown: watch::Receiver<bool>,
    state: Arc<watch::Sender<GroupState>>,
}

impl PullingLoop {
    async fn run(mut self) {
        let group_id = self.dispatcher.group_id.clone();
        let capacity = self.dispatcher.services.config.partition_queue_capacity;
        let mut workers: HashMap<(String, i32), PartitionWorker> = HashMap::new();
        let mut failures: usize = 0;

        loop {
            let received = tokio::select! {
                biased;
                () = wait_for_shutdown(&mut self.shutdown) => break,
                received = self.dispatcher.consumer.recv() => received,
            };

            match received {
                Ok(message) => {
                    failures = 0;
                    let worker = workers
                        .entry((message.topic.clone(), message.partition))
                        .or_insert_with(|| {
                            PartitionWorker::spawn(
                                Arc::clone(&self.dispatcher),
                                &message,
                                capacity,
                                self.shutdown.clone(),
                            )
                        });

                    worker.backlog.depth.fetch_add(1, Ordering::SeqCst);
                    if let Err(mpsc::error::SendError(message)) = worker.queue.send(message) {
                        worker.backlog.depth.fetch_sub(1, Ordering::SeqCst);
                        error!(
                            consumer_group = %group_id,
                            topic = %message.topic,
                            partition = message.partition,
                            offset = message.offset,
                            "Partition worker is gone; message left uncommitted"
                        );
                        continue;
                    }
                    worker.backlog.pause_if_full(&self.dispatcher).await;
                }
                Err(err) => {
                    let policy = &self.dispatcher.services.config.reconnect;
                    if failures >= policy.max_retries {
                        error!(
                            consumer_group = %group_id,
                            error = %err,
                            attempts = failures,
                            "Broker unreachable; giving up"
                        );
                        break;
                    }

                    ConsumeMetrics::record_reconnect(&group_id);
                    let delay = policy.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        consumer_group = %group_id,
                        error = %err,
                        attempt = failures,
                        delay_ms = delay.as_millis(),
                        "Receive failed, reconnecting"
                    );

                    tokio::select! {
                        biased;
                        () = wait_for_shutdown(&mut self.shutdown) => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.reconnect().await;
                }
            }
        }

        self.drain(workers).await;
    }

    async fn reconnect(&self) {
        let consumer = &self.dispatcher.consumer;
        let group_id = &self.dispatcher.group_id;
        if let Err(err) = consumer.connect().await {
            warn!(consumer_group = %group_id, error = %err, "Reconnect failed");
            return;
        }
        match consumer.subscribe(&self.topics).await {
            Ok(()) => info!(consumer_group = %group_id, "Consumer reconnected"),
            Err(err) => warn!(consumer_group = %group_id, error = %err, "Resubscribe failed"),
        }
    }

    async fn drain(self, workers: HashMap<(String, i32), PartitionWorker>) {
        let group_id = &self.dispatcher.group_id;
        self.state.send_replace(GroupState::Draining);
        debug!(consumer_group = %group_id, workers = workers.len(), "Draining partition workers");

        let handles = workers.into_values().map(|worker| {
            drop(worker.queue);
            worker.handle
        });
        for result in futures::future::join_all(handles).await {
            if let Err(err) = result {
                error!(consumer_group = %group_id, error = %err, "Partition worker failed");
            }
        }

        if let Err(err) = self.dispatcher.consumer.disconnect().await {
            warn!(consumer_group = %group_id, error = %err, "Consumer disconnect failed");
        }
        self.state.send_replace(GroupState::Stopped);
    }
}

/// Messages queued for one partition, and whether the partition is paused at
/// the broker because the queue reached its limit.
struct Backlog {
    topic: String,
    partition: i32,
    limit: usize,
    depth: AtomicUsize,
    // Held across the pause/resume call so the two never interleave
    paused: Mutex<bool>,
}

impl Backlog {
    async fn pause_if_full(&self, dispatcher: &Dispatcher) {
        let mut paused = self.paused.lock().await;
        if *paused || self.depth.load(Ordering::SeqCst) < self.limit {
            return;
        }
        match dispatcher.consumer.pause(&self.topic, self.partition).await {
            Ok(()) => {
                *paused = true;
                debug!(
                    consumer_group = %dispatcher.group_id,
                    topic = %self.topic,
                    partition = self.partition,
                    backlog = self.limit,
                    "Partition backlog full; paused"
                );
            }
            Err(err) => warn!(
                consumer_group = %dispatcher.group_id,
                topic = %self.topic,
                partition = self.partition,
                error = %err,
                "Failed to pause partition"
            ),
        }
    }

    async fn resume_if_drained(&self, dispatcher: &Dispatcher) {
        let mut paused = self.paused.lock().await;
        if !*paused || self.depth.load(Ordering::SeqCst) >= self.limit {
            return;
        }
        match dispatcher.consumer.resume(&self.topic, self.partition).await {
            Ok(()) => {
                *paused = false;
                debug!(
                    consumer_group = %dispatcher.group_id,
                    topic = %self.topic,
                    partition = self.partition,
                    "Partition resumed"
                );
            }
            Err(err) => warn!(
                consumer_group = %dispatcher.group_id,
                topic = %self.topic,
                partition = self.partition,
                error = %err,
                "Failed to resume partition"
            ),
        }
    }
}

struct PartitionWorker {
    queue: mpsc::UnboundedSender<InboundMessage>,
    backlog: Arc<Backlog>,
    handle: JoinHandle<()>,
}

impl PartitionWorker {
    fn spawn(
        dispatcher: Arc<Dispatcher>,
        first: &InboundMessage,
        capacity: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let backlog = Arc::new(Backlog {
            topic: first.topic.clone(),
            partition: first.partition,
            limit: capacity.max(1),
            depth: AtomicUsize::new(0),
            paused: Mutex::new(false),
        });
        debug!(
            consumer_group = %dispatcher.group_id,
            topic = %first.topic,
            partition = first.partition,
            "Starting partition worker"
        );

        let worker_backlog = Arc::clone(&backlog);
        let handle = tokio::spawn(async move {
            loop {
                // Queued messages stay uncommitted and are redelivered
                let message = tokio::select! {
                    biased;
                    () = wait_for_shutdown(&mut shutdown) => break,
                    message = rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                // Runs to completion even if shutdown is requested meanwhile
                dispatcher.process(message).await;
                worker_backlog.depth.fetch_sub(1, Ordering::SeqCst);
                worker_backlog.resume_if_drained(&dispatcher).await;
            }
        });

        Self {
            queue,
            backlog,
            handle,
        }
    }
}

enum Outcome {
    Handled,
    Skipped,
    Failed(Failure),
}

struct Dispatcher {
    group_id: String,
    consumer: Arc<dyn ConsumerClient>,
    handlers: Arc<HandlerRegistry>,
    services: GroupServices,
}

impl Dispatcher {
    async fn process(&self, message: InboundMessage) {
        if let Outcome::Failed(failure) = self.evaluate(&message).await {
            ConsumeMetrics::record_failure(&self.group_id, failure.kind.as_str());
            if let Err(err) = self
                .services
                .dead_letters
                .route(&message.topic, &message, &failure)
                .await
            {
                debug!(consumer_group = %self.group_id, error = %err, "Committing past lost message");
            }
        }

        if let Err(err) = self.consumer.commit(&message).await {
            warn!(
                consumer_group = %self.group_id,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "Offset commit failed; message may be redelivered"
            );
        }
    }

    async fn evaluate(&self, message: &InboundMessage) -> Outcome {
        let Some(value) = message.value.as_deref() else {
            let err = EventError::DeserializationFailed("message has no value".to_string());
            return self.reject(message, FailureKind::Deserialization, &err);
        };

        let event = match Event::from_bytes(value) {
            Ok(event) => event,
            Err(err) => {
                if let Some(tag) = unknown_event_type(value) {
                    return self.skip(message, &tag);
                }
                return self.reject(message, FailureKind::Deserialization, &err);
            }
        };

        let validated = retry_with_predicate(
            &self.services.config.schema_retry,
            || self.services.validator.validate(&event),
            SchemaError::is_transient,
        )
        .await;
        if let Err(err) = validated {
            return self.reject(message, FailureKind::Schema, &err);
        }

        let Some(handler) = self.handlers.get(event.event_type()) else {
            return self.skip(message, event.event_type().as_str());
        };

        let started = Instant::now();
        match self.invoke(handler, &event, message).await {
            Ok(()) => {
                ConsumeMetrics::record_consumed(
                    &self.group_id,
                    event.event_type().as_str(),
                    started.elapsed(),
                );
                debug!(
                    consumer_group = %self.group_id,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    event_id = %event.event_id(),
                    event_type = %event.event_type(),
                    "Event handled"
                );
                Outcome::Handled
            }
            Err(err) => {
                error!(
                    consumer_group = %self.group_id,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.display_key(),
                    event_id = %event.event_id(),
                    event_type = %event.event_type(),
                    error = %err,
                    "Handler failed"
                );
                Outcome::Failed(Failure::handler(self.group_id.clone(), &err))
            }
        }
    }

    async fn invoke(
        &self,
        handler: &Arc<dyn EventHandler>,
        event: &Event,
        message: &InboundMessage,
    ) -> Result<(), HandlerError> {
        let policy = &self.services.config.handler_retry;
        let mut attempt: u32 = 1;

        loop {
            let ctx = HandlerContext {
                consumer_group: self.group_id.clone(),
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                key: message.key.clone(),
                attempt,
            };

            let result = AssertUnwindSafe(handler.handle(event, &ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("handler panicked".into()));

            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let retries_done = usize::try_from(attempt - 1).unwrap_or(usize::MAX);
            if retries_done >= policy.max_retries {
                return Err(err);
            }

            let delay = policy.delay_for_attempt(retries_done);
            warn!(
                consumer_group = %self.group_id,
                event_id = %event.event_id(),
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "Handler failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    fn skip(&self, message: &InboundMessage, event_type: &str) -> Outcome {
        ConsumeMetrics::record_skipped(&self.group_id, event_type);
        info!(
            consumer_group = %self.group_id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            event_type,
            "No handler registered; skipping"
        );
        Outcome::Skipped
    }

    fn reject(
        &self,
        message: &InboundMessage,
        kind: FailureKind,
        err: &(dyn std::error::Error + 'static),
    ) -> Outcome {
        warn!(
            consumer_group = %self.group_id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %message.display_key(),
            failure_kind = %kind,
            error = %err,
            "Message rejected"
        );
        Outcome::Failed(Failure::new(kind, self.group_id.clone(), err))
    }
}

/// The `metadata.event_type` tag of a well-formed envelope whose type is not
/// in the catalogue. No handler can exist for such a type.
fn unknown_event_type(value: &[u8]) -> Option<String> {
    let document: serde_json::Value = serde_json::from_slice(value).ok()?;
    let tag = document.get("metadata")?.get("event_type")?.as_str()?;
    tag.parse::<EventType>().is_err().then(|| tag.to_string())
}
