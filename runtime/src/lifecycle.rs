//! Event bus lifecycle management.
//!
//! [`EventBus`] is the single entry point services use. It owns the bus status
//! and coordinates startup and shutdown of every client as one ordered
//! sequence:
//!
//! 1. **Initialize**: connect producer, connect admin client, provision topics
//! 2. **Run**: publish events, start consumer groups
//! 3. **Shutdown**: stop all consumer groups in parallel, disconnect producer,
//!    disconnect admin client
//!
//! # Example
//!
//! ```rust,no_run
//! use freight_events_core::event::{Event, EventType};
//! use freight_events_core::handler::HandlerRegistry;
//! use freight_events_core::{BrokerClient, SchemaRegistryClient};
//! use freight_events_runtime::{BusConfig, EventBus};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     broker: Arc<dyn BrokerClient>,
//! #     registry: Arc<dyn SchemaRegistryClient>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new(BusConfig::from_env()?, broker, registry);
//! bus.initialize().await?;
//!
//! let handlers = HandlerRegistry::new().on(EventType::LoadCompleted, |event| async move {
//!     println!("load completed: {}", event.payload());
//!     Ok(())
//! })?;
//! bus.consume(&["load-events"], "gamification", handlers).await?;
//!
//! let event = Event::builder(EventType::DriverCreated, json!({ "driverId": "123" }))
//!     .producer("user-service")
//!     .build()?;
//! bus.publish(&event).await?;
//!
//! freight_events_runtime::lifecycle::shutdown_signal().await;
//! bus.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::BusConfig;
use crate::consumer::{ConsumerGroup, GroupServices};
use crate::dead_letter::DeadLetterRouter;
use crate::provisioner::TopicProvisioner;
use crate::publisher::{PublishReceipt, Publisher};
use crate::status::{BusState, GroupState, HealthStatus, StatusView, StatusWriter, status_channel};
use crate::validator::SchemaValidator;
use freight_events_core::broker::{AdminClient, BrokerClient, ProducerClient};
use freight_events_core::error::{LifecycleError, PublishError};
use freight_events_core::event::Event;
use freight_events_core::handler::HandlerRegistry;
use freight_events_core::schema::SchemaRegistryClient;
use freight_events_core::topic::is_dead_letter_topic;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Event bus client: publisher, consumer groups and their lifecycle.
pub struct EventBus {
    config: BusConfig,
    broker: Arc<dyn BrokerClient>,
    producer: Arc<dyn ProducerClient>,
    admin: Arc<dyn AdminClient>,
    validator: Arc<SchemaValidator>,
    provisioner: TopicProvisioner,
    publisher: Publisher,
    dead_letters: Arc<DeadLetterRouter>,
    status: StatusWriter,
    groups: Mutex<Vec<ConsumerGroup>>,
    transition: Mutex<()>,
}

impl EventBus {
    /// Create an uninitialized bus. No connection is made until
    /// [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(
        config: BusConfig,
        broker: Arc<dyn BrokerClient>,
        registry: Arc<dyn SchemaRegistryClient>,
    ) -> Self {
        let producer = broker.producer();
        let admin = broker.admin();
        let validator = Arc::new(SchemaValidator::new(registry));
        let provisioner = TopicProvisioner::new(Arc::clone(&admin), config.topics.auto_create);
        let (status, view) = status_channel();

        let publisher = Publisher::new(
            Arc::clone(&producer),
            Arc::clone(&validator),
            config.topics.router.clone(),
            view,
            config.producer_timeout,
        );
        let dead_letters = Arc::new(DeadLetterRouter::new(
            Arc::clone(&producer),
            provisioner.clone(),
            config.topics.default_partitions,
            config.topics.replication_factor,
        ));

        Self {
            config,
            broker,
            producer,
            admin,
            validator,
            provisioner,
            publisher,
            dead_letters,
            status,
            groups: Mutex::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Connect the producer and admin client and provision topics.
    ///
    /// Calling `initialize` on an initialized bus does nothing. If any step
    /// fails, every client connected so far is disconnected and the bus stays
    /// uninitialized.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Connect`] if a client cannot connect
    /// - [`LifecycleError::Provision`] if required topics cannot be created
    pub async fn initialize(&self) -> Result<(), LifecycleError> {
        let _transition = self.transition.lock().await;
        if self.status.view().is_initialized() {
            return Ok(());
        }

        info!(brokers = %self.config.brokers, client_id = %self.config.client_id, "Initializing event bus");

        self.producer
            .connect()
            .await
            .map_err(|source| LifecycleError::Connect {
                client: "producer",
                source,
            })?;

        if let Err(source) = self.admin.connect().await {
            self.disconnect_producer().await;
            return Err(LifecycleError::Connect {
                client: "admin",
                source,
            });
        }

        let topics = self.config.startup_topics();
        if let Err(err) = self.provisioner.ensure_topics(&topics).await {
            error!(error = %err, "Topic provisioning failed");
            self.disconnect_producer().await;
            self.disconnect_admin().await;
            return Err(err.into());
        }

        if self.provisioner.auto_create() {
            self.dead_letters
                .mark_provisioned(
                    topics
                        .iter()
                        .filter(|d| is_dead_letter_topic(&d.name))
                        .map(|d| d.name.clone()),
                )
                .await;
        }

        self.status.set(BusState {
            initialized: true,
            connected: true,
        });
        info!(topics = topics.len(), "Event bus initialized");
        Ok(())
    }

    /// Stop every consumer group, then disconnect the producer and admin
    /// client.
    ///
    /// Safe to call more than once; later calls do nothing. Disconnect
    /// failures are logged, never returned.
    pub async fn shutdown(&self) {
        let _transition = self.transition.lock().await;
        let groups: Vec<ConsumerGroup> = self.groups.lock().await.drain(..).collect();

        if !self.status.view().is_initialized() && groups.is_empty() {
            return;
        }

        info!(consumer_groups = groups.len(), "Shutting down event bus");
        futures::future::join_all(groups.iter().map(ConsumerGroup::stop)).await;

        self.disconnect_producer().await;
        self.disconnect_admin().await;

        self.status.set(BusState::default());
        info!("Event bus shut down");
    }

    /// Start consumer group `group_id` on `topics`, dispatching to `handlers`.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotInitialized`] before [`initialize`](Self::initialize)
    /// - [`LifecycleError::GroupAlreadyRunning`] if `group_id` is already running
    /// - [`LifecycleError::NoTopics`] if `topics` is empty
    /// - [`LifecycleError::Connect`] / [`LifecycleError::Subscribe`] on broker
    ///   failures
    pub async fn consume<S: AsRef<str>>(
        &self,
        topics: &[S],
        group_id: &str,
        handlers: HandlerRegistry,
    ) -> Result<(), LifecycleError> {
        // A concurrent shutdown either finishes first or sees the new group
        let _transition = self.transition.lock().await;
        if !self.status.view().is_initialized() {
            return Err(LifecycleError::NotInitialized);
        }

        let mut groups = self.groups.lock().await;
        if groups.iter().any(|g| g.group_id() == group_id) {
            return Err(LifecycleError::GroupAlreadyRunning(group_id.to_string()));
        }

        let consumer = self
            .broker
            .consumer(group_id)
            .map_err(|source| LifecycleError::Connect {
                client: "consumer",
                source,
            })?;
        let topics: Vec<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();

        if handlers.is_empty() {
            warn!(consumer_group = group_id, "Consumer group has no handlers; every message will be skipped");
        }

        let group = ConsumerGroup::start(consumer, group_id, topics, handlers, self.group_services()).await?;
        groups.push(group);
        Ok(())
    }

    /// Stop one consumer group. Returns false if no such group is running.
    pub async fn stop_consumer(&self, group_id: &str) -> bool {
        let group = {
            let mut groups = self.groups.lock().await;
            let Some(index) = groups.iter().position(|g| g.group_id() == group_id) else {
                return false;
            };
            groups.remove(index)
        };
        group.stop().await;
        true
    }

    /// Publish `event` keyed by its event id.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish_with_key`].
    pub async fn publish(&self, event: &Event) -> Result<PublishReceipt, PublishError> {
        self.publisher.publish(event).await
    }

    /// Publish `event` with an explicit partition key.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish_with_key`].
    pub async fn publish_with_key(
        &self,
        event: &Event,
        key: impl AsRef<[u8]>,
    ) -> Result<PublishReceipt, PublishError> {
        self.publisher.publish_with_key(event, key).await
    }

    /// Returns true once `initialize` has completed and until `shutdown`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.status.view().is_initialized()
    }

    /// Returns true while the producer and admin client are connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.view().is_connected()
    }

    /// Read-only view of the bus status.
    #[must_use]
    pub fn status(&self) -> StatusView {
        self.status.view()
    }

    /// State of consumer group `group_id`, if it is tracked.
    pub async fn group_state(&self, group_id: &str) -> Option<GroupState> {
        self.groups
            .lock()
            .await
            .iter()
            .find(|g| g.group_id() == group_id)
            .map(ConsumerGroup::state)
    }

    /// Health report for an external health endpoint.
    pub async fn health(&self) -> HealthStatus {
        let state = self.status.view().current();
        let consumer_groups = self
            .groups
            .lock()
            .await
            .iter()
            .map(ConsumerGroup::health)
            .collect();
        HealthStatus {
            initialized: state.initialized,
            connected: state.connected,
            consumer_groups,
        }
    }

    /// The schema validator shared by publisher and consumers.
    #[must_use]
    pub fn validator(&self) -> &Arc<SchemaValidator> {
        &self.validator
    }

    /// Bus configuration.
    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    fn group_services(&self) -> GroupServices {
        GroupServices {
            validator: Arc::clone(&self.validator),
            dead_letters: Arc::clone(&self.dead_letters),
            config: self.config.consumer.clone(),
        }
    }

    async fn disconnect_producer(&self) {
        if let Err(err) = self.producer.disconnect().await {
            warn!(error = %err, "Producer disconnect failed");
        }
    }

    async fn disconnect_admin(&self) {
        if let Err(err) = self.admin.disconnect().await {
            warn!(error = %err, "Admin client disconnect failed");
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("brokers", &self.config.brokers)
            .field("state", &self.status.view().current())
            .finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// Returns when the process receives SIGINT or SIGTERM. If a handler cannot be
/// installed the failure is logged and that signal is ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
