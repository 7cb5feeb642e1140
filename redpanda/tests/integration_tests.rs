//! Integration tests for [`RedpandaBroker`] against a real Kafka instance.
//!
//! These tests use testcontainers to start a broker and drive the full
//! [`EventBus`] over it:
//! - Startup provisioning of category and dead-letter topics
//! - Publish/consume round-trip with committed offsets
//! - Dead-lettering of events whose handler fails
//!
//! The schema registry is the in-memory fake; the HTTP registry client has
//! its own unit tests.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` because they need Docker and take
//! 15-60 seconds each to start Kafka:
//! ```bash
//! cargo test -p freight-events-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use freight_events_core::broker::BrokerClient;
use freight_events_core::event::{Event, EventType};
use freight_events_core::handler::{HandlerError, HandlerRegistry};
use freight_events_redpanda::RedpandaBroker;
use freight_events_runtime::{BusConfig, EventBus};
use freight_events_testing::{fixtures, init_test_tracing};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

type Seen = Arc<Mutex<Vec<Event>>>;

/// Start Kafka and return the container with its bootstrap address.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    init_test_tracing();
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Initialize a bus, retrying while the broker finishes starting.
async fn started_bus(brokers: &str) -> EventBus {
    let config = BusConfig::default().with_brokers(brokers);
    for attempt in 1..=30 {
        let broker = RedpandaBroker::builder()
            .brokers(brokers)
            .auto_offset_reset("earliest")
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build broker client");
        let bus = EventBus::new(
            config.clone(),
            Arc::new(broker),
            Arc::new(fixtures::registry_with_fixture_schemas()),
        );
        match bus.initialize().await {
            Ok(()) => return bus,
            Err(e) => {
                assert!(attempt != 30, "Kafka failed to become ready: {e}");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    unreachable!("loop returns or fails")
}

fn recorder(seen: &Seen) -> impl Fn(Event) -> futures::future::Ready<Result<(), HandlerError>> + use<> {
    let sink = Arc::clone(seen);
    move |event| {
        sink.lock().expect("lock").push(event);
        futures::future::ready(Ok(()))
    }
}

async fn wait_for(seen: &Seen, expected: usize, timeout: Duration) {
    tokio::time::timeout(timeout, async {
        while seen.lock().expect("lock").len() < expected {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("Timed out waiting for events");
}

#[tokio::test]
#[ignore]
async fn test_initialize_provisions_category_and_dead_letter_topics() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = started_bus(&brokers).await;

    let broker = RedpandaBroker::new(&brokers).expect("broker");
    let admin = broker.admin();
    admin.connect().await.expect("admin connect");
    let topics = admin.list_topics().await.expect("list topics");

    for expected in [
        "driver-events",
        "driver-events-dlq",
        "load-events",
        "load-events-dlq",
        "gamification-events",
        "gamification-events-dlq",
    ] {
        assert!(
            topics.iter().any(|t| t == expected),
            "missing topic {expected}, have {topics:?}"
        );
    }

    admin.disconnect().await.expect("admin disconnect");
    bus.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn test_publish_and_consume_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = started_bus(&brokers).await;

    let seen: Seen = Arc::default();
    let handlers = HandlerRegistry::new()
        .on(EventType::LoadCompleted, recorder(&seen))
        .expect("register");
    bus.consume(&["load-events"], "gamification", handlers)
        .await
        .expect("consume");

    // Give the consumer time to join the group
    tokio::time::sleep(Duration::from_secs(3)).await;

    let first = fixtures::load_completed("L-1", "driver-7");
    let second = fixtures::load_completed("L-2", "driver-7");
    let receipt = bus.publish(&first).await.expect("publish first");
    bus.publish(&second).await.expect("publish second");
    assert_eq!(receipt.topic, "load-events");

    wait_for(&seen, 2, Duration::from_secs(30)).await;

    let received = seen.lock().expect("lock").clone();
    assert_eq!(received[0].event_id(), first.event_id());
    assert_eq!(received[1].event_id(), second.event_id());
    assert_eq!(received[0].payload(), first.payload());

    bus.shutdown().await;
    assert!(!bus.is_initialized());
}

#[tokio::test]
#[ignore]
async fn test_failed_handler_routes_event_to_dead_letter_topic() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = started_bus(&brokers).await;

    let failing = HandlerRegistry::new()
        .on(EventType::LoadCompleted, |_event| async {
            Err::<(), HandlerError>("leaderboard unavailable".into())
        })
        .expect("register");
    bus.consume(&["load-events"], "gamification", failing)
        .await
        .expect("consume");

    // Dead-letter records are copies of the original, so a second group can
    // decode them as events.
    let dead: Seen = Arc::default();
    let inspector = HandlerRegistry::new()
        .on(EventType::LoadCompleted, recorder(&dead))
        .expect("register");
    bus.consume(&["load-events-dlq"], "dlq-inspector", inspector)
        .await
        .expect("consume dlq");

    tokio::time::sleep(Duration::from_secs(3)).await;

    let event = fixtures::load_completed("L-9", "driver-3");
    bus.publish(&event).await.expect("publish");

    wait_for(&dead, 1, Duration::from_secs(30)).await;
    assert_eq!(dead.lock().expect("lock")[0].event_id(), event.event_id());

    bus.shutdown().await;
}
