//! Shared setup for the runtime integration tests.

#![allow(dead_code)] // Each test binary uses a different subset
#![allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors

use freight_events_core::event::{Event, EventType};
use freight_events_core::handler::{HandlerError, HandlerRegistry};
use freight_events_runtime::{BusConfig, EventBus, RetryPolicy};
use freight_events_testing::{InMemoryBroker, InMemorySchemaRegistry, fixtures, init_test_tracing};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bus plus handles on its fakes.
pub struct TestBus {
    pub bus: EventBus,
    pub broker: InMemoryBroker,
    pub registry: InMemorySchemaRegistry,
}

/// Retry policy with millisecond delays.
pub fn fast_policy(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(5))
        .max_delay(Duration::from_millis(20))
        .build()
}

/// Default configuration with fast reconnects and schema retries.
pub fn test_config() -> BusConfig {
    BusConfig::default()
        .with_reconnect_policy(fast_policy(20))
        .with_schema_retry(fast_policy(1))
}

/// Uninitialized bus over fresh fakes.
pub fn new_bus(config: BusConfig) -> TestBus {
    init_test_tracing();
    let broker = InMemoryBroker::new();
    let registry = fixtures::registry_with_fixture_schemas();
    let bus = EventBus::new(config, Arc::new(broker.clone()), Arc::new(registry.clone()));
    TestBus {
        bus,
        broker,
        registry,
    }
}

/// Initialized bus over fresh fakes.
pub async fn started_bus(config: BusConfig) -> TestBus {
    let test = new_bus(config);
    test.bus.initialize().await.expect("initialize");
    test
}

/// Events collected by a recording handler.
pub type Seen = Arc<Mutex<Vec<Event>>>;

/// Handlers that record every event of `event_type`.
pub fn recording(event_type: EventType) -> (HandlerRegistry, Seen) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let handlers = HandlerRegistry::new()
        .on(event_type, move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().expect("lock").push(event);
                Ok::<(), HandlerError>(())
            }
        })
        .expect("register");
    (handlers, seen)
}

/// Number of events recorded so far.
pub fn count(seen: &Seen) -> usize {
    seen.lock().expect("lock").len()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
