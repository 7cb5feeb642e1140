//! Ready-made events and schemas for the platform's most common event types.

#![allow(clippy::expect_used)] // Fixtures are built from constant, known-valid input

use crate::InMemorySchemaRegistry;
use freight_events_core::event::{Event, EventType, EventVersion};
use serde_json::json;

/// Producer name stamped on fixture events.
pub const TEST_PRODUCER: &str = "test-service";

/// Schema for `DRIVER_CREATED` 1.0.0: requires a string `driverId`.
#[must_use]
pub fn driver_created_schema() -> serde_json::Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["driverId"],
        "properties": {
            "driverId": { "type": "string", "minLength": 1 },
            "name": { "type": "string" },
            "carrierId": { "type": "string" }
        }
    })
}

/// Schema for `LOAD_COMPLETED` 1.0.0: requires `loadId` and a non-negative
/// `revenue`.
#[must_use]
pub fn load_completed_schema() -> serde_json::Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["loadId", "revenue"],
        "properties": {
            "loadId": { "type": "string" },
            "driverId": { "type": "string" },
            "revenue": { "type": "number", "minimum": 0 }
        }
    })
}

/// Schema for `ACHIEVEMENT_EARNED` 1.0.0.
#[must_use]
pub fn achievement_earned_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["driverId", "achievement"],
        "properties": {
            "driverId": { "type": "string" },
            "achievement": { "type": "string" }
        }
    })
}

/// Registry with the fixture schemas registered at version 1.0.0.
#[must_use]
pub fn registry_with_fixture_schemas() -> InMemorySchemaRegistry {
    let v1 = EventVersion::new(1, 0, 0);
    InMemorySchemaRegistry::new()
        .with_schema(EventType::DriverCreated, v1, driver_created_schema())
        .with_schema(EventType::LoadCompleted, v1, load_completed_schema())
        .with_schema(EventType::AchievementEarned, v1, achievement_earned_schema())
}

/// A valid `DRIVER_CREATED` event.
///
/// # Panics
///
/// Never: the builder input is constant and valid.
#[must_use]
pub fn driver_created(driver_id: &str) -> Event {
    Event::builder(EventType::DriverCreated, json!({ "driverId": driver_id }))
        .producer(TEST_PRODUCER)
        .build()
        .expect("fixture event is valid")
}

/// A valid `LOAD_COMPLETED` event.
///
/// # Panics
///
/// Never: the builder input is constant and valid.
#[must_use]
pub fn load_completed(load_id: &str, driver_id: &str) -> Event {
    Event::builder(
        EventType::LoadCompleted,
        json!({ "loadId": load_id, "driverId": driver_id, "revenue": 1250.0 }),
    )
    .producer(TEST_PRODUCER)
    .build()
    .expect("fixture event is valid")
}

/// An event of `event_type` with an arbitrary payload, for tests that bypass
/// schema checks.
///
/// # Panics
///
/// Never: the builder input is constant and valid.
#[must_use]
pub fn event_with_payload(event_type: EventType, payload: serde_json::Value) -> Event {
    Event::builder(event_type, payload)
        .producer(TEST_PRODUCER)
        .build()
        .expect("fixture event is valid")
}
