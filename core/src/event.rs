//! Domain events and their wire format.
//!
//! An [`Event`] is the unit of communication between the platform's services.
//! It is made of an immutable [`EventMetadata`] block and a JSON payload whose
//! shape is fixed by the `(event_type, event_version)` pair.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "metadata": {
//!     "event_id": "6f1c0b8e-...",
//!     "event_type": "DRIVER_CREATED",
//!     "event_version": "1.0.0",
//!     "event_time": "2025-01-01T00:00:00Z",
//!     "producer": "user-service",
//!     "correlation_id": "6f1c0b8e-...",
//!     "category": "driver"
//!   },
//!   "payload": { "driverId": "123" }
//! }
//! ```
//!
//! # Example
//!
//! ```
//! use freight_events_core::event::{Event, EventType};
//! use serde_json::json;
//!
//! let event = Event::builder(EventType::DriverCreated, json!({ "driverId": "123" }))
//!     .producer("user-service")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(event.event_type(), EventType::DriverCreated);
//! assert_eq!(event.metadata().correlation_id(), event.event_id().to_string());
//! ```

use crate::error::EventError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Catalogue of domain events exchanged on the bus.
///
/// Serialized as `SCREAMING_SNAKE_CASE` (`DRIVER_CREATED`). The tag selects the
/// payload schema and the handler that receives the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A driver profile was created
    DriverCreated,
    /// A driver profile changed
    DriverUpdated,
    /// A driver's availability or location changed
    DriverStatusChanged,
    /// A load was posted
    LoadCreated,
    /// A load was assigned to a driver
    LoadAssigned,
    /// A load was picked up
    LoadPickedUp,
    /// A load was delivered
    LoadDelivered,
    /// A load was completed and settled
    LoadCompleted,
    /// A load was cancelled
    LoadCancelled,
    /// A carrier was onboarded
    CarrierCreated,
    /// A carrier profile changed
    CarrierUpdated,
    /// A driver earned an achievement
    AchievementEarned,
    /// A leaderboard was recomputed
    LeaderboardUpdated,
    /// A lane's market rate changed
    MarketRateUpdated,
    /// A demand forecast was refreshed
    DemandForecastUpdated,
    /// A notification was requested
    NotificationRequested,
    /// A notification was delivered
    NotificationSent,
    /// A platform user was created
    UserCreated,
    /// A platform user changed
    UserUpdated,
}

impl EventType {
    /// Every known event type.
    pub const ALL: [Self; 19] = [
        Self::DriverCreated,
        Self::DriverUpdated,
        Self::DriverStatusChanged,
        Self::LoadCreated,
        Self::LoadAssigned,
        Self::LoadPickedUp,
        Self::LoadDelivered,
        Self::LoadCompleted,
        Self::LoadCancelled,
        Self::CarrierCreated,
        Self::CarrierUpdated,
        Self::AchievementEarned,
        Self::LeaderboardUpdated,
        Self::MarketRateUpdated,
        Self::DemandForecastUpdated,
        Self::NotificationRequested,
        Self::NotificationSent,
        Self::UserCreated,
        Self::UserUpdated,
    ];

    /// Wire representation of the tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DriverCreated => "DRIVER_CREATED",
            Self::DriverUpdated => "DRIVER_UPDATED",
            Self::DriverStatusChanged => "DRIVER_STATUS_CHANGED",
            Self::LoadCreated => "LOAD_CREATED",
            Self::LoadAssigned => "LOAD_ASSIGNED",
            Self::LoadPickedUp => "LOAD_PICKED_UP",
            Self::LoadDelivered => "LOAD_DELIVERED",
            Self::LoadCompleted => "LOAD_COMPLETED",
            Self::LoadCancelled => "LOAD_CANCELLED",
            Self::CarrierCreated => "CARRIER_CREATED",
            Self::CarrierUpdated => "CARRIER_UPDATED",
            Self::AchievementEarned => "ACHIEVEMENT_EARNED",
            Self::LeaderboardUpdated => "LEADERBOARD_UPDATED",
            Self::MarketRateUpdated => "MARKET_RATE_UPDATED",
            Self::DemandForecastUpdated => "DEMAND_FORECAST_UPDATED",
            Self::NotificationRequested => "NOTIFICATION_REQUESTED",
            Self::NotificationSent => "NOTIFICATION_SENT",
            Self::UserCreated => "USER_CREATED",
            Self::UserUpdated => "USER_UPDATED",
        }
    }

    /// Category used for topic selection when the producer does not override it.
    #[must_use]
    pub const fn default_category(&self) -> EventCategory {
        match self {
            Self::DriverCreated | Self::DriverUpdated | Self::DriverStatusChanged => {
                EventCategory::Driver
            }
            Self::LoadCreated
            | Self::LoadAssigned
            | Self::LoadPickedUp
            | Self::LoadDelivered
            | Self::LoadCompleted
            | Self::LoadCancelled => EventCategory::Load,
            Self::CarrierCreated | Self::CarrierUpdated => EventCategory::Carrier,
            Self::AchievementEarned | Self::LeaderboardUpdated => EventCategory::Gamification,
            Self::MarketRateUpdated | Self::DemandForecastUpdated => EventCategory::Market,
            Self::NotificationRequested | Self::NotificationSent => EventCategory::Notification,
            Self::UserCreated | Self::UserUpdated => EventCategory::User,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

/// Coarse grouping of events, used to pick the destination topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Driver lifecycle and status
    Driver,
    /// Load lifecycle
    Load,
    /// Carrier onboarding and profile
    Carrier,
    /// Achievements and leaderboards
    Gamification,
    /// Market intelligence
    Market,
    /// Outbound notifications
    Notification,
    /// Platform user accounts
    User,
}

impl EventCategory {
    /// Every known category.
    pub const ALL: [Self; 7] = [
        Self::Driver,
        Self::Load,
        Self::Carrier,
        Self::Gamification,
        Self::Market,
        Self::Notification,
        Self::User,
    ];

    /// Wire representation of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Load => "load",
            Self::Carrier => "carrier",
            Self::Gamification => "gamification",
            Self::Market => "market",
            Self::Notification => "notification",
            Self::User => "user",
        }
    }

    /// Default topic for this category: `<category>-events`.
    #[must_use]
    pub fn default_topic(&self) -> String {
        format!("{}-events", self.as_str())
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| EventError::UnknownCategory(s.to_string()))
    }
}

/// Semantic version of an event's payload schema.
///
/// Serialized as the string `MAJOR.MINOR.PATCH`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventVersion {
    major: u64,
    minor: u64,
    patch: u64,
}

impl EventVersion {
    /// Create a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Major component. Payloads of different majors are not compatible.
    #[must_use]
    pub const fn major(&self) -> u64 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.minor
    }

    /// Patch component.
    #[must_use]
    pub const fn patch(&self) -> u64 {
        self.patch
    }
}

impl Default for EventVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl fmt::Display for EventVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for EventVersion {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EventError::InvalidVersion(s.to_string());
        let mut parts = s.split('.');
        let mut next = || -> Result<u64, EventError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for EventVersion {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventVersion> for String {
    fn from(version: EventVersion) -> Self {
        version.to_string()
    }
}

/// Immutable envelope metadata. Fields are only readable; an event that needs
/// correcting is superseded by a new event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    event_id: Uuid,
    event_type: EventType,
    event_version: EventVersion,
    event_time: DateTime<Utc>,
    producer: String,
    correlation_id: String,
    category: EventCategory,
}

impl EventMetadata {
    /// Globally unique event identifier, assigned at creation.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Event type tag.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Payload schema version.
    #[must_use]
    pub const fn event_version(&self) -> EventVersion {
        self.event_version
    }

    /// Creation time on the producer's clock.
    #[must_use]
    pub const fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    /// Name of the originating service.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Identifier shared by every event in a causal chain.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Category used for topic selection.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        self.category
    }
}

/// A domain event: metadata plus a schema-checked JSON payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    metadata: EventMetadata,
    payload: serde_json::Value,
}

impl Event {
    /// Start building an event of the given type.
    #[must_use]
    pub fn builder(event_type: EventType, payload: serde_json::Value) -> EventBuilder {
        EventBuilder::new(event_type, payload)
    }

    /// Start building a follow-up event that shares this event's correlation id
    /// and producer.
    #[must_use]
    pub fn caused_by(&self, event_type: EventType, payload: serde_json::Value) -> EventBuilder {
        EventBuilder::new(event_type, payload)
            .producer(self.metadata.producer.clone())
            .correlation_id(self.metadata.correlation_id.clone())
    }

    /// Envelope metadata.
    #[must_use]
    pub const fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Raw JSON payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Shortcut for `metadata().event_id()`.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.metadata.event_id
    }

    /// Shortcut for `metadata().event_type()`.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.metadata.event_type
    }

    /// Shortcut for `metadata().event_version()`.
    #[must_use]
    pub const fn event_version(&self) -> EventVersion {
        self.metadata.event_version
    }

    /// Deserialize the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationFailed`] if the payload does not
    /// match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| EventError::DeserializationFailed(e.to_string()))
    }

    /// Encode the event as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationFailed`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationFailed(e.to_string()))
    }

    /// Decode an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationFailed`] if the bytes are not a
    /// well-formed event document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationFailed(e.to_string()))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event {{ id: {}, type: {}, version: {} }}",
            self.metadata.event_id, self.metadata.event_type, self.metadata.event_version
        )
    }
}

/// Builder for [`Event`]. The event id is always freshly generated.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event_type: EventType,
    payload: serde_json::Value,
    version: Option<String>,
    producer: Option<String>,
    correlation_id: Option<String>,
    category: Option<EventCategory>,
    event_time: Option<DateTime<Utc>>,
}

impl EventBuilder {
    fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            payload,
            version: None,
            producer: None,
            correlation_id: None,
            category: None,
            event_time: None,
        }
    }

    /// Set the payload schema version (default `1.0.0`).
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the originating service name. Required.
    #[must_use]
    pub fn producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Set the correlation id (default: the new event's id).
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Override the category derived from the event type.
    #[must_use]
    pub const fn category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Override the creation time (default: now).
    #[must_use]
    pub const fn event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// Build the event.
    ///
    /// # Errors
    ///
    /// - [`EventError::InvalidVersion`] if the version is not `MAJOR.MINOR.PATCH`
    /// - [`EventError::MissingField`] if no producer was set
    pub fn build(self) -> Result<Event, EventError> {
        let event_version = match self.version {
            Some(version) => version.parse()?,
            None => EventVersion::default(),
        };
        let producer = self
            .producer
            .filter(|p| !p.trim().is_empty())
            .ok_or(EventError::MissingField("producer"))?;
        let event_id = Uuid::new_v4();

        Ok(Event {
            metadata: EventMetadata {
                event_id,
                event_type: self.event_type,
                event_version,
                event_time: self.event_time.unwrap_or_else(Utc::now),
                producer,
                correlation_id: self
                    .correlation_id
                    .unwrap_or_else(|| event_id.to_string()),
                category: self
                    .category
                    .unwrap_or_else(|| self.event_type.default_category()),
            },
            payload: self.payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: tests fail loudly on fixture errors
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn driver_created() -> Event {
        Event::builder(EventType::DriverCreated, json!({ "driverId": "123" }))
            .producer("user-service")
            .build()
            .expect("valid event")
    }

    #[test]
    fn event_type_round_trips_through_wire_tag() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
        }
        assert_eq!(
            "DRIVER_EXPLODED".parse::<EventType>(),
            Err(EventError::UnknownEventType("DRIVER_EXPLODED".to_string()))
        );
    }

    #[test]
    fn serde_tag_matches_as_str() {
        for event_type in EventType::ALL {
            let json = serde_json::to_value(event_type).expect("serializable tag");
            assert_eq!(json, json!(event_type.as_str()));
        }
    }

    #[test]
    fn category_topics_follow_naming_convention() {
        assert_eq!(EventCategory::Driver.default_topic(), "driver-events");
        assert_eq!(EventCategory::Gamification.default_topic(), "gamification-events");
        assert_eq!(
            EventType::AchievementEarned.default_category(),
            EventCategory::Gamification
        );
    }

    #[test]
    fn builder_fills_defaults() {
        let event = driver_created();
        let metadata = event.metadata();

        assert_eq!(metadata.event_version(), EventVersion::new(1, 0, 0));
        assert_eq!(metadata.category(), EventCategory::Driver);
        assert_eq!(metadata.correlation_id(), event.event_id().to_string());
        assert_eq!(metadata.producer(), "user-service");
    }

    #[test]
    fn builder_requires_producer() {
        let result = Event::builder(EventType::LoadCreated, json!({})).build();
        assert_eq!(result, Err(EventError::MissingField("producer")));
    }

    #[test]
    fn builder_rejects_bad_version() {
        let result = Event::builder(EventType::LoadCreated, json!({}))
            .producer("load-service")
            .version("1.0")
            .build();
        assert_eq!(result, Err(EventError::InvalidVersion("1.0".to_string())));
    }

    #[test]
    fn every_event_gets_a_fresh_id() {
        assert_ne!(driver_created().event_id(), driver_created().event_id());
    }

    #[test]
    fn caused_by_propagates_correlation() {
        let parent = driver_created();
        let child = parent
            .caused_by(EventType::AchievementEarned, json!({ "driverId": "123" }))
            .build()
            .expect("valid event");

        assert_eq!(child.metadata().correlation_id(), parent.metadata().correlation_id());
        assert_eq!(child.metadata().producer(), "user-service");
        assert_ne!(child.event_id(), parent.event_id());
        assert_eq!(child.metadata().category(), EventCategory::Gamification);
    }

    #[test]
    fn wire_format_has_metadata_and_payload() {
        let event = driver_created();
        let bytes = event.to_bytes().expect("serializable event");
        let doc: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");

        assert_eq!(doc["metadata"]["event_type"], "DRIVER_CREATED");
        assert_eq!(doc["metadata"]["event_version"], "1.0.0");
        assert_eq!(doc["metadata"]["category"], "driver");
        assert_eq!(doc["payload"]["driverId"], "123");

        let decoded = Event::from_bytes(&bytes);
        assert_eq!(decoded, Ok(event));
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        assert!(matches!(
            Event::from_bytes(b"{\"metadata\":{}}"),
            Err(EventError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn payload_as_decodes_typed_struct() {
        #[derive(Deserialize)]
        struct DriverCreated {
            #[serde(rename = "driverId")]
            driver_id: String,
        }

        let payload: DriverCreated = driver_created()
            .payload_as()
            .expect("typed payload");
        assert_eq!(payload.driver_id, "123");
    }

    proptest! {
        #[test]
        fn version_display_parses_back(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
            let version = EventVersion::new(major, minor, patch);
            prop_assert_eq!(version.to_string().parse::<EventVersion>(), Ok(version));
        }

        #[test]
        fn version_rejects_non_numeric_parts(s in "[0-9]{1,3}\\.[a-z]{1,3}\\.[0-9]{1,3}") {
            prop_assert!(s.parse::<EventVersion>().is_err());
        }
    }
}
