//! Property-based testing strategies for event bus types.

use freight_events_core::event::{EventType, EventVersion};
use proptest::prelude::*;

/// Any known event type.
pub fn arb_event_type() -> impl Strategy<Value = EventType> {
    proptest::sample::select(EventType::ALL.to_vec())
}

/// Any semantic version with small components.
pub fn arb_event_version() -> impl Strategy<Value = EventVersion> {
    (0u64..20, 0u64..20, 0u64..20).prop_map(|(major, minor, patch)| {
        EventVersion::new(major, minor, patch)
    })
}

/// Partition keys: short ASCII identifiers like `driver-42`.
pub fn arb_partition_key() -> impl Strategy<Value = String> {
    "[a-z]{1,8}-[0-9]{1,4}"
}
