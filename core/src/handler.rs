//! Event handlers and per-group handler registries.
//!
//! A consumer group dispatches each incoming event to at most one handler,
//! chosen by the event's [`EventType`]. Handlers are registered before the
//! group starts; once the group is running its registry is frozen.
//!
//! # Example
//!
//! ```
//! use freight_events_core::event::EventType;
//! use freight_events_core::handler::HandlerRegistry;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = HandlerRegistry::new()
//!     .on(EventType::DriverCreated, |event| async move {
//!         println!("driver created: {}", event.payload());
//!         Ok(())
//!     })?
//!     .on(EventType::LoadCompleted, |_event| async { Ok(()) })?;
//!
//! assert_eq!(handlers.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::error::RegistrationError;
use crate::event::{Event, EventType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Error type returned by handlers. Its `Display` output becomes the
/// `error-message` header of the dead-letter record.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Delivery details passed alongside each event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerContext {
    /// Consumer group doing the processing
    pub consumer_group: String,
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Message key, if any
    pub key: Option<Vec<u8>>,
    /// 1-based delivery attempt within this process
    pub attempt: u32,
}

/// Processes events of one type.
///
/// Implementations must be idempotent: the bus delivers at least once, and a
/// message may be seen again after a crash or rebalance. Use
/// `event.event_id()` to detect duplicates.
///
/// # Error Handling
///
/// Returning `Err` routes the message to the topic's dead-letter companion and
/// moves on to the next message. Errors never stop the consumer group.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error marks the message as failed.
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<(), HandlerError>;
}

/// Adapter that turns an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    /// Wrap a closure.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

/// Mapping `event_type → handler` for one consumer group.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateHandler`] if the type already has
    /// a handler.
    pub fn register(
        &mut self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), RegistrationError> {
        if self.handlers.contains_key(&event_type) {
            return Err(RegistrationError::DuplicateHandler(
                event_type.as_str().to_string(),
            ));
        }
        self.handlers.insert(event_type, handler);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateHandler`] if the type already has
    /// a handler.
    pub fn with_handler(
        mut self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, RegistrationError> {
        self.register(event_type, handler)?;
        Ok(self)
    }

    /// Register an async closure for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateHandler`] if the type already has
    /// a handler.
    pub fn on<F, Fut>(self, event_type: EventType, f: F) -> Result<Self, RegistrationError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.with_handler(event_type, Arc::new(FnHandler::new(f)))
    }

    /// Handler for `event_type`, if registered.
    #[must_use]
    pub fn get(&self, event_type: EventType) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&event_type)
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
