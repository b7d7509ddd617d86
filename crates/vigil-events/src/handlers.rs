//! Event handlers and their registry.
//!
//! A handler is registered with an id, the event types it wants (empty set =
//! every type) and a priority. For each processed event the matching
//! handlers run one after another in ascending priority; equal priorities
//! run in registration order.

use crate::events::{Event, EventType};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Default handler priority.
pub const DEFAULT_HANDLER_PRIORITY: i32 = 100;

/// Consumer of processed events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Errors are recorded on the event's result and do not
    /// stop later handlers.
    async fn handle(&self, event: Arc<Event>) -> anyhow::Result<()>;
}

type HandlerCallback = Box<
    dyn Fn(Arc<Event>) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Handler backed by a closure.
///
/// # Example
///
/// ```rust,ignore
/// let handler = CallbackHandler::new(|event| async move {
///     risk_store.apply(&event.payload).await
/// });
/// processor.register_handler(HandlerRegistration::new("risk", handler)
///     .for_types([EventType::RiskChanged]));
/// ```
pub struct CallbackHandler {
    callback: HandlerCallback,
}

impl CallbackHandler {
    /// Wrap an async closure.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |event| Box::pin(callback(event))),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(move |event: Arc<Event>| std::future::ready(callback(event.as_ref())))
    }
}

#[async_trait]
impl EventHandler for CallbackHandler {
    async fn handle(&self, event: Arc<Event>) -> anyhow::Result<()> {
        (self.callback)(event).await
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler").finish_non_exhaustive()
    }
}

/// A handler together with its routing and ordering.
#[derive(Clone)]
pub struct HandlerRegistration {
    /// Unique id within a processor
    pub id: String,
    /// Types this handler receives; empty means all
    pub event_types: HashSet<EventType>,
    /// Dispatch order, lower first
    pub priority: i32,
    /// The handler
    pub handler: Arc<dyn EventHandler>,
}

impl HandlerRegistration {
    /// Register `handler` for every event type at the default priority.
    pub fn new(id: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        Self::shared(id, Arc::new(handler))
    }

    /// Same as [`new`](Self::new) for an already shared handler.
    pub fn shared(id: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            id: id.into(),
            event_types: HashSet::new(),
            priority: DEFAULT_HANDLER_PRIORITY,
            handler,
        }
    }

    /// Restrict to the given event types.
    pub fn for_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types = types.into_iter().collect();
        self
    }

    /// Set priority (lower = earlier)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Check if this handler wants `event_type`.
    pub fn matches(&self, event_type: &EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(event_type)
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("event_types", &self.event_types)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Introspection view of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerInfo {
    /// Handler id
    pub id: String,
    /// Accepted event types, sorted by name; empty means all
    pub event_types: Vec<EventType>,
    /// Dispatch priority
    pub priority: i32,
}

struct RegisteredHandler {
    seq: u64,
    registration: Arc<HandlerRegistration>,
}

/// Ordered handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<RegisteredHandler>,
    next_seq: u64,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. An existing registration with the same id is
    /// replaced and keeps its original tie-break position.
    pub fn register(&mut self, registration: HandlerRegistration) {
        let registration = Arc::new(registration);
        match self
            .handlers
            .iter_mut()
            .find(|h| h.registration.id == registration.id)
        {
            Some(existing) => existing.registration = registration,
            None => {
                self.handlers.push(RegisteredHandler {
                    seq: self.next_seq,
                    registration,
                });
                self.next_seq += 1;
            }
        }
        self.handlers
            .sort_by_key(|h| (h.registration.priority, h.seq));
    }

    /// Unregister a handler by id
    pub fn unregister(&mut self, id: &str) -> bool {
        let before_len = self.handlers.len();
        self.handlers.retain(|h| h.registration.id != id);
        self.handlers.len() < before_len
    }

    /// Handlers for `event_type`, in dispatch order.
    pub fn matching(&self, event_type: &EventType) -> Vec<Arc<HandlerRegistration>> {
        self.handlers
            .iter()
            .filter(|h| h.registration.matches(event_type))
            .map(|h| Arc::clone(&h.registration))
            .collect()
    }

    /// All handlers in dispatch order.
    pub fn list(&self) -> Vec<HandlerInfo> {
        self.handlers
            .iter()
            .map(|h| {
                let mut event_types: Vec<EventType> =
                    h.registration.event_types.iter().cloned().collect();
                event_types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                HandlerInfo {
                    id: h.registration.id.clone(),
                    event_types,
                    priority: h.registration.priority,
                }
            })
            .collect()
    }

    /// Check if a handler id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.iter().any(|h| h.registration.id == id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Remove every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}
