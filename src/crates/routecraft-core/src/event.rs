//! Typed lifecycle/error notifications to user-provided observers.
//!
//! Observers are keyed by the event kind they want and invoked in registration
//! order; a failing observer is logged and skipped so it never disturbs its
//! siblings or the component that fired the event.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::RouteCraftError;
use crate::logger::ScopedLogger;

/// Where an `error` event originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOrigin {
    Route(String),
    Context,
    Startup,
    Shutdown,
}

impl std::fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorOrigin::Route(id) => write!(f, "{id}"),
            ErrorOrigin::Context => f.write_str("context"),
            ErrorOrigin::Startup => f.write_str("startup"),
            ErrorOrigin::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// One notification the event bus delivers to observers.
#[derive(Debug, Clone)]
pub enum Event {
    ContextStarting,
    ContextStarted,
    ContextStopping,
    ContextStopped,
    RouteRegistered { route_id: String },
    RouteStarting { route_id: String },
    RouteStarted { route_id: String },
    RouteStopping { route_id: String },
    RouteStopped { route_id: String },
    Error { error: Arc<RouteCraftError>, origin: ErrorOrigin },
}

/// The discriminant an observer subscribes by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ContextStarting,
    ContextStarted,
    ContextStopping,
    ContextStopped,
    RouteRegistered,
    RouteStarting,
    RouteStarted,
    RouteStopping,
    RouteStopped,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ContextStarting => EventKind::ContextStarting,
            Event::ContextStarted => EventKind::ContextStarted,
            Event::ContextStopping => EventKind::ContextStopping,
            Event::ContextStopped => EventKind::ContextStopped,
            Event::RouteRegistered { .. } => EventKind::RouteRegistered,
            Event::RouteStarting { .. } => EventKind::RouteStarting,
            Event::RouteStarted { .. } => EventKind::RouteStarted,
            Event::RouteStopping { .. } => EventKind::RouteStopping,
            Event::RouteStopped { .. } => EventKind::RouteStopped,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

/// An event observer. Implementors should treat their own panics/errors as
/// internal; the bus has no way to retry or report back to the firer.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventObserver for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Kind-keyed, registration-ordered, fault-isolated observer registry.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventObserver>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for `kind`. Observers fire in the order they were added.
    pub async fn subscribe(&self, kind: EventKind, observer: Arc<dyn EventObserver>) {
        self.observers
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(observer);
    }

    /// Fire `event` to every observer registered for its kind, in registration
    /// order. A panicking observer is caught, logged, and skipped.
    pub async fn emit(&self, event: Event, logger: &ScopedLogger) {
        let observers = {
            let guard = self.observers.read().await;
            guard.get(&event.kind()).cloned().unwrap_or_default()
        };
        for observer in observers {
            let event_ref = &event;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                observer.on_event(event_ref);
            }));
            if outcome.is_err() {
                logger.error(format!("event observer panicked handling {:?}", event.kind()));
            }
        }
    }
}
