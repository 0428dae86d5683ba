//! The context: supervisor owning a set of routes, a shared store, a
//! lifecycle and an event bus.
//!
//! Route ids are globally unique within a context. The context exclusively
//! owns its routes; see [`Route`] for what a route in turn owns.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::RouteCraftError;
use crate::event::{ErrorOrigin, Event, EventBus, EventKind, EventObserver};
use crate::logger::ScopedLogger;
use crate::registry::DirectRegistry;
use crate::route::{Route, RouteDefinition};
use crate::store::Store;

/// A fallible lifecycle hook: the context's startup or shutdown action.
pub type LifecycleHook =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send>> + Send + Sync>;

/// Options controlling a [`Context`]'s own lifecycle, as opposed to anything
/// route-specific. Not a config-file format — route definitions, credentials
/// and adapter wiring stay the loader's problem (see crate docs).
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Stop the context automatically once every registered route has ended
    /// (`Stopped` or `Failed`). Disable for a context meant to stay alive
    /// even after a scripted route finishes, e.g. one fed only by a
    /// long-running adapter that outlives any single route's source.
    pub auto_stop: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self { auto_stop: true }
    }
}

/// Supervises a set of independently running routes inside one shared
/// environment: store, event bus, direct registry, master cancellation token.
pub struct Context {
    id: String,
    routes: RwLock<HashMap<String, Arc<Route>>>,
    store: Store,
    direct_registry: DirectRegistry,
    events: EventBus,
    token: CancellationToken,
    logger: ScopedLogger,
    options: ContextOptions,
    startup_hook: RwLock<Option<LifecycleHook>>,
    shutdown_hook: RwLock<Option<LifecycleHook>>,
    stopped: std::sync::atomic::AtomicBool,
}

impl Context {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Self::with_options(id, ContextOptions::default())
    }

    pub fn with_options(id: impl Into<String>, options: ContextOptions) -> Arc<Self> {
        let id = id.into();
        Arc::new(Self {
            logger: ScopedLogger::for_context(&id),
            id,
            routes: RwLock::new(HashMap::new()),
            store: Store::new(),
            direct_registry: DirectRegistry::new(),
            events: EventBus::new(),
            token: CancellationToken::new(),
            options,
            startup_hook: RwLock::new(None),
            shutdown_hook: RwLock::new(None),
            stopped: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn direct_registry(&self) -> &DirectRegistry {
        &self.direct_registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn logger(&self) -> &ScopedLogger {
        &self.logger
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn set_startup_hook(&self, hook: LifecycleHook) {
        *self.startup_hook.write().await = Some(hook);
    }

    pub async fn set_shutdown_hook(&self, hook: LifecycleHook) {
        *self.shutdown_hook.write().await = Some(hook);
    }

    pub async fn subscribe_event(&self, kind: EventKind, observer: Arc<dyn EventObserver>) {
        self.events.subscribe(kind, observer).await;
    }

    /// Validate uniqueness (both within `definitions` and against what's already
    /// registered), wrap each into a live [`Route`], and emit `routeRegistered`.
    pub async fn register_routes(self: &Arc<Self>, definitions: Vec<RouteDefinition>) -> Result<(), RouteCraftError> {
        let mut seen = std::collections::HashSet::new();
        for def in &definitions {
            if !seen.insert(def.id.clone()) {
                return Err(RouteCraftError::DuplicateRouteId {
                    route_id: def.id.clone(),
                });
            }
        }

        let mut routes = self.routes.write().await;
        for def in &definitions {
            if routes.contains_key(&def.id) {
                return Err(RouteCraftError::DuplicateRouteId {
                    route_id: def.id.clone(),
                });
            }
        }

        for def in definitions {
            let route_id = def.id.clone();
            let route = Arc::new(Route::new(def, &self.token, &self.logger));
            routes.insert(route_id.clone(), route);
            self.events
                .emit(Event::RouteRegistered { route_id }, &self.logger)
                .await;
        }
        Ok(())
    }

    pub async fn route_ids(&self) -> Vec<String> {
        self.routes.read().await.keys().cloned().collect()
    }

    pub async fn route_phase(&self, id: &str) -> Option<crate::route::RoutePhase> {
        self.routes.read().await.get(id).map(|r| r.phase())
    }

    /// Run the startup hook, start every registered route concurrently, and
    /// — once every route's start future has settled — stop the context if
    /// every route has ended. A route still running keeps the context alive.
    pub async fn start(self: &Arc<Self>) -> Result<(), RouteCraftError> {
        self.events.emit(Event::ContextStarting, &self.logger).await;

        if let Some(hook) = self.startup_hook.read().await.clone() {
            if let Err(cause) = hook().await {
                self.logger.error(format!("startup hook failed: {cause}"));
                self.events
                    .emit(
                        Event::Error {
                            error: Arc::new(RouteCraftError::Unknown {
                                route_id: self.id.clone(),
                                cause,
                            }),
                            origin: ErrorOrigin::Startup,
                        },
                        &self.logger,
                    )
                    .await;
            }
        }

        self.events.emit(Event::ContextStarted, &self.logger).await;

        let routes: Vec<Arc<Route>> = self.routes.read().await.values().cloned().collect();
        let context = self.clone();
        let starts = routes.iter().cloned().map(|route| {
            let context = context.clone();
            async move { route.start(context).await }
        });
        let results = futures::future::join_all(starts).await;
        for result in results {
            if let Err(error) = result {
                self.logger.error(format!("route failed to start: {error}"));
                self.events
                    .emit(
                        Event::Error {
                            error: Arc::new(error),
                            origin: ErrorOrigin::Context,
                        },
                        &self.logger,
                    )
                    .await;
            }
        }

        if self.options.auto_stop {
            let all_ended = {
                let routes = self.routes.read().await;
                routes.values().all(|r| {
                    matches!(
                        r.phase(),
                        crate::route::RoutePhase::Stopped | crate::route::RoutePhase::Failed
                    )
                })
            };
            if all_ended {
                self.stop().await;
            }
        }

        Ok(())
    }

    /// Abort every route's token, run the shutdown hook, emit `contextStopped`.
    /// Idempotent.
    pub async fn stop(self: &Arc<Self>) {
        if self
            .stopped
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }

        self.events.emit(Event::ContextStopping, &self.logger).await;

        let routes: Vec<Arc<Route>> = self.routes.read().await.values().cloned().collect();
        for route in &routes {
            route.stop().await;
        }
        self.token.cancel();

        if let Some(hook) = self.shutdown_hook.read().await.clone() {
            if let Err(cause) = hook().await {
                self.logger.error(format!("shutdown hook failed: {cause}"));
                self.events
                    .emit(
                        Event::Error {
                            error: Arc::new(RouteCraftError::Unknown {
                                route_id: self.id.clone(),
                                cause,
                            }),
                            origin: ErrorOrigin::Shutdown,
                        },
                        &self.logger,
                    )
                    .await;
            }
        }

        self.events.emit(Event::ContextStopped, &self.logger).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{EmitFn, Source, SourceCompletion};
    use crate::step::Step;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneShot;
    impl Source for OneShot {
        fn subscribe(&self, _context: Arc<Context>, emit: EmitFn, _cancellation: CancellationToken) -> SourceCompletion {
            Box::pin(async move {
                emit(Value::Null, None).await;
                Ok(())
            })
        }
    }

    fn definition(id: &str) -> RouteDefinition {
        RouteDefinition {
            id: id.to_string(),
            source: Arc::new(OneShot),
            steps: Arc::from(Vec::<Step>::new()),
            consumer: crate::route::ConsumerDescriptor::Simple,
        }
    }

    #[tokio::test]
    async fn register_routes_rejects_duplicate_ids_within_the_batch() {
        let context = Context::new("test");
        let result = context
            .register_routes(vec![definition("a"), definition("a")])
            .await;
        assert!(matches!(result, Err(RouteCraftError::DuplicateRouteId { .. })));
    }

    #[tokio::test]
    async fn register_routes_rejects_id_already_registered() {
        let context = Context::new("test");
        context.register_routes(vec![definition("a")]).await.unwrap();
        let result = context.register_routes(vec![definition("a")]).await;
        assert!(matches!(result, Err(RouteCraftError::DuplicateRouteId { .. })));
    }

    #[tokio::test]
    async fn start_runs_every_route_and_stops_once_all_have_ended() {
        let context = Context::new("test");
        context
            .register_routes(vec![definition("a"), definition("b")])
            .await
            .unwrap();
        context.start().await.unwrap();

        assert_eq!(context.route_phase("a").await, Some(crate::route::RoutePhase::Stopped));
        assert_eq!(context.route_phase("b").await, Some(crate::route::RoutePhase::Stopped));
        assert!(context.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn stop_runs_shutdown_hook_exactly_once() {
        let context = Context::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        context
            .set_shutdown_hook(Arc::new(move || {
                let counted = counted.clone();
                Box::pin(async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .await;

        context.stop().await;
        context.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn route_phase_of_unknown_id_is_none() {
        let context = Context::new("test");
        assert_eq!(context.route_phase("missing").await, None);
    }

    #[tokio::test]
    async fn auto_stop_disabled_leaves_the_context_alive_after_routes_end() {
        let context = Context::with_options("test", ContextOptions { auto_stop: false });
        context.register_routes(vec![definition("a")]).await.unwrap();
        context.start().await.unwrap();

        assert_eq!(context.route_phase("a").await, Some(crate::route::RoutePhase::Stopped));
        assert!(!context.cancellation().is_cancelled());
    }
}
