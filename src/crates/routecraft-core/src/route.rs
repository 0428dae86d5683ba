//! A route: one source, one ordered pipeline, one cancellation token.
//!
//! [`Route`] owns exactly one [`ProcessingQueue`] and one consumer; neither is
//! shared with any other route. Its `start` future runs for the route's entire
//! lifetime and only resolves once the source's own subscription completes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::consumer::{BatchConsumer, BatchOptions, ConsumerHandler, SimpleConsumer};
use crate::context::Context;
use crate::error::RouteCraftError;
use crate::event::{ErrorOrigin, Event};
use crate::exchange::{Exchange, ExchangeInit, HeaderValue, Operation};
use crate::logger::ScopedLogger;
use crate::queue::ProcessingQueue;
use crate::step::Step;

/// Future a [`Source`] returns; resolves when the source is done emitting.
pub type SourceCompletion = Pin<Box<dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send>>;

/// Callback a source uses to hand a message (and optional headers) to its route.
pub type EmitFn = Arc<dyn Fn(Value, Option<HashMap<String, HeaderValue>>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Capability that emits messages until told to stop.
pub trait Source: Send + Sync {
    fn subscribe(&self, context: Arc<Context>, emit: EmitFn, cancellation: CancellationToken) -> SourceCompletion;
}

struct FnSource<F>(F);
impl<F> Source for FnSource<F>
where
    F: Fn(Arc<Context>, EmitFn, CancellationToken) -> SourceCompletion + Send + Sync,
{
    fn subscribe(&self, context: Arc<Context>, emit: EmitFn, cancellation: CancellationToken) -> SourceCompletion {
        (self.0)(context, emit, cancellation)
    }
}

/// Accepts either a capability object or a bare callable.
pub trait IntoSource {
    fn into_source(self) -> Arc<dyn Source>;
}
impl IntoSource for Arc<dyn Source> {
    fn into_source(self) -> Arc<dyn Source> {
        self
    }
}
impl<F> IntoSource for F
where
    F: Fn(Arc<Context>, EmitFn, CancellationToken) -> SourceCompletion + Send + Sync + 'static,
{
    fn into_source(self) -> Arc<dyn Source> {
        Arc::new(FnSource(self))
    }
}

/// Which consumer kind a route definition asks for.
#[derive(Clone)]
pub enum ConsumerDescriptor {
    Simple,
    Batch(BatchOptions),
}

/// Immutable record produced by the builder.
#[derive(Clone)]
pub struct RouteDefinition {
    pub id: String,
    pub source: Arc<dyn Source>,
    pub steps: Arc<[Step]>,
    pub consumer: ConsumerDescriptor,
}

/// A route's position in its own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePhase {
    Registered,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl RoutePhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RoutePhase::Registered,
            1 => RoutePhase::Starting,
            2 => RoutePhase::Running,
            3 => RoutePhase::Stopping,
            4 => RoutePhase::Stopped,
            _ => RoutePhase::Failed,
        }
    }
}

struct PhaseCell(AtomicU8);
impl PhaseCell {
    fn new() -> Self {
        Self(AtomicU8::new(RoutePhase::Registered as u8))
    }
    fn set(&self, phase: RoutePhase) {
        self.0.store(phase as u8, Ordering::SeqCst);
    }
    fn get(&self) -> RoutePhase {
        RoutePhase::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// The running instance of a [`RouteDefinition`]: its queue, cancellation token
/// and current phase. Owned exclusively by its [`Context`].
pub struct Route {
    definition: RouteDefinition,
    token: CancellationToken,
    queue: Arc<ProcessingQueue>,
    logger: ScopedLogger,
    phase: PhaseCell,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.definition.id)
            .field("phase", &self.phase.get())
            .finish()
    }
}

impl Route {
    pub fn new(definition: RouteDefinition, parent_token: &CancellationToken, context_logger: &ScopedLogger) -> Self {
        let logger = context_logger.for_route(&definition.id);
        Self {
            token: parent_token.child_token(),
            queue: Arc::new(ProcessingQueue::new()),
            logger,
            phase: PhaseCell::new(),
            definition,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn phase(&self) -> RoutePhase {
        self.phase.get()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run this route's full lifecycle: register the consumer, subscribe the
    /// source, and await its completion. Resolves once the route has fully
    /// stopped. Only a precondition failure (`route-cannot-start`) short-circuits
    /// before the source is ever invoked; once running, source failures are
    /// contained and surfaced as an `error` event, not as an `Err` here.
    pub async fn start(&self, context: Arc<Context>) -> Result<(), RouteCraftError> {
        if self.token.is_cancelled() {
            return Err(RouteCraftError::RouteCannotStart {
                route_id: self.id().to_string(),
            });
        }

        self.phase.set(RoutePhase::Starting);
        self.register_consumer(context.clone()).await;
        context
            .event_bus()
            .emit(
                Event::RouteStarting {
                    route_id: self.id().to_string(),
                },
                &self.logger,
            )
            .await;

        let emit: EmitFn = {
            let queue = self.queue.clone();
            Arc::new(move |body, headers| {
                let queue = queue.clone();
                let headers = headers.unwrap_or_default();
                Box::pin(async move {
                    queue.enqueue(body, headers).await;
                })
            })
        };

        self.phase.set(RoutePhase::Running);
        context
            .event_bus()
            .emit(
                Event::RouteStarted {
                    route_id: self.id().to_string(),
                },
                &self.logger,
            )
            .await;

        let source_result = self
            .definition
            .source
            .subscribe(context.clone(), emit, self.token.clone())
            .await;

        self.queue.clear().await;
        self.token.cancel();
        self.phase.set(RoutePhase::Stopping);
        context
            .event_bus()
            .emit(
                Event::RouteStopping {
                    route_id: self.id().to_string(),
                },
                &self.logger,
            )
            .await;

        if let Err(cause) = source_result {
            self.logger.error(format!("source subscription ended with error: {cause}"));
            self.phase.set(RoutePhase::Failed);
            context
                .event_bus()
                .emit(
                    Event::Error {
                        error: Arc::new(RouteCraftError::Unknown {
                            route_id: self.id().to_string(),
                            cause,
                        }),
                        origin: ErrorOrigin::Route(self.id().to_string()),
                    },
                    &self.logger,
                )
                .await;
        } else {
            self.phase.set(RoutePhase::Stopped);
        }

        context
            .event_bus()
            .emit(
                Event::RouteStopped {
                    route_id: self.id().to_string(),
                },
                &self.logger,
            )
            .await;

        Ok(())
    }

    /// Abort the token and detach the queue's handler. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        self.queue.clear().await;
    }

    async fn register_consumer(&self, context: Arc<Context>) {
        let steps = self.definition.steps.clone();
        let route_id = self.definition.id.to_string();
        let logger = self.logger.clone();
        let handler: ConsumerHandler = Arc::new(move |body, headers| {
            let steps = steps.clone();
            let route_id = route_id.clone();
            let logger = logger.clone();
            let context = context.clone();
            Box::pin(async move {
                drive_pipeline(context, &route_id, steps, logger, body, headers).await;
            })
        });

        match &self.definition.consumer {
            ConsumerDescriptor::Simple => {
                let consumer = Arc::new(SimpleConsumer::new());
                consumer.register(handler).await;
                let queue = self.queue.clone();
                queue
                    .set_handler(Arc::new(move |body, headers| {
                        let consumer = consumer.clone();
                        tokio::spawn(async move {
                            consumer.deliver(body, headers).await;
                        });
                    }))
                    .await;
            }
            ConsumerDescriptor::Batch(options) => {
                let consumer = Arc::new(BatchConsumer::new(options.clone(), self.logger.clone()));
                consumer.register(handler).await;
                let queue = self.queue.clone();
                queue
                    .set_handler(Arc::new(move |body, headers| {
                        let consumer = consumer.clone();
                        tokio::spawn(async move {
                            consumer.deliver(body, headers).await;
                        });
                    }))
                    .await;
            }
        }
    }
}

/// Build the initial FROM exchange and walk the route's steps, maintaining a
/// FIFO local work queue of `(exchange, remaining steps)` pairs. Per-step
/// errors are logged and surfaced as an `error` event and do not abort the
/// driver; it returns when the queue drains.
async fn drive_pipeline(
    context: Arc<Context>,
    route_id: &str,
    steps: Arc<[Step]>,
    logger: ScopedLogger,
    body: Value,
    headers: HashMap<String, HeaderValue>,
) {
    let exchange_id = uuid::Uuid::new_v4().to_string();
    let correlation_id = match headers.get("correlation_id") {
        Some(HeaderValue::String(s)) => s.clone(),
        _ => uuid::Uuid::new_v4().to_string(),
    };
    let mut headers = headers;
    headers.insert("correlation_id".to_string(), HeaderValue::String(correlation_id.clone()));

    let init = ExchangeInit {
        id: Some(exchange_id.clone()),
        headers,
        body: Some(body),
    };
    let mut exchange = Exchange::new(logger.for_exchange(&exchange_id, &correlation_id), init);
    exchange.set_route(route_id);
    exchange.set_operation(Operation::From);

    let mut local_queue: VecDeque<(Exchange, Arc<[Step]>)> = VecDeque::new();
    local_queue.push_back((exchange, steps));

    while let Some((mut exchange, remaining)) = local_queue.pop_front() {
        let Some((step, rest)) = remaining.split_first() else {
            continue;
        };
        let rest: Arc<[Step]> = Arc::from(rest);
        exchange.set_operation(step.kind().into());
        if let Err(error) = step.execute(route_id, exchange, rest, &mut local_queue).await {
            logger.error(format!("step failed: {error}"));
            context
                .event_bus()
                .emit(
                    Event::Error {
                        error: Arc::new(error),
                        origin: ErrorOrigin::Route(route_id.to_string()),
                    },
                    &logger,
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::step::{IntoProcessor, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct OneShot(Value);
    impl Source for OneShot {
        fn subscribe(&self, _context: Arc<Context>, emit: EmitFn, _cancellation: CancellationToken) -> SourceCompletion {
            let body = self.0.clone();
            Box::pin(async move {
                emit(body, None).await;
                Ok(())
            })
        }
    }

    fn definition(id: &str, source: impl Source + 'static, steps: Vec<Step>) -> RouteDefinition {
        RouteDefinition {
            id: id.to_string(),
            source: Arc::new(source),
            steps: Arc::from(steps),
            consumer: ConsumerDescriptor::Simple,
        }
    }

    #[tokio::test]
    async fn start_runs_the_pipeline_and_ends_in_stopped() {
        let context = Context::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let processor = (move |ex: Exchange| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(ex)
            }) as crate::step::BoxFuture<'static, Result<Exchange, Box<dyn std::error::Error + Send + Sync>>>
        })
        .into_processor();
        let def = definition("r1", OneShot(Value::from(1)), vec![Step::Process(processor)]);
        let route = Route::new(def, &context.cancellation(), context.logger());

        route.start(context.clone()).await.unwrap();

        assert_eq!(route.phase(), RoutePhase::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_fails_fast_if_the_token_is_already_cancelled() {
        let context = Context::new("test");
        let def = definition("r1", OneShot(Value::Null), vec![]);
        let route = Route::new(def, &context.cancellation(), context.logger());
        route.cancellation().cancel();

        let result = route.start(context.clone()).await;
        assert!(matches!(result, Err(RouteCraftError::RouteCannotStart { .. })));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let context = Context::new("test");
        let def = definition("r1", OneShot(Value::Null), vec![]);
        let route = Route::new(def, &context.cancellation(), context.logger());
        route.stop().await;
        route.stop().await;
        assert!(route.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn drive_pipeline_assigns_fresh_correlation_id_when_absent() {
        let context = Context::new("test");
        let logger = ScopedLogger::default();
        let steps: Arc<[Step]> = Arc::from(Vec::new());
        drive_pipeline(context, "r1", steps, logger, Value::from(1), HashMap::new()).await;
    }

    #[tokio::test]
    async fn a_failing_step_emits_an_error_event_with_its_own_code() {
        let context = Context::new("test");
        let errors: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = errors.clone();
        context
            .event_bus()
            .subscribe(
                crate::event::EventKind::Error,
                Arc::new(move |event: &crate::event::Event| {
                    if let crate::event::Event::Error { error, .. } = event {
                        captured.lock().unwrap().push(error.code());
                    }
                }),
            )
            .await;

        let processor = (|_ex: Exchange| {
            Box::pin(async move { Err(crate::error::cause_from_display("boom")) })
                as crate::step::BoxFuture<'static, Result<Exchange, Box<dyn std::error::Error + Send + Sync>>>
        })
        .into_processor();
        let steps: Arc<[Step]> = Arc::from(vec![Step::Process(processor)]);
        drive_pipeline(context, "r1", steps, ScopedLogger::default(), Value::from(1), HashMap::new()).await;

        assert_eq!(errors.lock().unwrap().clone(), vec!["process-error"]);
    }
}
