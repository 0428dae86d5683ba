//! Pipeline steps: the polymorphic operations a route's pipeline driver walks.
//!
//! Per the design notes, steps are a tagged variant with a uniform `execute`
//! contract rather than a class hierarchy. Each variant wraps a small capability
//! (a function-like value) and contributes nothing else to the exchange besides
//! what that capability returns.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{cause_from_display, RouteCraftError};
use crate::exchange::{Exchange, Operation};

/// Boxed future returned by every capability in this module.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The tag written to `Exchange::operation` immediately before a step runs.
/// A superset-minus-`From` mirror of [`Operation`]; kept as a separate type
/// because `From` is a consumer concern, not a step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Process,
    To,
    Split,
    Aggregate,
    Transform,
    Tap,
    Filter,
}

impl From<StepKind> for Operation {
    fn from(kind: StepKind) -> Self {
        match kind {
            StepKind::Process => Operation::Process,
            StepKind::To => Operation::To,
            StepKind::Split => Operation::Split,
            StepKind::Aggregate => Operation::Aggregate,
            StepKind::Transform => Operation::Transform,
            StepKind::Tap => Operation::Tap,
            StepKind::Filter => Operation::Filter,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Operation::from(*self), f)
    }
}

/// A processor: `ex -> ex'`, possibly failing.
pub trait Processor: Send + Sync {
    fn process(&self, exchange: Exchange) -> BoxFuture<'_, Result<Exchange, Box<dyn std::error::Error + Send + Sync>>>;
}

/// A destination / sink: consumes an exchange for its side effect.
pub trait Destination: Send + Sync {
    fn send(&self, exchange: &Exchange) -> BoxFuture<'_, Result<(), Box<dyn std::error::Error + Send + Sync>>>;
}

/// A pure body-to-body transform.
pub trait Transformer: Send + Sync {
    fn transform(&self, body: &Value) -> Value;
}

/// A non-critical observer invoked with a deep copy of the exchange.
pub trait Tap: Send + Sync {
    fn observe(&self, exchange: &Exchange) -> BoxFuture<'_, Result<(), Box<dyn std::error::Error + Send + Sync>>>;
}

/// A predicate deciding whether an exchange continues.
pub trait Filter: Send + Sync {
    fn test(&self, exchange: &Exchange) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// A fan-out function: one exchange's body to an ordered sequence of child bodies.
pub trait Splitter: Send + Sync {
    fn split(&self, body: &Value) -> Result<Vec<Value>, Box<dyn std::error::Error + Send + Sync>>;
}

/// A fan-in function: a finite sequence of exchanges reduced to one body.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, exchanges: &[Exchange]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

type ProcessFuture = BoxFuture<'static, Result<Exchange, Box<dyn std::error::Error + Send + Sync>>>;
type SendFuture = BoxFuture<'static, Result<(), Box<dyn std::error::Error + Send + Sync>>>;
type TapFuture = BoxFuture<'static, Result<(), Box<dyn std::error::Error + Send + Sync>>>;

struct FnProcessor<F>(F);
impl<F> Processor for FnProcessor<F>
where
    F: Fn(Exchange) -> ProcessFuture + Send + Sync,
{
    fn process(&self, exchange: Exchange) -> BoxFuture<'_, Result<Exchange, Box<dyn std::error::Error + Send + Sync>>> {
        (self.0)(exchange)
    }
}

struct FnDestination<F>(F);
impl<F> Destination for FnDestination<F>
where
    F: Fn(&Exchange) -> SendFuture + Send + Sync,
{
    fn send(&self, exchange: &Exchange) -> BoxFuture<'_, Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        (self.0)(exchange)
    }
}

struct FnTransformer<F>(F);
impl<F> Transformer for FnTransformer<F>
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    fn transform(&self, body: &Value) -> Value {
        (self.0)(body)
    }
}

struct FnTap<F>(F);
impl<F> Tap for FnTap<F>
where
    F: Fn(&Exchange) -> TapFuture + Send + Sync,
{
    fn observe(&self, exchange: &Exchange) -> BoxFuture<'_, Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        (self.0)(exchange)
    }
}

struct FnFilter<F>(F);
impl<F> Filter for FnFilter<F>
where
    F: Fn(&Exchange) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn test(&self, exchange: &Exchange) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(exchange)
    }
}

struct FnSplitter<F>(F);
impl<F> Splitter for FnSplitter<F>
where
    F: Fn(&Value) -> Result<Vec<Value>, Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn split(&self, body: &Value) -> Result<Vec<Value>, Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(body)
    }
}

struct FnAggregator<F>(F);
impl<F> Aggregator for FnAggregator<F>
where
    F: Fn(&[Exchange]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    fn aggregate(&self, exchanges: &[Exchange]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(exchanges)
    }
}

/// Accepts either a capability object or a bare callable, per the builder DSL's
/// "wrap callables into capability objects" requirement.
pub trait IntoProcessor {
    fn into_processor(self) -> Arc<dyn Processor>;
}
impl IntoProcessor for Arc<dyn Processor> {
    fn into_processor(self) -> Arc<dyn Processor> {
        self
    }
}
impl<F> IntoProcessor for F
where
    F: Fn(Exchange) -> ProcessFuture + Send + Sync + 'static,
{
    fn into_processor(self) -> Arc<dyn Processor> {
        Arc::new(FnProcessor(self))
    }
}

pub trait IntoDestination {
    fn into_destination(self) -> Arc<dyn Destination>;
}
impl IntoDestination for Arc<dyn Destination> {
    fn into_destination(self) -> Arc<dyn Destination> {
        self
    }
}
impl<F> IntoDestination for F
where
    F: Fn(&Exchange) -> SendFuture + Send + Sync + 'static,
{
    fn into_destination(self) -> Arc<dyn Destination> {
        Arc::new(FnDestination(self))
    }
}

pub trait IntoTransformer {
    fn into_transformer(self) -> Arc<dyn Transformer>;
}
impl IntoTransformer for Arc<dyn Transformer> {
    fn into_transformer(self) -> Arc<dyn Transformer> {
        self
    }
}
impl<F> IntoTransformer for F
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    fn into_transformer(self) -> Arc<dyn Transformer> {
        Arc::new(FnTransformer(self))
    }
}

pub trait IntoTap {
    fn into_tap(self) -> Arc<dyn Tap>;
}
impl IntoTap for Arc<dyn Tap> {
    fn into_tap(self) -> Arc<dyn Tap> {
        self
    }
}
impl<F> IntoTap for F
where
    F: Fn(&Exchange) -> TapFuture + Send + Sync + 'static,
{
    fn into_tap(self) -> Arc<dyn Tap> {
        Arc::new(FnTap(self))
    }
}

pub trait IntoFilter {
    fn into_filter(self) -> Arc<dyn Filter>;
}
impl IntoFilter for Arc<dyn Filter> {
    fn into_filter(self) -> Arc<dyn Filter> {
        self
    }
}
impl<F> IntoFilter for F
where
    F: Fn(&Exchange) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    fn into_filter(self) -> Arc<dyn Filter> {
        Arc::new(FnFilter(self))
    }
}

pub trait IntoSplitter {
    fn into_splitter(self) -> Arc<dyn Splitter>;
}
impl IntoSplitter for Arc<dyn Splitter> {
    fn into_splitter(self) -> Arc<dyn Splitter> {
        self
    }
}
impl<F> IntoSplitter for F
where
    F: Fn(&Value) -> Result<Vec<Value>, Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    fn into_splitter(self) -> Arc<dyn Splitter> {
        Arc::new(FnSplitter(self))
    }
}

pub trait IntoAggregator {
    fn into_aggregator(self) -> Arc<dyn Aggregator>;
}
impl IntoAggregator for Arc<dyn Aggregator> {
    fn into_aggregator(self) -> Arc<dyn Aggregator> {
        self
    }
}
impl<F> IntoAggregator for F
where
    F: Fn(&[Exchange]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
{
    fn into_aggregator(self) -> Arc<dyn Aggregator> {
        Arc::new(FnAggregator(self))
    }
}

/// One entry in a route's ordered pipeline. A tagged variant, not a trait object
/// hierarchy: the pipeline driver matches on this directly.
#[derive(Clone)]
pub enum Step {
    Process(Arc<dyn Processor>),
    To(Arc<dyn Destination>),
    Transform(Arc<dyn Transformer>),
    Tap(Arc<dyn Tap>),
    Filter(Arc<dyn Filter>),
    Split(Arc<dyn Splitter>),
    Aggregate(Arc<dyn Aggregator>),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Process(_) => "Step::Process",
            Step::To(_) => "Step::To",
            Step::Transform(_) => "Step::Transform",
            Step::Tap(_) => "Step::Tap",
            Step::Filter(_) => "Step::Filter",
            Step::Split(_) => "Step::Split",
            Step::Aggregate(_) => "Step::Aggregate",
        })
    }
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Process(_) => StepKind::Process,
            Step::To(_) => StepKind::To,
            Step::Transform(_) => StepKind::Transform,
            Step::Tap(_) => StepKind::Tap,
            Step::Filter(_) => StepKind::Filter,
            Step::Split(_) => StepKind::Split,
            Step::Aggregate(_) => StepKind::Aggregate,
        }
    }

    /// Run this step, pushing whichever `(exchange, rest)` pairs it produces onto
    /// `local_queue`. `rest` is the slice of steps still to run after this one.
    ///
    /// Aggregate additionally needs visibility into (and removal rights over)
    /// `local_queue` itself, to collect split siblings; see the `aggregate` arm.
    pub async fn execute(
        &self,
        route_id: &str,
        exchange: Exchange,
        rest: Arc<[Step]>,
        local_queue: &mut std::collections::VecDeque<(Exchange, Arc<[Step]>)>,
    ) -> Result<(), RouteCraftError> {
        match self {
            Step::Process(p) => {
                let out = p
                    .process(exchange)
                    .await
                    .map_err(|cause| RouteCraftError::for_step(StepKind::Process, route_id, cause))?;
                local_queue.push_back((out, rest));
                Ok(())
            }
            Step::Transform(t) => {
                let body = t.transform(exchange.body());
                local_queue.push_back((exchange.with_body(body), rest));
                Ok(())
            }
            Step::To(d) => {
                d.send(&exchange).await.map_err(|cause| {
                    // A destination backed by a registry (direct, channel, ...) may
                    // fail with its own structured, already-coded error (e.g.
                    // `direct-schema-validation`); surface that code as-is instead
                    // of flattening every destination failure into `to-error`.
                    match cause.downcast::<RouteCraftError>() {
                        Ok(structured) => *structured,
                        Err(cause) => RouteCraftError::for_step(StepKind::To, route_id, cause),
                    }
                })?;
                local_queue.push_back((exchange, rest));
                Ok(())
            }
            Step::Tap(observer) => {
                let copy = exchange.tap_copy();
                let tap_error = observer.observe(&copy).await.err();
                // Always continue with the original exchange, even on failure:
                // a tap is a non-critical observer, never a gate.
                local_queue.push_back((exchange, rest));
                if let Some(cause) = tap_error {
                    copy.logger().error(format!("tap observer failed: {cause}"));
                    return Err(RouteCraftError::for_step(StepKind::Tap, route_id, cause));
                }
                Ok(())
            }
            Step::Filter(predicate) => {
                let keep = predicate
                    .test(&exchange)
                    .map_err(|cause| RouteCraftError::for_step(StepKind::Filter, route_id, cause))?;
                if keep {
                    local_queue.push_back((exchange, rest));
                }
                Ok(())
            }
            Step::Split(splitter) => {
                let children = splitter
                    .split(exchange.body())
                    .map_err(|cause| RouteCraftError::for_step(StepKind::Split, route_id, cause))?;
                let group_id = uuid::Uuid::new_v4().to_string();
                for child_body in children {
                    let child = exchange.split_child(child_body, &group_id);
                    local_queue.push_back((child, rest.clone()));
                }
                Ok(())
            }
            Step::Aggregate(aggregator) => {
                let hierarchy = exchange.split_hierarchy();
                if hierarchy.is_empty() {
                    let body = aggregator
                        .aggregate(std::slice::from_ref(&exchange))
                        .map_err(|cause| RouteCraftError::for_step(StepKind::Aggregate, route_id, cause))?;
                    local_queue.push_back((exchange.aggregated(body), rest));
                    return Ok(());
                }
                let group_id = hierarchy.last().cloned().unwrap_or_default();
                let mut peers = Vec::new();
                let mut remaining = std::collections::VecDeque::new();
                while let Some((candidate, candidate_rest)) = local_queue.pop_front() {
                    let matches = candidate
                        .split_hierarchy()
                        .last()
                        .is_some_and(|id| id == &group_id);
                    if matches {
                        peers.push(candidate);
                    } else {
                        remaining.push_back((candidate, candidate_rest));
                    }
                }
                *local_queue = remaining;
                let mut all = vec![exchange];
                all.extend(peers);
                let body = aggregator
                    .aggregate(&all)
                    .map_err(|cause| {
                        RouteCraftError::for_step(StepKind::Aggregate, route_id, cause)
                    })?;
                let representative = all.into_iter().next().expect("all always has >= 1 element");
                local_queue.push_back((representative.aggregated(body), rest));
                Ok(())
            }
        }
    }
}

/// Convenience so a unit-returning tap closure's error type can be created from a
/// plain `Display`-able value without the caller boxing it manually.
pub fn step_error(message: impl fmt::Display) -> Box<dyn std::error::Error + Send + Sync> {
    cause_from_display(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeInit;
    use crate::logger::ScopedLogger;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange(body: Value) -> Exchange {
        Exchange::new(
            ScopedLogger::default(),
            ExchangeInit {
                body: Some(body),
                ..Default::default()
            },
        )
    }

    fn no_rest() -> Arc<[Step]> {
        Arc::from(Vec::<Step>::new())
    }

    #[tokio::test]
    async fn transform_rewrites_body_and_keeps_id() {
        let step = Step::Transform(
            (|body: &Value| Value::from(body.as_i64().unwrap_or(0) + 1)).into_transformer(),
        );
        let ex = exchange(Value::from(1));
        let id = ex.id().to_string();
        let mut queue = VecDeque::new();
        step.execute("r", ex, no_rest(), &mut queue).await.unwrap();
        let (out, _) = queue.pop_front().unwrap();
        assert_eq!(out.id(), id);
        assert_eq!(out.body(), &Value::from(2));
    }

    #[tokio::test]
    async fn filter_false_drops_the_exchange() {
        let step = Step::Filter((|_ex: &Exchange| Ok(false)).into_filter());
        let mut queue = VecDeque::new();
        step.execute("r", exchange(Value::Null), no_rest(), &mut queue)
            .await
            .unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn filter_true_keeps_the_exchange() {
        let step = Step::Filter((|_ex: &Exchange| Ok(true)).into_filter());
        let mut queue = VecDeque::new();
        step.execute("r", exchange(Value::Null), no_rest(), &mut queue)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn tap_pushes_original_even_when_observer_fails() {
        let step = Step::Tap(
            (|_ex: &Exchange| Box::pin(async { Err(step_error("boom")) }) as TapFuture)
                .into_tap(),
        );
        let ex = exchange(Value::from("payload"));
        let id = ex.id().to_string();
        let mut queue = VecDeque::new();
        let result = step.execute("r", ex, no_rest(), &mut queue).await;
        assert!(result.is_err());
        let (out, _) = queue.pop_front().unwrap();
        assert_eq!(out.id(), id);
        assert_eq!(out.body(), &Value::from("payload"));
    }

    #[tokio::test]
    async fn tap_does_not_mutate_pipeline_copy() {
        let observed = Arc::new(AtomicUsize::new(0));
        let captured = observed.clone();
        let step = Step::Tap(
            (move |ex: &Exchange| {
                captured.store(ex.body().as_i64().unwrap_or(-1) as usize, Ordering::SeqCst);
                Box::pin(async { Ok(()) }) as TapFuture
            })
            .into_tap(),
        );
        let mut queue = VecDeque::new();
        step.execute("r", exchange(Value::from(7)), no_rest(), &mut queue)
            .await
            .unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 7);
        let (out, _) = queue.pop_front().unwrap();
        assert_eq!(out.body(), &Value::from(7));
    }

    #[tokio::test]
    async fn split_produces_fresh_ids_sharing_a_group() {
        let step = Step::Split(
            (|body: &Value| Ok(body.as_array().cloned().unwrap_or_default())).into_splitter(),
        );
        let ex = exchange(serde_json::json!([1, 2, 3]));
        let mut queue = VecDeque::new();
        step.execute("r", ex, no_rest(), &mut queue).await.unwrap();
        assert_eq!(queue.len(), 3);
        let group_ids: std::collections::HashSet<_> = queue
            .iter()
            .map(|(e, _)| e.split_hierarchy().last().cloned().unwrap())
            .collect();
        assert_eq!(group_ids.len(), 1);
        let ids: std::collections::HashSet<_> = queue.iter().map(|(e, _)| e.id().to_string()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn aggregate_without_split_history_collapses_single_exchange() {
        let step = Step::Aggregate(
            (|exchanges: &[Exchange]| Ok(Value::from(exchanges.len() as i64))).into_aggregator(),
        );
        let mut queue = VecDeque::new();
        step.execute("r", exchange(Value::Null), no_rest(), &mut queue)
            .await
            .unwrap();
        let (out, _) = queue.pop_front().unwrap();
        assert_eq!(out.body(), &Value::from(1));
        assert!(out.split_hierarchy().is_empty());
    }

    #[tokio::test]
    async fn to_step_propagates_a_destinations_own_structured_error_code() {
        let step = Step::To(
            (|_ex: &Exchange| {
                Box::pin(async {
                    let structured = RouteCraftError::DirectSchemaValidation {
                        endpoint: "orders".to_string(),
                        reason: "missing field 'id'".to_string(),
                    };
                    Err(Box::new(structured) as Box<dyn std::error::Error + Send + Sync>)
                }) as SendFuture
            })
            .into_destination(),
        );
        let mut queue = VecDeque::new();
        let result = step.execute("r", exchange(Value::Null), no_rest(), &mut queue).await;
        assert_eq!(result.unwrap_err().code(), "direct-schema-validation");
    }

    #[tokio::test]
    async fn to_step_wraps_an_unstructured_destination_error_as_to_error() {
        let step = Step::To(
            (|_ex: &Exchange| Box::pin(async { Err(step_error("disk full")) }) as SendFuture).into_destination(),
        );
        let mut queue = VecDeque::new();
        let result = step.execute("r", exchange(Value::Null), no_rest(), &mut queue).await;
        assert_eq!(result.unwrap_err().code(), "to-error");
    }

    #[tokio::test]
    async fn aggregate_collects_only_its_own_split_group_and_leaves_others() {
        let splitter = Step::Split(
            (|body: &Value| Ok(body.as_array().cloned().unwrap_or_default())).into_splitter(),
        );
        let mut queue = VecDeque::new();
        splitter
            .execute("r", exchange(serde_json::json!([1, 2])), no_rest(), &mut queue)
            .await
            .unwrap();

        // An unrelated exchange (no split ancestry) sitting in the same local queue
        // must never be swept into someone else's aggregate group.
        queue.push_back((exchange(Value::from("unrelated")), no_rest()));

        let (first_child, rest) = queue.pop_front().unwrap();
        let aggregator = Step::Aggregate(
            (|exchanges: &[Exchange]| {
                let sum: i64 = exchanges.iter().filter_map(|e| e.body().as_i64()).sum();
                Ok(Value::from(sum))
            })
            .into_aggregator(),
        );
        aggregator
            .execute("r", first_child, rest, &mut queue)
            .await
            .unwrap();

        assert_eq!(queue.len(), 2);
        let bodies: Vec<_> = queue.iter().map(|(e, _)| e.body().clone()).collect();
        assert!(bodies.contains(&Value::from(3)));
        assert!(bodies.contains(&Value::from("unrelated")));
    }
}
