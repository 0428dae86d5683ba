//! Fluent construction of route definitions.
//!
//! The builder accumulates steps into a *pending* route and materializes a
//! [`RouteDefinition`] only when the next `from` appears (or on `build`).
//! `id` and `batch` stage options for the *next* route, not the current one.

use std::sync::Arc;

use serde_json::Value;

use crate::consumer::BatchOptions;
use crate::error::RouteCraftError;
use crate::route::{ConsumerDescriptor, IntoSource, RouteDefinition, Source};
use crate::step::{
    Aggregator, Destination, Filter, IntoAggregator, IntoDestination, IntoFilter, IntoProcessor,
    IntoSplitter, IntoTap, IntoTransformer, Processor, Splitter, Step, Tap, Transformer,
};

struct PendingRoute {
    id: String,
    source: Arc<dyn Source>,
    steps: Vec<Step>,
    consumer: ConsumerDescriptor,
}

/// Builds a set of [`RouteDefinition`]s for later registration with a [`Context`](crate::context::Context).
#[derive(Default)]
pub struct Builder {
    staged_id: Option<String>,
    staged_batch: Option<BatchOptions>,
    current: Option<PendingRoute>,
    finished: Vec<RouteDefinition>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an id for the next route created by `from`. Does not affect the
    /// route currently being built.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.staged_id = Some(id.into());
        self
    }

    /// Stage a [`BatchOptions`] for the next route created by `from`. Cleared
    /// once that route starts being built.
    pub fn batch(mut self, options: BatchOptions) -> Self {
        self.staged_batch = Some(options);
        self
    }

    /// Begin a new route. Finalizes whatever route was previously pending.
    /// Uses the staged id if one was set via [`Builder::id`], otherwise
    /// allocates a fresh one; same for the staged batch options.
    pub fn from(mut self, source: impl IntoSource) -> Self {
        self.finish_pending();
        let id = self.staged_id.take().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let consumer = match self.staged_batch.take() {
            Some(options) => ConsumerDescriptor::Batch(options),
            None => ConsumerDescriptor::Simple,
        };
        self.current = Some(PendingRoute {
            id,
            source: source.into_source(),
            steps: Vec::new(),
            consumer,
        });
        self
    }

    fn finish_pending(&mut self) {
        if let Some(pending) = self.current.take() {
            self.finished.push(RouteDefinition {
                id: pending.id,
                source: pending.source,
                steps: Arc::from(pending.steps),
                consumer: pending.consumer,
            });
        }
    }

    fn push_step(&mut self, step: Step) -> Result<(), RouteCraftError> {
        match &mut self.current {
            Some(pending) => {
                pending.steps.push(step);
                Ok(())
            }
            None => Err(RouteCraftError::MissingFrom),
        }
    }

    pub fn process(mut self, processor: impl IntoProcessor) -> Result<Self, RouteCraftError> {
        let step = Step::Process(processor.into_processor());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn processor(self, processor: Arc<dyn Processor>) -> Result<Self, RouteCraftError> {
        self.process(processor)
    }

    pub fn transform(mut self, transformer: impl IntoTransformer) -> Result<Self, RouteCraftError> {
        let step = Step::Transform(transformer.into_transformer());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn transformer(self, transformer: Arc<dyn Transformer>) -> Result<Self, RouteCraftError> {
        self.transform(transformer)
    }

    pub fn tap(mut self, tap: impl IntoTap) -> Result<Self, RouteCraftError> {
        let step = Step::Tap(tap.into_tap());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn tap_observer(self, tap: Arc<dyn Tap>) -> Result<Self, RouteCraftError> {
        self.tap(tap)
    }

    pub fn filter(mut self, predicate: impl IntoFilter) -> Result<Self, RouteCraftError> {
        let step = Step::Filter(predicate.into_filter());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn filter_predicate(self, predicate: Arc<dyn Filter>) -> Result<Self, RouteCraftError> {
        self.filter(predicate)
    }

    pub fn split(mut self, splitter: impl IntoSplitter) -> Result<Self, RouteCraftError> {
        let step = Step::Split(splitter.into_splitter());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn splitter(self, splitter: Arc<dyn Splitter>) -> Result<Self, RouteCraftError> {
        self.split(splitter)
    }

    pub fn aggregate(mut self, aggregator: impl IntoAggregator) -> Result<Self, RouteCraftError> {
        let step = Step::Aggregate(aggregator.into_aggregator());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn aggregator(self, aggregator: Arc<dyn Aggregator>) -> Result<Self, RouteCraftError> {
        self.aggregate(aggregator)
    }

    pub fn to(mut self, destination: impl IntoDestination) -> Result<Self, RouteCraftError> {
        let step = Step::To(destination.into_destination());
        self.push_step(step)?;
        Ok(self)
    }

    pub fn destination(self, destination: Arc<dyn Destination>) -> Result<Self, RouteCraftError> {
        self.to(destination)
    }

    /// Materialize every route accumulated so far, including the one still pending.
    pub fn build(mut self) -> Vec<RouteDefinition> {
        self.finish_pending();
        self.finished
    }
}

/// Placeholder body used by tests and examples wiring a `transform` step
/// that only needs the identity function.
pub fn identity_transform(body: &Value) -> Value {
    body.clone()
}
