//! # routecraft-core
//!
//! Execution engine for Routecraft, an integration routing runtime: small,
//! independent routes — each a source plus an ordered pipeline of processing
//! steps and terminal sinks — run concurrently inside a shared [`Context`],
//! with lifecycle, correlation, fan-out/fan-in, error isolation and
//! pluggable in-process message channels.
//!
//! ## Layout
//!
//! - [`exchange`] — the message envelope ([`Exchange`])
//! - [`step`] — pipeline operations (process/transform/tap/to/split/aggregate/filter)
//! - [`queue`] — per-route buffered single-handler processing queue
//! - [`channel`] — named pub/sub message bus
//! - [`consumer`] — bridges a route's queue to its pipeline driver, simple or batching
//! - [`route`] — a live route: source, pipeline, cancellation token, lifecycle
//! - [`registry`] — the direct endpoint registry (one name, one consumer)
//! - [`store`] — the context's typed shared store
//! - [`event`] — the lifecycle/error event bus
//! - [`context`] — the supervisor tying the above together
//! - [`builder`] — fluent route construction
//! - [`error`] — the structured, coded error type
//! - [`logger`] — the tracing-backed logging capability
//!
//! ## Example
//!
//! ```rust,no_run
//! use routecraft_core::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let context = Context::new("demo");
//! let definitions = Builder::new()
//!     .from(|_ctx, _emit, _token| -> routecraft_core::route::SourceCompletion {
//!         Box::pin(async { Ok(()) })
//!     })
//!     .transform(|body: &serde_json::Value| body.clone())?
//!     .build();
//! context.register_routes(definitions).await?;
//! context.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod channel;
pub mod consumer;
pub mod context;
pub mod error;
pub mod event;
pub mod exchange;
pub mod logger;
pub mod queue;
pub mod registry;
pub mod route;
pub mod step;
pub mod store;

pub use builder::Builder;
pub use context::{Context, ContextOptions};
pub use error::{Result, RouteCraftError};
pub use event::{ErrorOrigin, Event, EventBus, EventKind, EventObserver};
pub use exchange::{Exchange, HeaderValue, Operation};
pub use logger::ScopedLogger;
pub use route::{IntoSource, Route, RouteDefinition, RoutePhase, Source};
pub use step::{Step, StepKind};

/// Convenience re-exports for the common import set a route definition needs.
pub mod prelude {
    pub use crate::builder::Builder;
    pub use crate::context::Context;
    pub use crate::error::{Result, RouteCraftError};
    pub use crate::exchange::{Exchange, HeaderValue, Operation};
    pub use crate::route::{IntoSource, Source};
    pub use crate::step::{
        IntoAggregator, IntoDestination, IntoFilter, IntoProcessor, IntoSplitter, IntoTap,
        IntoTransformer,
    };
}
