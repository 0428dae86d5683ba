//! # routecraft
//!
//! The public face of Routecraft: re-exports the execution engine from
//! `routecraft-core` and adds the two adapters that are in-core concerns per
//! the runtime's design — named channels and the direct endpoint registry.
//! Everything else (timers, HTTP, file I/O, logging sinks) is an external
//! collaborator that only needs to satisfy [`Source`]/[`Destination`].
//!
//! ```rust,no_run
//! use routecraft::prelude::*;
//! use routecraft::{ChannelDestination, ChannelSource};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let context = Context::new("demo");
//! let definitions = Builder::new()
//!     .from(ChannelSource::new("orders"))
//!     .to(ChannelDestination::new(context.clone(), "orders.archived"))?
//!     .build();
//! context.register_routes(definitions).await?;
//! context.start().await?;
//! # Ok(())
//! # }
//! ```

mod channel_adapter;
mod direct_adapter;

pub use channel_adapter::{ChannelDestination, ChannelSource};
pub use direct_adapter::{DirectDestination, DirectSource};

pub use routecraft_core::{
    builder::Builder,
    context::{Context, ContextOptions},
    error::{Result, RouteCraftError},
    event::{ErrorOrigin, Event, EventBus, EventKind, EventObserver},
    exchange::{Exchange, HeaderValue, Operation},
    logger::ScopedLogger,
    route::{IntoSource, Route, RouteDefinition, RoutePhase, Source},
    step::{Step, StepKind},
};

pub mod prelude {
    pub use routecraft_core::prelude::*;
    pub use crate::{ChannelDestination, ChannelSource, DirectDestination, DirectSource};
}
