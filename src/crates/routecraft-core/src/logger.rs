//! The logger-as-capability the core depends on.
//!
//! The core never talks to a concrete logging backend. Every [`Context`](crate::context::Context),
//! [`Route`](crate::route::Route) and [`Exchange`](crate::exchange::Exchange) owns a
//! [`ScopedLogger`], a thin `{ debug, info, warn, error }` wrapper around a `tracing::Span`
//! that is a child of its parent's span. Concrete log formatting/sinking is whatever the
//! process installs as a `tracing` subscriber at the program boundary.

use std::fmt::Display;

use tracing::Span;

/// A `tracing`-backed logging capability scoped to a context, route or exchange.
#[derive(Debug, Clone)]
pub struct ScopedLogger {
    span: Span,
}

impl ScopedLogger {
    /// Wrap an existing span.
    pub fn from_span(span: Span) -> Self {
        Self { span }
    }

    /// Create the root logger for a context.
    pub fn for_context(context_id: &str) -> Self {
        Self::from_span(tracing::info_span!("context", context_id = %context_id))
    }

    /// Derive a child logger scoped to a route.
    pub fn for_route(&self, route_id: &str) -> Self {
        let span = tracing::info_span!(parent: &self.span, "route", route_id = %route_id);
        Self::from_span(span)
    }

    /// Derive a child logger scoped to one exchange's flow through the pipeline.
    pub fn for_exchange(&self, exchange_id: &str, correlation_id: &str) -> Self {
        let span = tracing::debug_span!(
            parent: &self.span,
            "exchange",
            exchange_id = %exchange_id,
            correlation_id = %correlation_id,
        );
        Self::from_span(span)
    }

    /// The underlying span, for callers that want to enter it directly.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn debug(&self, message: impl Display) {
        let _enter = self.span.enter();
        tracing::debug!("{message}");
    }

    pub fn info(&self, message: impl Display) {
        let _enter = self.span.enter();
        tracing::info!("{message}");
    }

    pub fn warn(&self, message: impl Display) {
        let _enter = self.span.enter();
        tracing::warn!("{message}");
    }

    pub fn error(&self, message: impl Display) {
        let _enter = self.span.enter();
        tracing::error!("{message}");
    }
}

impl Default for ScopedLogger {
    fn default() -> Self {
        Self::from_span(Span::none())
    }
}
