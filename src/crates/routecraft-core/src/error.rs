//! Error types for route construction, startup and per-message execution.
//!
//! Every error the core raises carries one of the stable codes documented
//! in the crate's design notes (`missing-from`, `duplicate-route-id`,
//! `process-error`, ...). The code is stable for programmatic matching;
//! the `Display` text and the wrapped cause chain are for diagnostics only.
//!
//! # Error taxonomy
//!
//! - Build-time errors ([`RouteCraftError::MissingFrom`], [`RouteCraftError::DuplicateRouteId`])
//!   are raised synchronously from the builder and surfaced to the caller.
//! - Start-time errors ([`RouteCraftError::RouteCannotStart`]) abort the affected route only.
//! - Per-message step errors ([`RouteCraftError::ProcessError`] and friends) are logged at
//!   exchange scope and surfaced via the event bus; the route keeps running.
//! - Direct-registry errors ([`RouteCraftError::DirectDuplicateEndpoint`],
//!   [`RouteCraftError::DirectNoConsumer`], [`RouteCraftError::DirectSchemaValidation`]) are
//!   raised at registration or delivery time.

use std::fmt;

use crate::step::StepKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RouteCraftError>;

/// A boxed, type-erased cause for user-hook failures (a processor, splitter,
/// aggregator, destination, tap, source, or event observer throwing).
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structured, coded, chainable error kind for the Routecraft core.
#[derive(Debug, thiserror::Error)]
pub enum RouteCraftError {
    /// A step-builder method was called before the first `from` on the route builder.
    #[error("route builder method called before `from`")]
    MissingFrom,

    /// `Route::start` was called on a route whose cancellation token was already aborted.
    #[error("route '{route_id}' cannot start: its cancellation token is already aborted")]
    RouteCannotStart {
        /// The route that failed to start.
        route_id: String,
    },

    /// Two routes were registered with the same id, either against each other or
    /// against an already-registered route.
    #[error("duplicate route id '{route_id}'")]
    DuplicateRouteId {
        /// The id that collided.
        route_id: String,
    },

    /// A header carried an `operation` value outside the known set
    /// (FROM, PROCESS, TO, SPLIT, AGGREGATE, TRANSFORM, TAP, FILTER).
    #[error("invalid operation header value '{operation}'")]
    InvalidOperation {
        /// The offending value.
        operation: String,
    },

    /// A step raised an error of a kind the driver does not special-case.
    #[error("unknown error in route '{route_id}': {cause}")]
    Unknown {
        /// The route on which the error occurred.
        route_id: String,
        /// The underlying cause.
        #[source]
        cause: Cause,
    },

    /// A `process` step's function returned an error.
    #[error("process step failed in route '{route_id}': {cause}")]
    ProcessError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// A `to` destination's `send` returned an error.
    #[error("to step failed in route '{route_id}': {cause}")]
    ToError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// A `split` step's splitter function returned an error.
    #[error("split step failed in route '{route_id}': {cause}")]
    SplitError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// An `aggregate` step's aggregator function returned an error.
    #[error("aggregate step failed in route '{route_id}': {cause}")]
    AggregateError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// A `transform` step's function panicked or returned an error.
    #[error("transform step failed in route '{route_id}': {cause}")]
    TransformError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// A `tap` step's observer function returned an error. Always suppressed by
    /// the driver after being logged and surfaced as an `error` event.
    #[error("tap step failed in route '{route_id}': {cause}")]
    TapError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// A `filter` step's predicate returned an error (as opposed to `false`,
    /// which is a normal drop and not an error).
    #[error("filter step failed in route '{route_id}': {cause}")]
    FilterError {
        route_id: String,
        #[source]
        cause: Cause,
    },

    /// A source route tried to register on a direct endpoint that already has a consumer.
    #[error("direct endpoint '{endpoint}' already has a registered consumer")]
    DirectDuplicateEndpoint {
        /// The endpoint name.
        endpoint: String,
    },

    /// A destination tried to send to a direct endpoint with no registered consumer.
    #[error("direct endpoint '{endpoint}' has no registered consumer")]
    DirectNoConsumer {
        /// The endpoint name.
        endpoint: String,
    },

    /// A direct endpoint's schema rejected a message body. Stable code `RC5011`.
    #[error("direct endpoint '{endpoint}' rejected message: {reason}")]
    DirectSchemaValidation {
        /// The endpoint name.
        endpoint: String,
        /// Human-readable validation failure.
        reason: String,
    },
}

impl RouteCraftError {
    /// The stable, programmatically-matchable code for this error.
    ///
    /// All codes are kebab-case except [`RouteCraftError::DirectSchemaValidation`],
    /// which additionally carries the numeric identifier `RC5011` per the spec.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFrom => "missing-from",
            Self::RouteCannotStart { .. } => "route-cannot-start",
            Self::DuplicateRouteId { .. } => "duplicate-route-id",
            Self::InvalidOperation { .. } => "invalid-operation",
            Self::Unknown { .. } => "unknown-error",
            Self::ProcessError { .. } => "process-error",
            Self::ToError { .. } => "to-error",
            Self::SplitError { .. } => "split-error",
            Self::AggregateError { .. } => "aggregate-error",
            Self::TransformError { .. } => "transform-error",
            Self::TapError { .. } => "tap-error",
            Self::FilterError { .. } => "filter-error",
            Self::DirectDuplicateEndpoint { .. } => "direct-duplicate-endpoint",
            Self::DirectNoConsumer { .. } => "direct-no-consumer",
            Self::DirectSchemaValidation { .. } => "direct-schema-validation",
        }
    }

    /// The numeric identifier for this error, if the spec assigns one.
    /// Only [`RouteCraftError::DirectSchemaValidation`] has one today (`RC5011`).
    pub fn numeric_code(&self) -> Option<&'static str> {
        match self {
            Self::DirectSchemaValidation { .. } => Some("RC5011"),
            _ => None,
        }
    }

    /// The route this error occurred on, if any.
    pub fn route_id(&self) -> Option<&str> {
        match self {
            Self::RouteCannotStart { route_id }
            | Self::DuplicateRouteId { route_id }
            | Self::Unknown { route_id, .. }
            | Self::ProcessError { route_id, .. }
            | Self::ToError { route_id, .. }
            | Self::SplitError { route_id, .. }
            | Self::AggregateError { route_id, .. }
            | Self::TransformError { route_id, .. }
            | Self::TapError { route_id, .. }
            | Self::FilterError { route_id, .. } => Some(route_id),
            _ => None,
        }
    }

    /// Wrap a user-hook failure as the step-specific error for `kind`, attached to `route_id`.
    pub fn for_step(kind: StepKind, route_id: impl Into<String>, cause: Cause) -> Self {
        let route_id = route_id.into();
        match kind {
            StepKind::Process => Self::ProcessError { route_id, cause },
            StepKind::To => Self::ToError { route_id, cause },
            StepKind::Split => Self::SplitError { route_id, cause },
            StepKind::Aggregate => Self::AggregateError { route_id, cause },
            StepKind::Transform => Self::TransformError { route_id, cause },
            StepKind::Tap => Self::TapError { route_id, cause },
            StepKind::Filter => Self::FilterError { route_id, cause },
        }
    }

    /// Render the full cause chain, one cause per line, for diagnostic output.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

/// Convenience for turning any displayable value into a [`Cause`].
pub fn cause_from_display(value: impl fmt::Display) -> Cause {
    struct DisplayError(String);
    impl fmt::Debug for DisplayError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }
    impl fmt::Display for DisplayError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }
    impl std::error::Error for DisplayError {}
    Box::new(DisplayError(value.to_string()))
}
