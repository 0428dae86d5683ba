//! The message envelope that flows through one invocation of a route's pipeline.
//!
//! An [`Exchange`] is immutable by convention: every step produces a new `Exchange`
//! (via one of the `derive_*` constructors below) rather than mutating the one it
//! received. `id` and `correlation_id` follow the invariants in the data model: `id`
//! is regenerated on split and preserved everywhere else; `correlation_id` is
//! preserved across every derivation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::logger::ScopedLogger;

/// A scalar header value. Routecraft headers intentionally do not accept
/// arbitrary structured data — that belongs in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    String(String),
    Number(f64),
    Bool(bool),
    #[serde(serialize_with = "serialize_undefined")]
    Undefined,
}

fn serialize_undefined<S: serde::Serializer>(s: S) -> Result<S::Ok, S::Error> {
    s.serialize_none()
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}
impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}
impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Number(value)
    }
}
impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Number(value as f64)
    }
}
impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::String(s) => f.write_str(s),
            HeaderValue::Number(n) => write!(f, "{n}"),
            HeaderValue::Bool(b) => write!(f, "{b}"),
            HeaderValue::Undefined => f.write_str("undefined"),
        }
    }
}

/// The pipeline-operation tag written to the reserved `operation` header.
///
/// `From` marks the initial exchange produced by a consumer; the remaining
/// variants mirror [`crate::step::StepKind`] and are set by the pipeline
/// driver immediately before invoking the corresponding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    From,
    Process,
    To,
    Split,
    Aggregate,
    Transform,
    Tap,
    Filter,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::From => "FROM",
            Operation::Process => "PROCESS",
            Operation::To => "TO",
            Operation::Split => "SPLIT",
            Operation::Aggregate => "AGGREGATE",
            Operation::Transform => "TRANSFORM",
            Operation::Tap => "TAP",
            Operation::Filter => "FILTER",
        };
        f.write_str(s)
    }
}

/// Optional overrides accepted by [`Exchange::new`]; any field left `None`/empty
/// is filled with a fresh identifier or empty value.
#[derive(Debug, Clone, Default)]
pub struct ExchangeInit {
    pub id: Option<String>,
    pub headers: HashMap<String, HeaderValue>,
    pub body: Option<Value>,
}

/// The message envelope. See the module docs for the mutability convention.
#[derive(Clone)]
pub struct Exchange {
    id: String,
    route: Option<String>,
    operation: Option<Operation>,
    correlation_id: String,
    adapter: Option<String>,
    split_hierarchy: Vec<String>,
    headers: HashMap<String, HeaderValue>,
    body: Value,
    logger: ScopedLogger,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("operation", &self.operation)
            .field("correlation_id", &self.correlation_id)
            .field("split_hierarchy", &self.split_hierarchy)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

impl Exchange {
    /// Construct a fresh exchange. Any field left unset in `init` is filled with a
    /// fresh unique identifier or an empty value; caller-supplied headers override
    /// the defaults for their own keys. `route` and `operation` are left unset here —
    /// the consumer and pipeline driver apply those.
    pub fn new(logger: ScopedLogger, init: ExchangeInit) -> Self {
        let id = init.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let correlation_id = match init.headers.get("correlation_id") {
            Some(HeaderValue::String(s)) => s.clone(),
            _ => Uuid::new_v4().to_string(),
        };
        Self {
            id,
            route: None,
            operation: None,
            correlation_id,
            adapter: None,
            split_hierarchy: Vec::new(),
            headers: init.headers,
            body: init.body.unwrap_or(Value::Null),
            logger,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref()
    }

    pub fn split_hierarchy(&self) -> &[String] {
        &self.split_hierarchy
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    pub fn headers(&self) -> &HashMap<String, HeaderValue> {
        &self.headers
    }

    pub fn logger(&self) -> &ScopedLogger {
        &self.logger
    }

    /// Set a non-reserved header. Used by adapters; the core itself only ever
    /// writes the reserved keys through the typed setters below.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Set the `route` reserved header. The consumer calls this once when it
    /// builds the initial exchange; the route never mutates within the pipeline.
    pub fn set_route(&mut self, route_id: impl Into<String>) {
        self.route = Some(route_id.into());
    }

    /// Set the `operation` reserved header. Called by the pipeline driver
    /// immediately before each step's `execute`.
    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = Some(operation);
    }

    pub fn set_adapter(&mut self, adapter: impl Into<String>) {
        self.adapter = Some(adapter.into());
    }

    /// Derive a new exchange with a different body, preserving id, route,
    /// correlation id and split hierarchy. Used by `process`/`transform`/`to`.
    pub fn with_body(&self, body: Value) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }

    /// Deep-copy this exchange for a `tap` observer. Mutations the observer makes
    /// to the returned clone never reach the pipeline.
    pub fn tap_copy(&self) -> Self {
        self.clone()
    }

    /// Produce one split child: a fresh id, the parent's hierarchy plus `group_id`.
    pub fn split_child(&self, body: Value, group_id: &str) -> Self {
        let mut hierarchy = self.split_hierarchy.clone();
        hierarchy.push(group_id.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            split_hierarchy: hierarchy,
            body,
            ..self.clone()
        }
    }

    /// Produce an aggregate's output: the innermost hierarchy element is popped.
    pub fn aggregated(&self, body: Value) -> Self {
        let mut hierarchy = self.split_hierarchy.clone();
        hierarchy.pop();
        Self {
            split_hierarchy: hierarchy,
            body,
            ..self.clone()
        }
    }
}
