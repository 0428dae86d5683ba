//! Direct endpoint registry: one name, one consuming route.
//!
//! A direct endpoint behaves like a named function call rather than a pub/sub
//! channel — a source registers the single handler that owns the name, and
//! every destination that sends to it invokes that handler directly. Optional
//! schema metadata lets a destination validate a body before delivery.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::RouteCraftError;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send + 'a>>;

/// The handler a direct endpoint's registering route installs.
pub type DirectHandler = Arc<dyn Fn(Value) -> BoxFuture<'static> + Send + Sync>;

/// Discovery metadata attached at registration, not interpreted by the core.
#[derive(Debug, Clone, Default)]
pub struct EndpointMetadata {
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

/// One registered direct endpoint.
pub struct DirectEndpoint {
    pub name: String,
    pub handler: DirectHandler,
    pub schema: Option<Value>,
    pub metadata: EndpointMetadata,
}

impl DirectEndpoint {
    /// Validate `body` against this endpoint's schema, if one is configured.
    /// Without the `schema-validation` feature only presence is checked; with
    /// it, full JSON Schema validation runs via `jsonschema`.
    pub fn validate(&self, body: &Value) -> Result<(), RouteCraftError> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };

        #[cfg(feature = "schema-validation")]
        {
            let compiled = jsonschema::JSONSchema::compile(schema).map_err(|e| {
                RouteCraftError::DirectSchemaValidation {
                    endpoint: self.name.clone(),
                    reason: format!("invalid schema: {e}"),
                }
            })?;
            if let Err(errors) = compiled.validate(body) {
                let reason = errors
                    .map(|e| format!("{}: {}", e.instance_path, e))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(RouteCraftError::DirectSchemaValidation {
                    endpoint: self.name.clone(),
                    reason,
                });
            }
        }

        #[cfg(not(feature = "schema-validation"))]
        {
            let _ = body;
        }

        Ok(())
    }
}

impl std::fmt::Debug for DirectEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectEndpoint")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Resolves which endpoint a destination targets; either a fixed name or a
/// function of the exchange body.
pub enum EndpointTarget {
    Fixed(String),
    Dynamic(Arc<dyn Fn(&Value) -> String + Send + Sync>),
}

impl EndpointTarget {
    pub fn resolve(&self, body: &Value) -> String {
        match self {
            EndpointTarget::Fixed(name) => name.clone(),
            EndpointTarget::Dynamic(resolver) => resolver(body),
        }
    }
}

impl From<&str> for EndpointTarget {
    fn from(value: &str) -> Self {
        EndpointTarget::Fixed(value.to_string())
    }
}
impl From<String> for EndpointTarget {
    fn from(value: String) -> Self {
        EndpointTarget::Fixed(value)
    }
}

/// One endpoint name maps to at most one consumer.
#[derive(Default)]
pub struct DirectRegistry {
    endpoints: RwLock<HashMap<String, DirectEndpoint>>,
}

impl DirectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source-role registration. Fails if `name` already has a consumer.
    pub async fn register(
        &self,
        name: impl Into<String>,
        handler: DirectHandler,
        schema: Option<Value>,
        metadata: EndpointMetadata,
    ) -> Result<(), RouteCraftError> {
        let name = name.into();
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(&name) {
            return Err(RouteCraftError::DirectDuplicateEndpoint { endpoint: name });
        }
        endpoints.insert(
            name.clone(),
            DirectEndpoint {
                name,
                handler,
                schema,
                metadata,
            },
        );
        Ok(())
    }

    /// Remove the named endpoint, if any. Called on route stop.
    pub async fn unregister(&self, name: &str) {
        self.endpoints.write().await.remove(name);
    }

    pub async fn has_consumer(&self, name: &str) -> bool {
        self.endpoints.read().await.contains_key(name)
    }

    pub async fn metadata(&self, name: &str) -> Option<EndpointMetadata> {
        self.endpoints.read().await.get(name).map(|e| e.metadata.clone())
    }

    pub async fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.read().await.keys().cloned().collect()
    }

    /// Destination-role delivery: resolve `target` against `body`, validate
    /// against the endpoint's schema if any, then invoke its handler.
    pub async fn send(&self, target: &EndpointTarget, body: Value) -> Result<(), RouteCraftError> {
        let name = target.resolve(&body);
        let handler = {
            let endpoints = self.endpoints.read().await;
            let endpoint = endpoints
                .get(&name)
                .ok_or_else(|| RouteCraftError::DirectNoConsumer { endpoint: name.clone() })?;
            endpoint.validate(&body)?;
            endpoint.handler.clone()
        };
        handler(body).await.map_err(|cause| RouteCraftError::ToError {
            route_id: name.clone(),
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::cause_from_display;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_handler(seen: Arc<AtomicUsize>) -> DirectHandler {
        Arc::new(move |_body| {
            let seen = seen.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn send_invokes_the_registered_handler() {
        let registry = DirectRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        registry
            .register("orders", echo_handler(seen.clone()), None, EndpointMetadata::default())
            .await
            .unwrap();

        registry.send(&"orders".into(), Value::from(1)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_fails_on_duplicate_name() {
        let registry = DirectRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        registry
            .register("orders", echo_handler(seen.clone()), None, EndpointMetadata::default())
            .await
            .unwrap();
        let result = registry
            .register("orders", echo_handler(seen), None, EndpointMetadata::default())
            .await;
        assert!(matches!(result, Err(RouteCraftError::DirectDuplicateEndpoint { .. })));
    }

    #[tokio::test]
    async fn send_without_a_consumer_fails() {
        let registry = DirectRegistry::new();
        let result = registry.send(&"nobody".into(), Value::Null).await;
        assert!(matches!(result, Err(RouteCraftError::DirectNoConsumer { .. })));
    }

    #[tokio::test]
    async fn unregister_makes_the_name_available_again() {
        let registry = DirectRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        registry
            .register("orders", echo_handler(seen.clone()), None, EndpointMetadata::default())
            .await
            .unwrap();
        registry.unregister("orders").await;
        assert!(!registry.has_consumer("orders").await);
        registry
            .register("orders", echo_handler(seen), None, EndpointMetadata::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_propagates_handler_failure_as_to_error() {
        let registry = DirectRegistry::new();
        let handler: DirectHandler = Arc::new(|_body| Box::pin(async { Err(cause_from_display("boom")) }));
        registry
            .register("orders", handler, None, EndpointMetadata::default())
            .await
            .unwrap();
        let result = registry.send(&"orders".into(), Value::Null).await;
        assert!(matches!(result, Err(RouteCraftError::ToError { .. })));
    }

    #[tokio::test]
    async fn dynamic_target_resolves_per_message() {
        let registry = DirectRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        registry
            .register("route-a", echo_handler(seen.clone()), None, EndpointMetadata::default())
            .await
            .unwrap();
        let target = EndpointTarget::Dynamic(Arc::new(|body: &Value| {
            body["target"].as_str().unwrap_or_default().to_string()
        }));
        registry
            .send(&target, serde_json::json!({"target": "route-a"}))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
