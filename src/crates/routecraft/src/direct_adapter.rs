//! Direct-endpoint-backed `Source`/`Destination`: one name, one consuming route.
//!
//! Grounded on `routecraft_core::registry::DirectRegistry`. Unlike the channel
//! adapter, registration itself can fail (`direct-duplicate-endpoint`), which
//! surfaces as the route's start-time error.

use std::sync::Arc;

use routecraft_core::context::Context;
use routecraft_core::error::RouteCraftError;
use routecraft_core::exchange::Exchange;
use routecraft_core::registry::{EndpointMetadata, EndpointTarget};
use routecraft_core::route::{EmitFn, Source, SourceCompletion};
use routecraft_core::step::{BoxFuture, Destination};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A route source registered as the sole consumer of a direct endpoint.
pub struct DirectSource {
    name: String,
    schema: Option<Value>,
    metadata: EndpointMetadata,
}

impl DirectSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            metadata: EndpointMetadata::default(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_metadata(mut self, metadata: EndpointMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl Source for DirectSource {
    fn subscribe(&self, context: Arc<Context>, emit: EmitFn, cancellation: CancellationToken) -> SourceCompletion {
        let name = self.name.clone();
        let schema = self.schema.clone();
        let metadata = self.metadata.clone();
        Box::pin(async move {
            let handler_emit = emit.clone();
            let handler = Arc::new(move |body: Value| {
                let emit = handler_emit.clone();
                Box::pin(async move {
                    emit(body, None).await;
                    Ok(())
                }) as BoxFuture<'static, Result<(), Box<dyn std::error::Error + Send + Sync>>>
            });
            context
                .direct_registry()
                .register(name.clone(), handler, schema, metadata)
                .await
                .map_err(box_error)?;
            cancellation.cancelled().await;
            context.direct_registry().unregister(&name).await;
            Ok(())
        })
    }
}

/// A route destination that delivers to a direct endpoint, either fixed or
/// resolved per-exchange from the body.
pub struct DirectDestination {
    context: Arc<Context>,
    target: EndpointTarget,
}

impl DirectDestination {
    pub fn new(context: Arc<Context>, target: impl Into<EndpointTarget>) -> Self {
        Self {
            context,
            target: target.into(),
        }
    }
}

impl Destination for DirectDestination {
    fn send(&self, exchange: &Exchange) -> BoxFuture<'_, Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        let body = exchange.body().clone();
        Box::pin(async move {
            self.context
                .direct_registry()
                .send(&self.target, body)
                .await
                .map_err(box_error)
        })
    }
}

fn box_error(error: RouteCraftError) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(error)
}
