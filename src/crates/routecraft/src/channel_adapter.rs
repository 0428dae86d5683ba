//! Channel-backed `Source`/`Destination`: routes a message through a named,
//! in-process pub/sub channel kept in the context's typed store.
//!
//! Grounded directly on `routecraft_core::channel::MessageChannel`; this
//! module's only job is giving that channel the two capability shapes a route
//! definition needs. Both ends resolve the same channel instance through the
//! context's store, keyed by name, so a source in one route and a
//! destination in another see the same subscriber list.

use std::sync::Arc;

use routecraft_core::channel::MessageChannel;
use routecraft_core::context::Context;
use routecraft_core::exchange::Exchange;
use routecraft_core::route::{EmitFn, Source, SourceCompletion};
use routecraft_core::step::{BoxFuture, Destination};
use tokio_util::sync::CancellationToken;

fn store_key(name: &str) -> String {
    format!("routecraft.channel.{name}")
}

async fn channel_for(context: &Context, name: &str) -> Arc<MessageChannel> {
    context
        .store()
        .get_or_insert_with(&store_key(name), MessageChannel::new)
        .await
}

/// A route source backed by a named channel: every message sent to `name`
/// becomes this route's next emission.
pub struct ChannelSource {
    name: String,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Source for ChannelSource {
    fn subscribe(&self, context: Arc<Context>, emit: EmitFn, cancellation: CancellationToken) -> SourceCompletion {
        let name = self.name.clone();
        Box::pin(async move {
            let channel = channel_for(&context, &name).await;
            let subscriber_emit = emit.clone();
            channel
                .subscribe(
                    &name,
                    Arc::new(move |body| {
                        let emit = subscriber_emit.clone();
                        Box::pin(async move {
                            emit(body, None).await;
                        })
                    }),
                )
                .await;
            cancellation.cancelled().await;
            channel.unsubscribe(&name).await;
            Ok(())
        })
    }
}

/// A route destination that publishes the exchange body to a named channel.
/// Holds the context it was built against, since `send` on its own carries no
/// context handle.
pub struct ChannelDestination {
    context: Arc<Context>,
    name: String,
}

impl ChannelDestination {
    pub fn new(context: Arc<Context>, name: impl Into<String>) -> Self {
        Self {
            context,
            name: name.into(),
        }
    }
}

impl Destination for ChannelDestination {
    fn send(&self, exchange: &Exchange) -> BoxFuture<'_, Result<(), Box<dyn std::error::Error + Send + Sync>>> {
        let name = self.name.clone();
        let body = exchange.body().clone();
        let logger = exchange.logger().clone();
        let context = self.context.clone();
        Box::pin(async move {
            let channel = channel_for(&context, &name).await;
            channel.send(&name, body, &logger).await;
            Ok(())
        })
    }
}
