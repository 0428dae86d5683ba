//! Named in-process pub/sub bus used by the channel and direct adapters.
//!
//! Channels are allocated lazily on first `subscribe` or `send`. Names are
//! normalized by collapsing every non-alphanumeric character to `-` so that
//! `"order.created"`, `"order created"` and `"order-created"` all address the
//! same channel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::logger::ScopedLogger;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A channel subscriber. Takes the message body; failures are logged and
/// contained by the channel, never propagated to the sender.
pub type Subscriber = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static> + Send + Sync>;

/// Collapse every non-alphanumeric byte to `-`.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect()
}

struct ChannelState {
    subscribers: Vec<Subscriber>,
}

/// The named pub/sub fabric. One instance is normally shared across a context
/// via the typed store, but it carries no context-specific state itself.
#[derive(Default)]
pub struct MessageChannel {
    channels: RwLock<HashMap<String, ChannelState>>,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to `name`'s subscriber list, creating the channel if needed.
    pub async fn subscribe(&self, name: &str, handler: Subscriber) {
        let name = normalize_name(name);
        let mut channels = self.channels.write().await;
        channels
            .entry(name)
            .or_insert_with(|| ChannelState {
                subscribers: Vec::new(),
            })
            .subscribers
            .push(handler);
    }

    /// Remove every handler registered under `name`.
    pub async fn unsubscribe(&self, name: &str) {
        let name = normalize_name(name);
        let mut channels = self.channels.write().await;
        if let Some(state) = channels.get_mut(&name) {
            state.subscribers.clear();
        }
    }

    /// Deliver `message` to every current subscriber of `name`, concurrently.
    /// Completes once every subscriber has completed or failed; a panicking
    /// subscriber is logged and skipped, the rest still run.
    pub async fn send(&self, name: &str, message: serde_json::Value, logger: &ScopedLogger) {
        let name = normalize_name(name);
        let subscribers = {
            let channels = self.channels.read().await;
            match channels.get(&name) {
                Some(state) => state.subscribers.clone(),
                None => return,
            }
        };
        let tasks = subscribers.into_iter().map(|subscriber| {
            let message = message.clone();
            async move {
                let result = tokio::spawn(async move {
                    subscriber(message).await;
                })
                .await;
                if let Err(join_error) = result {
                    Err(join_error)
                } else {
                    Ok(())
                }
            }
        });
        let results = futures::future::join_all(tasks).await;
        for result in results {
            if let Err(join_error) = result {
                logger.error(format!("channel '{name}' subscriber panicked: {join_error}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn normalize_collapses_punctuation_and_spaces() {
        assert_eq!(normalize_name("order.created"), "order-created");
        assert_eq!(normalize_name("order created"), "order-created");
        assert_eq!(normalize_name("order-created"), "order-created");
    }

    #[tokio::test]
    async fn send_fans_out_to_every_subscriber() {
        let channel = MessageChannel::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        for counter in [a.clone(), b.clone()] {
            channel
                .subscribe(
                    "orders",
                    Arc::new(move |_msg| {
                        let counter = counter.clone();
                        Box::pin(async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                    }),
                )
                .await;
        }

        channel
            .send("orders", serde_json::json!(1), &ScopedLogger::default())
            .await;

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_to_unknown_channel_is_a_no_op() {
        let channel = MessageChannel::new();
        channel
            .send("nobody-home", serde_json::json!(1), &ScopedLogger::default())
            .await;
    }

    #[tokio::test]
    async fn unsubscribe_clears_future_deliveries() {
        let channel = MessageChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        channel
            .subscribe(
                "orders",
                Arc::new(move |_msg| {
                    let counted = counted.clone();
                    Box::pin(async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;
        channel.unsubscribe("orders").await;
        channel
            .send("orders", serde_json::json!(1), &ScopedLogger::default())
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_panicking_subscriber_does_not_stop_its_peers() {
        let channel = MessageChannel::new();
        channel
            .subscribe("orders", Arc::new(|_msg| Box::pin(async { panic!("boom") })))
            .await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        channel
            .subscribe(
                "orders",
                Arc::new(move |_msg| {
                    let counted = counted.clone();
                    Box::pin(async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        channel
            .send("orders", serde_json::json!(1), &ScopedLogger::default())
            .await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
