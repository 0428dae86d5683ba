//! Bridges a route's internal channel to its pipeline driver.
//!
//! Two kinds are offered, selected per route at build time: [`SimpleConsumer`]
//! invokes the pipeline once per message; [`BatchConsumer`] buffers messages and
//! flushes on a size or time threshold, whichever comes first.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::exchange::HeaderValue;
use crate::logger::ScopedLogger;

/// The handler a consumer invokes once it has an exchange-ready `(body, headers)` pair.
pub type ConsumerHandler =
    Arc<dyn Fn(Value, HashMap<String, HeaderValue>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Merge function combining a flushed batch into one logical message.
pub type MergeFn = Arc<dyn Fn(Vec<(Value, HashMap<String, HeaderValue>)>) -> (Value, HashMap<String, HeaderValue>) + Send + Sync>;

/// Options for [`BatchConsumer`]. Defaults: size 1000, time 10s, concatenating merge.
#[derive(Clone)]
pub struct BatchOptions {
    pub size: usize,
    pub time: Duration,
    pub merge: MergeFn,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            size: 1000,
            time: Duration::from_millis(10_000),
            merge: Arc::new(default_merge),
        }
    }
}

fn default_merge(batch: Vec<(Value, HashMap<String, HeaderValue>)>) -> (Value, HashMap<String, HeaderValue>) {
    let mut bodies = Vec::with_capacity(batch.len());
    let mut headers = HashMap::new();
    for (body, msg_headers) in batch {
        bodies.push(body);
        headers.extend(msg_headers);
    }
    (Value::Array(bodies), headers)
}

/// A single-message consumer: every arrival triggers its own pipeline invocation.
pub struct SimpleConsumer {
    handler: Mutex<Option<ConsumerHandler>>,
}

impl Default for SimpleConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleConsumer {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    pub async fn register(&self, handler: ConsumerHandler) {
        *self.handler.lock().await = Some(handler);
    }

    /// Invoked by the route's internal channel subscriber for every arrival.
    pub async fn deliver(&self, body: Value, headers: HashMap<String, HeaderValue>) {
        let handler = self.handler.lock().await.clone();
        if let Some(handler) = handler {
            handler(body, headers).await;
        }
    }
}

struct BatchState {
    buffer: Vec<(Value, HashMap<String, HeaderValue>)>,
    handler: Option<ConsumerHandler>,
    generation: u64,
}

/// A batching consumer: accumulates messages and flushes on size or time,
/// whichever threshold is reached first.
pub struct BatchConsumer {
    options: BatchOptions,
    state: Arc<Mutex<BatchState>>,
    logger: ScopedLogger,
}

impl BatchConsumer {
    pub fn new(options: BatchOptions, logger: ScopedLogger) -> Self {
        Self {
            options,
            state: Arc::new(Mutex::new(BatchState {
                buffer: Vec::new(),
                handler: None,
                generation: 0,
            })),
            logger,
        }
    }

    pub async fn register(&self, handler: ConsumerHandler) {
        self.state.lock().await.handler = Some(handler);
    }

    /// Invoked by the route's internal channel subscriber for every arrival.
    /// Starts the flush timer on the first arrival into an empty buffer.
    pub async fn deliver(&self, body: Value, headers: HashMap<String, HeaderValue>) {
        let (should_flush, generation, start_timer) = {
            let mut state = self.state.lock().await;
            let was_empty = state.buffer.is_empty();
            state.buffer.push((body, headers));
            let should_flush = state.buffer.len() >= self.options.size;
            (should_flush, state.generation, was_empty && !should_flush)
        };

        if should_flush {
            self.flush(generation).await;
            return;
        }

        if start_timer {
            let state = self.state.clone();
            let time = self.options.time;
            let this_generation = generation;
            let consumer = self.clone_for_timer();
            tokio::spawn(async move {
                tokio::time::sleep(time).await;
                let expired_generation = {
                    let guard = state.lock().await;
                    guard.generation
                };
                if expired_generation == this_generation {
                    consumer.flush(this_generation).await;
                }
            });
        }
    }

    fn clone_for_timer(&self) -> BatchConsumer {
        BatchConsumer {
            options: self.options.clone(),
            state: self.state.clone(),
            logger: self.logger.clone(),
        }
    }

    async fn flush(&self, expected_generation: u64) {
        let (batch, handler) = {
            let mut state = self.state.lock().await;
            if state.generation != expected_generation || state.buffer.is_empty() {
                return;
            }
            state.generation += 1;
            (std::mem::take(&mut state.buffer), state.handler.clone())
        };
        let Some(handler) = handler else {
            return;
        };
        let merge = self.options.merge.clone();
        let (body, headers) = merge(batch);
        let handle = tokio::spawn(async move {
            handler(body, headers).await;
        });
        if let Err(join_error) = handle.await {
            self.logger
                .error(format!("batch flush failed, batch discarded: {join_error}"));
        }
    }
}
