//! Per-route processing queue: buffered, single-handler, FIFO delivery.
//!
//! Grounded on the design notes' `{ buffer: FIFO, handler: optional }` guidance:
//! a single lock around a buffer and an optional handler, with `setHandler`
//! draining the buffer before returning.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::exchange::HeaderValue;

pub type QueueHandler =
    Arc<dyn Fn(serde_json::Value, std::collections::HashMap<String, HeaderValue>) + Send + Sync>;

struct Inner {
    buffer: VecDeque<(serde_json::Value, std::collections::HashMap<String, HeaderValue>)>,
    handler: Option<QueueHandler>,
}

/// Single-producer-safe, single-consumer processing queue owned by one route.
pub struct ProcessingQueue {
    inner: Mutex<Inner>,
}

impl Default for ProcessingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                handler: None,
            }),
        }
    }

    /// Append a message. If a handler is set, it (and every buffered message
    /// ahead of it) is delivered in FIFO order before this call returns.
    /// Enqueue never fails.
    pub async fn enqueue(
        &self,
        body: serde_json::Value,
        headers: std::collections::HashMap<String, HeaderValue>,
    ) {
        let mut guard = self.inner.lock().await;
        guard.buffer.push_back((body, headers));
        Self::flush_locked(&mut guard);
    }

    /// Atomically replace the handler, flushing any buffered messages in
    /// arrival order before returning. At most one handler is active at a time.
    pub async fn set_handler(&self, handler: QueueHandler) {
        let mut guard = self.inner.lock().await;
        guard.handler = Some(handler);
        Self::flush_locked(&mut guard);
    }

    /// Drop the buffer and detach the handler.
    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.buffer.clear();
        guard.handler = None;
    }

    fn flush_locked(guard: &mut Inner) {
        let Some(handler) = guard.handler.clone() else {
            return;
        };
        while let Some((body, headers)) = guard.buffer.pop_front() {
            handler(body, headers);
        }
    }
}
