//! The context's typed shared store.
//!
//! Keys are opaque strings that conform to a `<namespace>.<category>.<name>`
//! convention; values are arbitrary `Any`-erased payloads the core never
//! interprets. Adapters own a typed accessor built on top of [`downcast`](Store::get)
//! for the shape they expect to find under their own namespace.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// A value held in the store. Opaque to the core; adapters downcast it back
/// to the concrete type they put in.
pub type StoreValue = Arc<dyn Any + Send + Sync>;

/// Context-wide key-value store, shared by reference across routes.
///
/// The core performs no locking beyond what's needed for map integrity; callers
/// coordinate writes externally (in practice, each adapter namespaces its key
/// and writes at most once at initialization).
#[derive(Default)]
pub struct Store {
    values: RwLock<HashMap<String, StoreValue>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opaque accessor: returns the raw `Any`-erased value for `key`.
    pub async fn get_opaque(&self, key: &str) -> Option<StoreValue> {
        self.values.read().await.get(key).cloned()
    }

    /// Opaque setter.
    pub async fn put_opaque(&self, key: impl Into<String>, value: StoreValue) {
        self.values.write().await.insert(key.into(), value);
    }

    pub async fn remove(&self, key: &str) -> Option<StoreValue> {
        self.values.write().await.remove(key)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }

    /// Typed accessor for adapters that know the concrete type stored under `key`.
    pub async fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.get_opaque(key).await.and_then(|v| v.downcast::<T>().ok())
    }

    /// Typed setter for adapters that own a namespaced key.
    pub async fn put<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.put_opaque(key, Arc::new(value)).await;
    }

    /// Get-or-insert a value, so racing first-users of a lazily created resource
    /// (e.g. a named [`crate::channel::MessageChannel`]) converge on one instance.
    pub async fn get_or_insert_with<T, F>(&self, key: &str, default: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>(key).await {
            return existing;
        }
        let mut guard = self.values.write().await;
        if let Some(existing) = guard.get(key).and_then(|v| v.clone().downcast::<T>().ok()) {
            return existing;
        }
        let value: Arc<T> = Arc::new(default());
        guard.insert(key.to_string(), value.clone());
        value
    }
}

/// Returns `true` if `key` conforms to the `<namespace>.<category>.<name>` convention.
pub fn is_conventional_key(key: &str) -> bool {
    key.split('.').filter(|segment| !segment.is_empty()).count() >= 3 && !key.starts_with('.') && !key.ends_with('.')
}
