//! Persistence seam for the "runtime + persisted" supplier variant.
//!
//! The on-disk format is owned by the application; producers only see
//! [`PersistentStore`]. [`RuntimeStore`] is the in-memory implementation used when
//! nothing survives a restart, and in tests.

use super::errors::SupplyError;
use super::key::SupplyKey;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

#[async_trait]
pub trait PersistentStore<T>: Send + Sync {
    async fn get(&self) -> Option<T>;

    async fn set(&self, value: T) -> Result<(), SupplyError>;

    /// Current value (if any) followed by every later `set`
    fn observe(&self) -> BoxStream<'static, T>;
}

/// Single-value store backed by a watch channel
#[derive(Debug)]
pub struct RuntimeStore<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> Default for RuntimeStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RuntimeStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    #[must_use]
    pub fn with_value(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(value));
        Self { tx }
    }

    #[must_use]
    pub fn get_sync(&self) -> Option<T> {
        self.tx.borrow().clone()
    }
}

#[async_trait]
impl<T> PersistentStore<T> for RuntimeStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self) -> Option<T> {
        self.get_sync()
    }

    async fn set(&self, value: T) -> Result<(), SupplyError> {
        self.tx.send_replace(Some(value));
        Ok(())
    }

    fn observe(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.tx.subscribe())
            .filter_map(|value| async move { value })
            .boxed()
    }
}

/// Hands out the persisted store for a key
pub type PersistenceProvider<V> = Arc<dyn Fn(&SupplyKey) -> Arc<dyn PersistentStore<V>> + Send + Sync>;

/// One [`RuntimeStore`] per key, created on first use
#[derive(Debug)]
pub struct KeyedRuntimeStore<V> {
    stores: Mutex<HashMap<SupplyKey, Arc<RuntimeStore<V>>>>,
}

impl<V> Default for KeyedRuntimeStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> KeyedRuntimeStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn store_for(&self, key: &SupplyKey) -> Arc<RuntimeStore<V>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RuntimeStore::new()))
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adapt into the provider a producer factory expects
    pub fn provider(self: &Arc<Self>) -> PersistenceProvider<V> {
        let this = Arc::clone(self);
        Arc::new(move |key| {
            let store: Arc<dyn PersistentStore<V>> = this.store_for(key);
            store
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_store_get_set() {
        let store = RuntimeStore::new();
        assert_eq!(store.get().await, None::<u32>);

        store.set(5).await.unwrap();
        assert_eq!(store.get().await, Some(5));
    }

    #[tokio::test]
    async fn test_observe_skips_empty_and_replays_latest() {
        let store = RuntimeStore::new();
        let mut updates = store.observe();

        store.set("eth".to_string()).await.unwrap();
        assert_eq!(updates.next().await.as_deref(), Some("eth"));

        store.set("btc".to_string()).await.unwrap();
        let mut late = store.observe();
        assert_eq!(late.next().await.as_deref(), Some("btc"));
    }

    #[tokio::test]
    async fn test_keyed_store_reuses_per_key() {
        let keyed = Arc::new(KeyedRuntimeStore::<u32>::default());
        let provider = keyed.provider();

        provider(&SupplyKey::new("a")).set(1).await.unwrap();
        assert_eq!(provider(&SupplyKey::new("a")).get().await, Some(1));
        assert_eq!(provider(&SupplyKey::new("b")).get().await, None);
        assert_eq!(keyed.len(), 2);
    }
}
