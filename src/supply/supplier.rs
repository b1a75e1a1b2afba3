use super::errors::SupplyError;
use super::key::{KeyCreator, SupplyKey};
use super::producer::ProducerFactory;
use super::store::SupplyStore;
use super::stream::{SupplyItem, SupplyStream};
use futures::future::join_all;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point for consumers: maps params to a key and hands out that key's stream.
///
/// Suppliers are cheap to clone; clones share the same store, so the same params give
/// the same stream no matter which clone is asked.
pub struct Supplier<P, V> {
    name: String,
    store: Arc<SupplyStore<P, V>>,
    key_creator: KeyCreator<P>,
    factory: Arc<dyn ProducerFactory<P, V>>,
}

impl<P, V> Clone for Supplier<P, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: Arc::clone(&self.store),
            key_creator: Arc::clone(&self.key_creator),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<P, V> Debug for Supplier<P, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supplier").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<P, V> Supplier<P, V>
where
    P: Clone + PartialEq + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        store: Arc<SupplyStore<P, V>>,
        key_creator: KeyCreator<P>,
        factory: Arc<dyn ProducerFactory<P, V>>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            key_creator,
            factory,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<SupplyStore<P, V>> {
        &self.store
    }

    #[must_use]
    pub fn key_for(&self, params: &P) -> SupplyKey {
        (self.key_creator)(params)
    }

    /// Stream for `params`, creating the producer on first use.
    ///
    /// When an existing producer was created from different params that map to the same
    /// key, the existing producer wins and `params` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SupplyError::Cancelled`] once the store has been shut down
    pub async fn invoke(&self, params: P) -> Result<SupplyStream<V>, SupplyError> {
        let key = self.key_for(&params);
        let factory = Arc::clone(&self.factory);
        let new_params = params.clone();
        let new_key = key.clone();

        let (producer, created) = self
            .store
            .get_or_insert_with(&key, move |token| factory.create(new_key, new_params, token))
            .await?;

        if !created && *producer.params() != params {
            debug!(
                "🔀 {}: {} already produced for {:?}, ignoring {:?}",
                self.name,
                key,
                producer.params(),
                params
            );
        }

        Ok(producer.produce())
    }

    /// One stream per params, in order
    ///
    /// # Errors
    ///
    /// Returns [`SupplyError::Cancelled`] once the store has been shut down
    pub async fn invoke_many(&self, params: impl IntoIterator<Item = P>) -> Result<Vec<SupplyStream<V>>, SupplyError> {
        let mut streams = Vec::new();
        for params in params {
            streams.push(self.invoke(params).await?);
        }
        Ok(streams)
    }

    /// Latest item for `key` without creating or starting anything
    pub async fn peek(&self, key: &SupplyKey) -> Option<SupplyItem<V>> {
        self.store.get(key).await.map(|producer| producer.current())
    }

    /// Subscribe to an existing key without triggering a fetch
    pub async fn subscribe(&self, key: &SupplyKey) -> Option<SupplyStream<V>> {
        self.store.get(key).await.map(|producer| producer.subscribe())
    }

    /// Re-fetch `key` into its existing stream.
    ///
    /// # Errors
    ///
    /// [`SupplyError::NotSupplied`] if nobody has invoked the key yet, otherwise the
    /// fetch error. A failed refresh leaves the last good value in place.
    pub async fn refresh(&self, key: &SupplyKey) -> Result<(), SupplyError> {
        let producer = self
            .store
            .get(key)
            .await
            .ok_or_else(|| SupplyError::NotSupplied(key.clone()))?;

        producer.refresh().await.inspect_err(|e| {
            warn!("⚠️  {}: refresh of {} failed: {}", self.name, key, e);
        })
    }

    /// Refresh the stream for `params`, if it exists
    ///
    /// # Errors
    ///
    /// Same as [`Self::refresh`]
    pub async fn refresh_params(&self, params: &P) -> Result<(), SupplyError> {
        self.refresh(&self.key_for(params)).await
    }

    /// Refresh every key matching `pattern` concurrently
    pub async fn refresh_matching(&self, pattern: &str) -> Vec<(SupplyKey, Result<(), SupplyError>)> {
        let keys = self.store.keys_matching(pattern).await;
        debug!("🔄 {}: refreshing {} keys matching {}", self.name, keys.len(), pattern);

        let results = join_all(keys.iter().map(|key| self.refresh(key))).await;
        keys.into_iter().zip(results).collect()
    }

    /// Forget `key`; the next `invoke` creates a new producer
    pub async fn remove(&self, key: &SupplyKey) -> bool {
        self.store.remove(key).await
    }

    /// Keep the stream but treat its value as expired until the next successful fetch
    pub async fn invalidate(&self, key: &SupplyKey) -> bool {
        self.store.invalidate(key).await
    }

    pub async fn invalidate_matching(&self, pattern: &str) -> usize {
        self.store.invalidate_matching(pattern).await
    }
}
