use super::config::SupplyConfig;
use super::entry::FetchStatus;
use super::errors::SupplyError;
use super::key::SupplyKey;
use super::producer::Producer;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Holds at most one producer per key for one application scope.
///
/// Lookup and insertion happen under a single write lock, so two callers racing on a
/// new key always end up with the same producer. When the store grows past
/// `max_entries` the least recently accessed producer without subscribers is evicted.
/// Producers somebody still listens to are never evicted; the store grows instead.
#[derive(Debug)]
pub struct SupplyStore<P, V> {
    producers: RwLock<HashMap<SupplyKey, Arc<Producer<P, V>>>>,
    max_entries: usize,
    shutdown: CancellationToken,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P, V> SupplyStore<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            producers: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            shutdown: CancellationToken::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &SupplyConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Return the producer for `key`, creating it with `create` if there is none.
    ///
    /// `create` runs inside the critical section and receives the cancellation token the
    /// new producer must observe. The boolean is true when this call created it.
    ///
    /// # Errors
    ///
    /// Returns [`SupplyError::Cancelled`] after [`Self::shutdown`]
    #[allow(clippy::significant_drop_tightening)]
    pub async fn get_or_insert_with(
        &self,
        key: &SupplyKey,
        create: impl FnOnce(CancellationToken) -> Producer<P, V>,
    ) -> Result<(Arc<Producer<P, V>>, bool), SupplyError> {
        let mut producers = self.producers.write().await;
        if self.shutdown.is_cancelled() {
            return Err(SupplyError::Cancelled);
        }

        if let Some(existing) = producers.get(key) {
            debug!("🎯 Store HIT: {}", key);
            self.hits.fetch_add(1, Ordering::Relaxed);
            existing.touch();
            return Ok((Arc::clone(existing), false));
        }

        debug!("❌ Store MISS: {}", key);
        self.misses.fetch_add(1, Ordering::Relaxed);

        if producers.len() >= self.max_entries && !Self::evict_lru(&mut producers) {
            warn!(
                "⚠️  Store FULL: every one of {} producers has subscribers, growing past {}",
                producers.len(),
                self.max_entries
            );
        }

        let producer = Arc::new(create(self.shutdown.child_token()));
        producers.insert(key.clone(), Arc::clone(&producer));
        info!("🆕 Store CREATE: {} ({} producers)", key, producers.len());

        Ok((producer, true))
    }

    pub async fn get(&self, key: &SupplyKey) -> Option<Arc<Producer<P, V>>> {
        let producers = self.producers.read().await;
        producers.get(key).map(|producer| {
            producer.touch();
            Arc::clone(producer)
        })
    }

    pub async fn contains(&self, key: &SupplyKey) -> bool {
        self.producers.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.producers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.producers.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<SupplyKey> {
        self.producers.read().await.keys().cloned().collect()
    }

    pub async fn keys_matching(&self, pattern: &str) -> Vec<SupplyKey> {
        let producers = self.producers.read().await;
        producers
            .keys()
            .filter(|key| key.matches(pattern))
            .cloned()
            .collect()
    }

    /// Keys whose value is older than its TTL, or that never received one
    pub async fn expired_keys(&self) -> Vec<SupplyKey> {
        let producers = self.producers.read().await;
        producers
            .iter()
            .filter(|(_, producer)| producer.is_expired() && !producer.is_fetching())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Mark `key` stale so the next scan refreshes it regardless of its TTL
    pub async fn invalidate(&self, key: &SupplyKey) -> bool {
        let Some(producer) = self.producers.read().await.get(key).cloned() else {
            return false;
        };
        producer.mark_stale();
        debug!("🏷️  Store INVALIDATE: {}", key);
        true
    }

    pub async fn invalidate_matching(&self, pattern: &str) -> usize {
        let producers = self.producers.read().await;
        let mut invalidated = 0;
        for (key, producer) in producers.iter() {
            if key.matches(pattern) {
                producer.mark_stale();
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            debug!("🏷️  Store INVALIDATE: {} producers matching {}", invalidated, pattern);
        }
        invalidated
    }

    /// Drop the producer for `key` and cancel its in-flight fetch. Existing subscribers
    /// keep the last item; a later `invoke` starts a fresh producer.
    pub async fn remove(&self, key: &SupplyKey) -> bool {
        let Some(producer) = self.producers.write().await.remove(key) else {
            return false;
        };
        producer.cancel();
        info!("🗑️  Store REMOVE: {}", key);
        true
    }

    /// Remove every producer whose key matches `pattern` (see [`SupplyKey::matches`])
    pub async fn remove_matching(&self, pattern: &str) -> usize {
        let mut producers = self.producers.write().await;
        let before = producers.len();
        producers.retain(|key, producer| {
            let keep = !key.matches(pattern);
            if !keep {
                producer.cancel();
            }
            keep
        });
        let removed = before - producers.len();
        drop(producers);

        if removed > 0 {
            info!("🗑️  Store REMOVE: {} producers matching {}", removed, pattern);
        }
        removed
    }

    /// Cancel every producer and empty the store; later inserts fail with `Cancelled`
    pub async fn shutdown(&self) {
        let mut producers = self.producers.write().await;
        self.shutdown.cancel();
        let count = producers.len();
        producers.clear();
        drop(producers);
        info!("🛑 Store SHUTDOWN: released {} producers", count);
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Evict the least recently accessed producer nobody subscribes to.
    /// Returns false when every producer still has subscribers.
    fn evict_lru(producers: &mut HashMap<SupplyKey, Arc<Producer<P, V>>>) -> bool {
        let oldest_key = producers
            .iter()
            .filter(|(_, producer)| producer.subscriber_count() == 0)
            .min_by_key(|(_, producer)| producer.last_accessed())
            .map(|(key, _)| key.clone());

        let Some(producer) = oldest_key.and_then(|key| producers.remove(&key)) else {
            return false;
        };
        producer.cancel();
        debug!("♻️  Store EVICT: {}", producer.key());
        true
    }

    #[allow(clippy::significant_drop_tightening)]
    pub async fn stats(&self) -> SupplyStats {
        let producers = self.producers.read().await;
        let metas: Vec<_> = producers.values().map(|producer| producer.meta()).collect();

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        SupplyStats {
            total_entries: metas.len(),
            fresh_entries: metas.iter().filter(|meta| meta.is_fresh()).count(),
            stale_entries: metas
                .iter()
                .filter(|meta| {
                    matches!(meta.fetch_status, FetchStatus::Stale)
                        || (meta.last_updated.is_some() && meta.is_expired())
                })
                .count(),
            error_entries: metas
                .iter()
                .filter(|meta| matches!(meta.fetch_status, FetchStatus::Error(_)))
                .count(),
            subscribers: producers.values().map(|producer| producer.subscriber_count()).sum(),
            max_entries: self.max_entries,
            hits,
            misses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
    pub error_entries: usize,
    pub subscribers: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl SupplyStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
