use super::entry::EntryMeta;
use super::errors::SupplyError;
use super::fetcher::DynFetcher;
use super::key::SupplyKey;
use super::lce::Lce;
use super::persist::{PersistenceProvider, PersistentStore};
use super::stream::{StatusSource, Supplied, SupplyItem, SupplyStream};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type InFlight = Shared<BoxFuture<'static, Result<(), SupplyError>>>;

/// Builds default values from the params that failed to produce one
pub type FallbackFn<P, V> = Arc<dyn Fn(&P) -> V + Send + Sync>;

/// Owns the live value of one key.
///
/// The first [`Producer::produce`] starts the initial fetch; afterwards the value only
/// changes through [`Producer::refresh`]. At most one fetch runs at a time: callers that
/// arrive while one is in flight wait for that fetch instead of starting their own.
pub struct Producer<P, V> {
    id: Uuid,
    key: SupplyKey,
    params: P,
    fetcher: DynFetcher<P, V>,
    fallback: Option<V>,
    persistence: Option<Arc<dyn PersistentStore<V>>>,
    tx: watch::Sender<SupplyItem<V>>,
    meta: RwLock<EntryMeta>,
    started: AtomicBool,
    in_flight: Mutex<Option<InFlight>>,
    shutdown: CancellationToken,
}

impl<P, V> std::fmt::Debug for Producer<P, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

impl<P, V> Producer<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(key: SupplyKey, params: P, fetcher: DynFetcher<P, V>, shutdown: CancellationToken) -> Self {
        let ttl = fetcher.ttl();
        let (tx, _rx) = watch::channel(Lce::Loading);
        Self {
            id: Uuid::new_v4(),
            key,
            params,
            fetcher,
            fallback: None,
            persistence: None,
            tx,
            meta: RwLock::new(EntryMeta::new(ttl)),
            started: AtomicBool::new(false),
            in_flight: Mutex::new(None),
            shutdown,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Option<V>) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, store: Option<Arc<dyn PersistentStore<V>>>) -> Self {
        self.persistence = store;
        self
    }

    #[must_use]
    pub fn with_ttl(self, ttl: Duration) -> Self {
        self.meta_write().ttl = ttl;
        self
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn key(&self) -> &SupplyKey {
        &self.key
    }

    #[must_use]
    pub const fn params(&self) -> &P {
        &self.params
    }

    /// Subscribe to the shared stream, starting the initial fetch on first use
    pub fn produce(self: &Arc<Self>) -> SupplyStream<V> {
        let stream = self.subscribe();
        self.meta_write().touch();

        if !self.started.swap(true, Ordering::AcqRel) {
            debug!("▶️  PRODUCE: {} initial fetch", self.key);
            // The fetch runs on its own task; nobody has to await it.
            drop(self.join_or_start_fetch());
        }

        stream
    }

    /// Subscribe without triggering anything
    #[must_use]
    pub fn subscribe(&self) -> SupplyStream<V> {
        SupplyStream::new(self.key.clone(), self.id, self.tx.subscribe())
    }

    /// Re-fetch and publish into the existing stream.
    ///
    /// A failure never replaces a value that is already there; it is recorded as the
    /// entry's last error and returned.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or [`SupplyError::Cancelled`] after shutdown
    pub async fn refresh(self: &Arc<Self>) -> Result<(), SupplyError> {
        self.started.store(true, Ordering::Release);
        self.join_or_start_fetch().await
    }

    #[must_use]
    pub fn current(&self) -> SupplyItem<V> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn meta(&self) -> EntryMeta {
        self.meta_read().clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<SupplyError> {
        self.meta_read().last_error.clone()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.meta_read().is_expired()
    }

    #[must_use]
    pub fn last_accessed(&self) -> Instant {
        self.meta_read().last_accessed
    }

    pub fn touch(&self) {
        self.meta_write().touch();
    }

    pub fn mark_stale(&self) {
        self.meta_write().mark_stale();
    }

    /// Stop any in-flight fetch; the stream keeps its last item
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn join_or_start_fetch(self: &Arc<Self>) -> InFlight {
        // The slot stays locked until the new fetch is registered, so a fetch that
        // finishes immediately cannot clear the slot before it is filled.
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = slot.as_ref() {
            debug!("🔗 JOIN: {} fetch already in flight", self.key);
            return in_flight.clone();
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_fetch().await });
        let weak: Weak<Self> = Arc::downgrade(self);
        let key = self.key.clone();
        let in_flight = async move {
            handle.await.unwrap_or_else(|e| {
                error!("💥 FETCH TASK FAILED: {} - {}", key, e);
                if let Some(producer) = weak.upgrade() {
                    producer.clear_in_flight();
                }
                Err(SupplyError::Cancelled)
            })
        }
        .boxed()
        .shared();

        *slot = Some(in_flight.clone());
        in_flight
    }

    /// Runs one fetch and always frees the in-flight slot, even when the fetcher panics
    async fn run_fetch(self: Arc<Self>) -> Result<(), SupplyError> {
        let start = Instant::now();
        let result = match AssertUnwindSafe(self.fetch()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!("💥 FETCH PANICKED: {} - {}", self.key, message);
                Err(SupplyError::Internal(message))
            }
        };

        // Freed before publishing: a caller woken by the new item must start its own fetch
        self.clear_in_flight();

        match result {
            Ok(value) => {
                info!("✅ FETCH SUCCESS: {} ({:.2}s)", self.key, start.elapsed().as_secs_f64());
                self.publish_value(value).await;
                Ok(())
            }
            Err(SupplyError::Cancelled) => {
                debug!("🛑 FETCH CANCELLED: {}", self.key);
                Err(SupplyError::Cancelled)
            }
            Err(e) => {
                warn!("❌ FETCH FAILED: {} ({:.2}s) - {}", self.key, start.elapsed().as_secs_f64(), e);
                self.publish_error(e.clone());
                Err(e)
            }
        }
    }

    fn clear_in_flight(&self) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn fetch(&self) -> Result<V, SupplyError> {
        self.seed_from_persistence().await;
        self.meta_write().mark_fetching();
        info!("🔄 FETCH START: {}", self.key);

        tokio::select! {
            () = self.shutdown.cancelled() => Err(SupplyError::Cancelled),
            result = self.fetcher.fetch(&self.params) => result,
        }
    }

    async fn seed_from_persistence(&self) {
        let Some(store) = self.persistence.as_ref() else {
            return;
        };
        if !self.tx.borrow().is_loading() {
            return;
        }

        if let Some(value) = store.get().await {
            let seeded = self.tx.send_if_modified(|current| {
                if current.is_loading() {
                    *current = Lce::Content(Supplied::new(value, StatusSource::Cache));
                    true
                } else {
                    false
                }
            });
            if seeded {
                debug!("💾 SEED: {} from persisted store", self.key);
            }
        }
    }

    async fn publish_value(&self, value: V) {
        let persisted = self.persistence.as_ref().map(|_| value.clone());

        self.tx.send_if_modified(|current| {
            let unchanged = matches!(
                current,
                Lce::Content(supplied) if supplied.source == StatusSource::Actual && supplied.value == value
            );
            if !unchanged {
                *current = Lce::Content(Supplied::new(value, StatusSource::Actual));
            }
            !unchanged
        });
        self.meta_write().mark_updated();

        if let (Some(store), Some(value)) = (self.persistence.as_ref(), persisted) {
            if let Err(e) = store.set(value).await {
                warn!("⚠️  Failed to persist {}: {}", self.key, e);
            }
        }
    }

    fn publish_error(&self, error: SupplyError) {
        self.meta_write().mark_error(error.clone());

        let fallback = self.fallback.clone();
        let key = &self.key;
        self.tx.send_if_modified(|current| {
            if current.content().is_some() {
                debug!("🛡️  KEEP: {} keeps its last good value", key);
                return false;
            }
            if fallback.is_none() && current.error() == Some(&error) {
                return false;
            }
            *current = fallback.map_or_else(
                || Lce::Error(error),
                |value| Lce::Content(Supplied::new(value, StatusSource::Fallback)),
            );
            true
        });
    }

    fn meta_read(&self) -> RwLockReadGuard<'_, EntryMeta> {
        self.meta.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn meta_write(&self) -> RwLockWriteGuard<'_, EntryMeta> {
        self.meta.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "fetch panicked".to_string())
}

/// Creates the producer for a key the first time a supplier sees it
pub trait ProducerFactory<P, V>: Send + Sync {
    fn create(&self, key: SupplyKey, params: P, shutdown: CancellationToken) -> Producer<P, V>;
}

/// The usual factory: one fetcher, an optional per-params fallback, optional persistence
pub struct FetchingProducerFactory<P, V> {
    fetcher: DynFetcher<P, V>,
    fallback: Option<FallbackFn<P, V>>,
    persistence: Option<PersistenceProvider<V>>,
    ttl: Option<Duration>,
}

impl<P, V> FetchingProducerFactory<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    #[must_use]
    pub const fn new(fetcher: DynFetcher<P, V>) -> Self {
        Self {
            fetcher,
            fallback: None,
            persistence: None,
            ttl: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Fn(&P) -> V + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, provider: PersistenceProvider<V>) -> Self {
        self.persistence = Some(provider);
        self
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl<P, V> ProducerFactory<P, V> for FetchingProducerFactory<P, V>
where
    P: Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn create(&self, key: SupplyKey, params: P, shutdown: CancellationToken) -> Producer<P, V> {
        let fallback = self.fallback.as_ref().map(|f| f(&params));
        let persistence = self.persistence.as_ref().map(|provider| provider(&key));
        let producer = Producer::new(key, params, Arc::clone(&self.fetcher), shutdown)
            .with_fallback(fallback)
            .with_persistence(persistence);

        match self.ttl {
            Some(ttl) => producer.with_ttl(ttl),
            None => producer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supply::fetcher::FnFetcher;
    use crate::supply::persist::RuntimeStore;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    /// Replays scripted results, one per call, after a short delay
    fn scripted(
        results: Vec<Result<u32, SupplyError>>,
        calls: Arc<AtomicUsize>,
    ) -> DynFetcher<&'static str, u32> {
        let script = Arc::new(Mutex::new(VecDeque::from(results)));
        Arc::new(FnFetcher::new(move |_: &'static str| {
            let script = Arc::clone(&script);
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(SupplyError::Transport("script exhausted".to_string())))
            }
        }))
    }

    fn producer(results: Vec<Result<u32, SupplyError>>) -> (Producer<&'static str, u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = scripted(results, Arc::clone(&calls));
        let producer = Producer::new(SupplyKey::new("test"), "params", fetcher, CancellationToken::new());
        (producer, calls)
    }

    #[tokio::test]
    async fn test_panicking_fetch_publishes_error_and_frees_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher: DynFetcher<&'static str, u32> = Arc::new(FnFetcher::new(move |_: &'static str| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    panic!("decoder blew up");
                }
                Ok(5)
            }
        }));
        let producer = Arc::new(Producer::new(SupplyKey::new("test"), "params", fetcher, CancellationToken::new()));

        let mut stream = producer.produce();
        let item = timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        assert!(matches!(item.error(), Some(SupplyError::Internal(m)) if m.contains("decoder blew up")));
        assert!(!producer.is_fetching());

        // the next refresh starts a new fetch instead of joining the dead one
        timeout(Duration::from_secs(1), producer.refresh()).await.unwrap().unwrap();
        assert_eq!(stream.current().content().map(|s| s.value), Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_initial_fetch_publishes_actual_value() {
        let (producer, calls) = producer(vec![Ok(7)]);
        let producer = Arc::new(producer);
        let mut stream = producer.produce();
        assert!(stream.current().is_loading());

        let item = timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        let supplied = item.content().unwrap();
        assert_eq!(supplied.value, 7);
        assert_eq!(supplied.source, StatusSource::Actual);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(producer.meta().version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_produce_and_refresh_share_one_fetch() {
        let (producer, calls) = producer(vec![Ok(1), Ok(2)]);
        let producer = Arc::new(producer);

        let streams: Vec<_> = (0..10).map(|_| producer.produce()).collect();
        let refreshes = (0..5).map(|_| {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move { producer.refresh().await })
        });
        for handle in refreshes {
            assert_eq!(handle.await.unwrap(), Ok(()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for stream in &streams {
            assert_eq!(stream.value(), Some(1));
            assert!(stream.is_same_stream(&streams[0]));
        }
    }

    #[tokio::test]
    async fn test_fallback_replaces_initial_failure() {
        let (producer, _) = producer(vec![Err(SupplyError::Transport("down".to_string()))]);
        let producer = Arc::new(producer.with_fallback(Some(0)));

        let mut stream = producer.produce();
        let item = timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        let supplied = item.content().unwrap();
        assert_eq!(supplied.value, 0);
        assert_eq!(supplied.source, StatusSource::Fallback);
        assert!(producer.last_error().is_some());
    }

    #[tokio::test]
    async fn test_error_without_fallback_keeps_stream_alive() {
        let (producer, calls) = producer(vec![Err(SupplyError::Decode("bad".to_string())), Ok(9)]);
        let producer = Arc::new(producer);
        let mut stream = producer.produce();

        let item = timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        assert_eq!(item.error(), Some(&SupplyError::Decode("bad".to_string())));

        producer.refresh().await.unwrap();
        assert_eq!(stream.value(), Some(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_good_value() {
        let (producer, _) = producer(vec![Ok(5), Err(SupplyError::Transport("503".to_string()))]);
        let producer = Arc::new(producer);
        let mut stream = producer.produce();
        timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        let before = stream.current();

        let result = producer.refresh().await;
        assert!(matches!(result, Err(SupplyError::Transport(_))));
        assert_eq!(stream.current(), before);
        assert!(producer.last_error().is_some());
    }

    #[tokio::test]
    async fn test_persisted_value_seeds_then_gets_replaced() {
        let store = Arc::new(RuntimeStore::with_value(3_u32));
        let (producer, _) = producer(vec![Ok(4)]);
        let persisted: Arc<dyn PersistentStore<u32>> = store.clone();
        let producer = Arc::new(producer.with_persistence(Some(persisted)));

        let mut stream = producer.produce();
        let seeded = timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        assert_eq!(seeded.content().map(|s| (s.value, s.source)), Some((3, StatusSource::Cache)));

        let actual = timeout(Duration::from_secs(1), stream.changed()).await.unwrap().unwrap();
        assert_eq!(actual.content().map(|s| (s.value, s.source)), Some((4, StatusSource::Actual)));
        assert_eq!(store.get_sync(), Some(4));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_fetch() {
        let shutdown = CancellationToken::new();
        let slow: DynFetcher<&'static str, u32> = Arc::new(FnFetcher::new(|_: &'static str| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        }));
        let producer = Arc::new(Producer::new(SupplyKey::new("slow"), "p", slow, shutdown.clone()));

        let refresh = {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move { producer.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let result = timeout(Duration::from_secs(1), refresh).await.unwrap().unwrap();
        assert_eq!(result, Err(SupplyError::Cancelled));
        assert!(producer.current().is_loading());
    }

    #[tokio::test]
    async fn test_factory_applies_fallback_per_params() {
        let fetcher: DynFetcher<u32, String> = Arc::new(FnFetcher::new(|_: u32| async {
            Err::<String, _>(SupplyError::EmptyUpstream("no enabled yields".to_string()))
        }));
        let factory = FetchingProducerFactory::new(fetcher)
            .with_fallback(|id: &u32| format!("empty-{id}"))
            .with_ttl(Duration::from_secs(1));

        let producer = Arc::new(factory.create(SupplyKey::new("yields_4"), 4, CancellationToken::new()));
        assert_eq!(producer.meta().ttl, Duration::from_secs(1));

        let mut stream = producer.produce();
        let item = timeout(Duration::from_secs(1), stream.settled()).await.unwrap().unwrap();
        assert_eq!(item.content().map(|s| s.value.as_str()), Some("empty-4"));
    }
}
