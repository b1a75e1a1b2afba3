use super::config::{REFRESH_EVENT_CHANNEL_CAPACITY, SupplyConfig};
use super::errors::SupplyError;
use super::key::SupplyKey;
use super::supplier::Supplier;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

/// What the scheduler needs from a supplier, with the params and value types erased
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &str;

    async fn expired_keys(&self) -> Vec<SupplyKey>;

    async fn keys_matching(&self, pattern: &str) -> Vec<SupplyKey>;

    async fn refresh_key(&self, key: &SupplyKey) -> Result<(), SupplyError>;
}

#[async_trait]
impl<P, V> Refreshable for Supplier<P, V>
where
    P: Clone + PartialEq + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        Self::name(self)
    }

    async fn expired_keys(&self) -> Vec<SupplyKey> {
        self.store().expired_keys().await
    }

    async fn keys_matching(&self, pattern: &str) -> Vec<SupplyKey> {
        self.store().keys_matching(pattern).await
    }

    async fn refresh_key(&self, key: &SupplyKey) -> Result<(), SupplyError> {
        self.refresh(key).await
    }
}

/// Application-level reasons to refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Key(SupplyKey),
    /// e.g. `network_status_<wallet>_*` after that wallet's balances changed
    Pattern(String),
    All,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshMetrics {
    pub scans: u64,
    pub scheduled_refreshes: u64,
    pub event_refreshes: u64,
    pub successful_refreshes: u64,
    pub failed_refreshes: u64,
    pub skipped_duplicates: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Scan,
    Event,
}

/// Refreshes expired entries on a fixed scan interval and on demand through
/// [`RefreshEvent`]s.
pub struct RefreshScheduler {
    targets: Vec<Arc<dyn Refreshable>>,
    scan_interval: Duration,
    max_concurrent_refreshes: usize,
    active_refreshes: RwLock<HashSet<String>>,
    metrics: RwLock<RefreshMetrics>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(scan_interval: Duration, max_concurrent: usize) -> Self {
        Self {
            targets: Vec::new(),
            scan_interval,
            max_concurrent_refreshes: max_concurrent.max(1),
            active_refreshes: RwLock::new(HashSet::new()),
            metrics: RwLock::new(RefreshMetrics::default()),
        }
    }

    #[must_use]
    pub fn from_config(config: &SupplyConfig) -> Self {
        Self::new(config.refresh_scan_interval(), config.max_concurrent_refreshes)
    }

    #[must_use]
    pub fn with_target(mut self, target: Arc<dyn Refreshable>) -> Self {
        self.targets.push(target);
        self
    }

    /// Spawn the scheduler loop. Dropping the returned handle stops it as well.
    #[must_use]
    pub fn start(self) -> RefreshHandle {
        let (events_tx, events_rx) = mpsc::channel(REFRESH_EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let scheduler = Arc::new(self);
        let runner = Arc::clone(&scheduler);
        tokio::spawn(async move {
            runner.run(events_rx, shutdown_rx).await;
        });

        RefreshHandle {
            scheduler,
            events_tx,
            shutdown_tx,
        }
    }

    async fn run(&self, mut events_rx: mpsc::Receiver<RefreshEvent>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            "🚀 Refresh scheduler started ({} suppliers, scan every {:?}, max {} concurrent)",
            self.targets.len(),
            self.scan_interval,
            self.max_concurrent_refreshes
        );

        let mut scan = interval_at(tokio::time::Instant::now() + self.scan_interval, self.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("🛑 Refresh scheduler shutting down");
                    break;
                }
                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = scan.tick() => {
                    self.refresh_expired().await;
                }
            }
        }
    }

    /// Refresh everything an event selects; returns how many keys were refreshed
    pub async fn handle_event(&self, event: RefreshEvent) -> usize {
        debug!("📨 REFRESH EVENT: {:?}", event);
        let mut refreshed = 0;

        for target in &self.targets {
            let keys = match &event {
                RefreshEvent::Key(key) => target
                    .keys_matching(key.as_str())
                    .await
                    .into_iter()
                    .filter(|candidate| candidate == key)
                    .collect(),
                RefreshEvent::Pattern(pattern) => target.keys_matching(pattern).await,
                RefreshEvent::All => target.keys_matching("*").await,
            };
            refreshed += self.refresh_keys(target, keys, Origin::Event).await;
        }

        refreshed
    }

    /// One scan over every supplier; returns how many keys were refreshed
    pub async fn refresh_expired(&self) -> usize {
        self.metrics.write().await.scans += 1;
        let mut refreshed = 0;

        for target in &self.targets {
            let expired = target.expired_keys().await;
            if !expired.is_empty() {
                info!("🔄 REFRESH: {} has {} expired entries", target.name(), expired.len());
            }
            refreshed += self.refresh_keys(target, expired, Origin::Scan).await;
        }

        refreshed
    }

    async fn refresh_keys(&self, target: &Arc<dyn Refreshable>, keys: Vec<SupplyKey>, origin: Origin) -> usize {
        if keys.is_empty() {
            return 0;
        }

        let outcomes: Vec<bool> = stream::iter(keys)
            .map(|key| self.refresh_one(target, key, origin))
            .buffer_unordered(self.max_concurrent_refreshes)
            .collect()
            .await;

        outcomes.into_iter().filter(|attempted| *attempted).count()
    }

    async fn refresh_one(&self, target: &Arc<dyn Refreshable>, key: SupplyKey, origin: Origin) -> bool {
        let active_key = format!("{}:{}", target.name(), key);
        {
            let mut active = self.active_refreshes.write().await;
            if !active.insert(active_key.clone()) {
                debug!("⚠️  Skipping duplicate refresh for: {}", active_key);
                drop(active);
                self.metrics.write().await.skipped_duplicates += 1;
                return false;
            }
        }

        let start = Instant::now();
        let result = target.refresh_key(&key).await;

        {
            let mut metrics = self.metrics.write().await;
            match origin {
                Origin::Scan => metrics.scheduled_refreshes += 1,
                Origin::Event => metrics.event_refreshes += 1,
            }
            match &result {
                Ok(()) => metrics.successful_refreshes += 1,
                Err(_) => metrics.failed_refreshes += 1,
            }
        }

        match result {
            Ok(()) => debug!("✅ REFRESHED: {} ({:.2}s)", active_key, start.elapsed().as_secs_f64()),
            Err(e) => warn!("❌ REFRESH FAILED: {} - {}", active_key, e),
        }

        self.active_refreshes.write().await.remove(&active_key);
        true
    }

    pub async fn metrics(&self) -> RefreshMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset_metrics(&self) {
        *self.metrics.write().await = RefreshMetrics::default();
    }

    pub async fn active_refreshes_count(&self) -> usize {
        self.active_refreshes.read().await.len()
    }
}

/// Handle on a running [`RefreshScheduler`]
pub struct RefreshHandle {
    scheduler: Arc<RefreshScheduler>,
    events_tx: mpsc::Sender<RefreshEvent>,
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// # Errors
    ///
    /// Returns [`SupplyError::Cancelled`] once the scheduler has stopped
    pub async fn send(&self, event: RefreshEvent) -> Result<(), SupplyError> {
        self.events_tx.send(event).await.map_err(|_| SupplyError::Cancelled)
    }

    #[must_use]
    pub fn events(&self) -> mpsc::Sender<RefreshEvent> {
        self.events_tx.clone()
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub async fn metrics(&self) -> RefreshMetrics {
        self.scheduler.metrics().await
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).await.is_err() {
            debug!("Refresh scheduler already stopped");
        }
    }
}
