use super::api::WalletApi;
use super::fetchers::{EarnTokensFetcher, EarnTokensUpdater, MultiQuoteFetcher, NetworkStatusFetcher, QuoteFetcher, YieldsFetcher};
use super::models::{CurrencyId, NetworkStatus, QuoteStatus, UserWalletId, Yield};
use super::params::{EarnTokensParams, MultiQuoteParams, NetworkStatusParams, QuoteParams, YieldsParams};
use crate::pagination::{BatchFetchCoordinator, BatchListSource};
use crate::supply::fetcher::{DynFetcher, TimeoutFetcher};
use crate::supply::key::key_creator;
use crate::supply::persist::KeyedRuntimeStore;
use crate::supply::producer::FetchingProducerFactory;
use crate::supply::refresh::RefreshScheduler;
use crate::supply::{SupplyConfig, SupplyStore, Supplier};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub type QuoteSupplier = Supplier<QuoteParams, QuoteStatus>;
pub type MultiQuoteSupplier = Supplier<MultiQuoteParams, BTreeMap<CurrencyId, QuoteStatus>>;
pub type NetworkStatusSupplier = Supplier<NetworkStatusParams, NetworkStatus>;
pub type YieldsSupplier = Supplier<YieldsParams, Vec<Yield>>;
pub type EarnTokensSource = BatchListSource<EarnTokensParams, EarnTokensFetcher, EarnTokensParams>;

/// Single-currency quotes. Persisted between producers, falls back to an empty quote.
#[must_use]
pub fn quote_supplier(
    api: Arc<dyn WalletApi>,
    config: &SupplyConfig,
    persisted: &Arc<KeyedRuntimeStore<QuoteStatus>>,
) -> QuoteSupplier {
    let fetcher: DynFetcher<QuoteParams, QuoteStatus> =
        Arc::new(TimeoutFetcher::new(QuoteFetcher::new(api), config.fetch_timeout()));
    let factory = FetchingProducerFactory::new(fetcher)
        .with_fallback(|params: &QuoteParams| QuoteStatus::empty(params.currency_id.clone()))
        .with_persistence(persisted.provider());

    Supplier::new(
        "single_quote",
        Arc::new(SupplyStore::from_config(config)),
        key_creator(QuoteParams::key),
        Arc::new(factory),
    )
}

#[must_use]
pub fn multi_quote_supplier(api: Arc<dyn WalletApi>, config: &SupplyConfig) -> MultiQuoteSupplier {
    let fetcher: DynFetcher<MultiQuoteParams, BTreeMap<CurrencyId, QuoteStatus>> =
        Arc::new(TimeoutFetcher::new(MultiQuoteFetcher::new(api), config.fetch_timeout()));
    let factory = FetchingProducerFactory::new(fetcher).with_fallback(|params: &MultiQuoteParams| {
        params
            .currency_ids
            .iter()
            .map(|id| (id.clone(), QuoteStatus::empty(id.clone())))
            .collect()
    });

    Supplier::new(
        "multi_quote",
        Arc::new(SupplyStore::from_config(config)),
        key_creator(MultiQuoteParams::key),
        Arc::new(factory),
    )
}

/// Network statuses have no fallback: a failure is shown as an error item
#[must_use]
pub fn network_status_supplier(api: Arc<dyn WalletApi>, config: &SupplyConfig) -> NetworkStatusSupplier {
    let fetcher: DynFetcher<NetworkStatusParams, NetworkStatus> =
        Arc::new(TimeoutFetcher::new(NetworkStatusFetcher::new(api), config.fetch_timeout()));

    Supplier::new(
        "network_status",
        Arc::new(SupplyStore::from_config(config)),
        key_creator(NetworkStatusParams::key),
        Arc::new(FetchingProducerFactory::new(fetcher)),
    )
}

#[must_use]
pub fn yields_supplier(api: Arc<dyn WalletApi>, config: &SupplyConfig) -> YieldsSupplier {
    let fetcher: DynFetcher<YieldsParams, Vec<Yield>> =
        Arc::new(TimeoutFetcher::new(YieldsFetcher::new(api), config.fetch_timeout()));
    let factory = FetchingProducerFactory::new(fetcher)
        .with_fallback(|_: &YieldsParams| Vec::new())
        .with_ttl(config.default_ttl());

    Supplier::new(
        "yields",
        Arc::new(SupplyStore::from_config(config)),
        key_creator(YieldsParams::key),
        Arc::new(factory),
    )
}

#[must_use]
pub fn earn_tokens_source(api: Arc<dyn WalletApi>, config: &SupplyConfig) -> EarnTokensSource {
    let updater = EarnTokensUpdater::new(Arc::clone(&api), config.page_limit);
    BatchListSource::new(BatchFetchCoordinator::from_config(EarnTokensFetcher::new(api), config))
        .with_updater(Arc::new(updater))
}

/// Every wallet supplier of one application scope, sharing one API client
#[derive(Debug, Clone)]
pub struct WalletSuppliers {
    pub quotes: QuoteSupplier,
    pub multi_quotes: MultiQuoteSupplier,
    pub network_statuses: NetworkStatusSupplier,
    pub yields: YieldsSupplier,
    persisted_quotes: Arc<KeyedRuntimeStore<QuoteStatus>>,
}

impl WalletSuppliers {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>, config: &SupplyConfig) -> Self {
        let persisted_quotes = Arc::new(KeyedRuntimeStore::default());
        Self {
            quotes: quote_supplier(Arc::clone(&api), config, &persisted_quotes),
            multi_quotes: multi_quote_supplier(Arc::clone(&api), config),
            network_statuses: network_status_supplier(Arc::clone(&api), config),
            yields: yields_supplier(api, config),
            persisted_quotes,
        }
    }

    #[must_use]
    pub const fn persisted_quotes(&self) -> &Arc<KeyedRuntimeStore<QuoteStatus>> {
        &self.persisted_quotes
    }

    /// Scheduler that keeps every supplier of this scope fresh
    #[must_use]
    pub fn refresh_scheduler(&self, config: &SupplyConfig) -> RefreshScheduler {
        RefreshScheduler::from_config(config)
            .with_target(Arc::new(self.quotes.clone()))
            .with_target(Arc::new(self.multi_quotes.clone()))
            .with_target(Arc::new(self.network_statuses.clone()))
            .with_target(Arc::new(self.yields.clone()))
    }

    /// Drop every stream that belongs to `wallet`; returns how many were removed
    pub async fn remove_wallet(&self, wallet: &UserWalletId) -> usize {
        let statuses = self
            .network_statuses
            .store()
            .remove_matching(&NetworkStatusParams::wallet_pattern(wallet))
            .await;
        let yields = usize::from(self.yields.remove(&YieldsParams { wallet: wallet.clone() }.key()).await);

        info!("🗑️  Wallet {} removed: {} streams released", wallet, statuses + yields);
        statuses + yields
    }

    /// Mark every stream of `wallet` stale so the scheduler refreshes them on its next
    /// scan, e.g. after the wallet's accounts changed
    pub async fn invalidate_wallet(&self, wallet: &UserWalletId) -> usize {
        let statuses = self
            .network_statuses
            .invalidate_matching(&NetworkStatusParams::wallet_pattern(wallet))
            .await;
        let yields = usize::from(self.yields.invalidate(&YieldsParams { wallet: wallet.clone() }.key()).await);
        debug!("🏷️  Wallet {} invalidated: {} streams", wallet, statuses + yields);
        statuses + yields
    }

    pub async fn shutdown(&self) {
        self.quotes.store().shutdown().await;
        self.multi_quotes.store().shutdown().await;
        self.network_statuses.store().shutdown().await;
        self.yields.store().shutdown().await;
    }
}
