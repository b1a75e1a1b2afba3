#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use walletfeed::supply::{SupplyItem, SupplyStream};
use walletfeed::wallet::{
    ApiError, CurrencyId, EarnToken, EarnTokensPage, NetworkId, NetworkStatus, NetworkStatusValue, Quote, QuoteField,
    UserWalletId, WalletApi, Yield,
};

/// Scriptable backend that counts every call
#[derive(Debug, Default)]
pub struct FakeWalletApi {
    pub latency: Duration,
    pub quote_calls: AtomicUsize,
    pub network_calls: AtomicUsize,
    pub earn_calls: AtomicUsize,
    pub yields_calls: AtomicUsize,
    /// Fail every quotes call while set
    pub fail_quotes: AtomicBool,
    /// Number of upcoming network-status calls that fail
    pub fail_next_networks: AtomicUsize,
    pub yields_enabled: AtomicBool,
    pub earn_total: usize,
    /// APY of every earn token served from now on
    pub earn_apy: AtomicU32,
}

impl FakeWalletApi {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(20),
            yields_enabled: AtomicBool::new(true),
            earn_total: 7,
            earn_apy: AtomicU32::new(3),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn take_network_failure(&self) -> bool {
        self.fail_next_networks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl WalletApi for FakeWalletApi {
    async fn get_quotes(
        &self,
        fiat: &str,
        currency_ids: &[CurrencyId],
        _fields: &[QuoteField],
    ) -> Result<BTreeMap<CurrencyId, Quote>, ApiError> {
        let call = self.quote_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(ApiError::Http {
                status: 503,
                message: "quotes unavailable".to_string(),
            });
        }

        Ok(currency_ids
            .iter()
            .map(|id| {
                let quote = Quote {
                    currency_id: id.clone(),
                    fiat: fiat.to_string(),
                    price: 100.0 + call as f64,
                    price_change_24h: None,
                };
                (id.clone(), quote)
            })
            .collect())
    }

    async fn get_network_status(&self, _wallet: &UserWalletId, network: &NetworkId) -> Result<NetworkStatus, ApiError> {
        let call = self.network_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if self.take_network_failure() {
            return Err(ApiError::Timeout);
        }

        Ok(NetworkStatus {
            network: network.clone(),
            value: NetworkStatusValue::Verified {
                balance: 1.5,
                block_height: call as u64,
            },
        })
    }

    async fn get_earn_tokens(
        &self,
        _fiat: &str,
        network: Option<&NetworkId>,
        page: u32,
        limit: usize,
    ) -> Result<EarnTokensPage, ApiError> {
        self.earn_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        let start = (page as usize - 1) * limit;
        let end = self.earn_total.min(start + limit);
        let items = (start..end)
            .map(|i| EarnToken {
                currency_id: CurrencyId::new(format!("token-{i}")),
                name: format!("Token {i}"),
                network: network.cloned().unwrap_or_else(|| NetworkId::new("ethereum")),
                apy: f64::from(self.earn_apy.load(Ordering::SeqCst)),
            })
            .collect();

        // no has_next: the coordinator falls back to the short-page rule
        Ok(EarnTokensPage { items, has_next: None })
    }

    async fn get_yields(&self, _wallet: &UserWalletId) -> Result<Vec<Yield>, ApiError> {
        self.yields_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        Ok(vec![Yield {
            currency_id: CurrencyId::new("ethereum"),
            network: NetworkId::new("ethereum"),
            apy: 4.0,
            enabled: self.yields_enabled.load(Ordering::SeqCst),
        }])
    }
}

/// First non-loading item, failing the test after two seconds
pub async fn settle<V>(stream: &mut SupplyStream<V>) -> SupplyItem<V>
where
    V: Clone + Send + Sync + 'static,
{
    timeout(Duration::from_secs(2), stream.settled())
        .await
        .expect("stream did not settle in time")
        .expect("stream closed")
}

/// Poll `condition` every 10ms until it holds or `limit` passes
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
