//! Deterministic in-process backend for the demo binary and manual smoke tests.

use super::api::{ApiError, WalletApi};
use super::models::{
    CurrencyId, EarnToken, EarnTokensPage, NetworkId, NetworkStatus, NetworkStatusValue, Quote, QuoteField,
    UserWalletId, Yield,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const EARN_TOKEN_NAMES: [&str; 7] = ["bitcoin", "ethereum", "solana", "tron", "polkadot", "cosmos", "near"];

#[derive(Debug)]
pub struct SimulatedWalletApi {
    latency: Duration,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl SimulatedWalletApi {
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Make every `n`-th call fail with a transport error
    #[must_use]
    pub const fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn call(&self, what: &str) -> Result<u64, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("🌐 simulated {} (call {})", what, call);
        tokio::time::sleep(self.latency).await;

        match self.fail_every {
            Some(n) if n > 0 && call % n == 0 => Err(ApiError::Network(format!("simulated outage on call {call}"))),
            _ => Ok(call),
        }
    }
}

fn seed(value: &str) -> u64 {
    value.bytes().fold(17_u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
}

#[allow(clippy::cast_precision_loss)]
fn price_for(id: &CurrencyId, call: u64) -> f64 {
    let base = (seed(id.as_str()) % 50_000) as f64 + 1.0;
    let drift = (call % 7) as f64 / 100.0;
    base * (1.0 + drift)
}

#[async_trait]
impl WalletApi for SimulatedWalletApi {
    async fn get_quotes(
        &self,
        fiat: &str,
        currency_ids: &[CurrencyId],
        fields: &[QuoteField],
    ) -> Result<BTreeMap<CurrencyId, Quote>, ApiError> {
        let call = self.call("get_quotes").await?;
        let with_change = fields.contains(&QuoteField::PriceChange24h);

        Ok(currency_ids
            .iter()
            // ids starting with "unlisted" have no quote
            .filter(|id| !id.as_str().starts_with("unlisted"))
            .map(|id| {
                let quote = Quote {
                    currency_id: id.clone(),
                    fiat: fiat.to_string(),
                    price: price_for(id, call),
                    price_change_24h: with_change.then_some(0.5),
                };
                (id.clone(), quote)
            })
            .collect())
    }

    #[allow(clippy::cast_precision_loss)]
    async fn get_network_status(&self, wallet: &UserWalletId, network: &NetworkId) -> Result<NetworkStatus, ApiError> {
        let call = self.call("get_network_status").await?;
        let value = if network.as_str().ends_with("testnet") {
            NetworkStatusValue::MissedDerivation
        } else {
            let balance = (seed(wallet.as_str()) ^ seed(network.as_str())) % 10_000 / 100;
            NetworkStatusValue::Verified {
                balance: balance as f64,
                block_height: 1_000_000 + call,
            }
        };

        Ok(NetworkStatus {
            network: network.clone(),
            value,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    async fn get_earn_tokens(
        &self,
        _fiat: &str,
        network: Option<&NetworkId>,
        page: u32,
        limit: usize,
    ) -> Result<EarnTokensPage, ApiError> {
        self.call("get_earn_tokens").await?;
        let start = (page.saturating_sub(1) as usize).saturating_mul(limit);

        let all: Vec<EarnToken> = EARN_TOKEN_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| EarnToken {
                currency_id: CurrencyId::new(*name),
                name: name.to_string(),
                network: network.cloned().unwrap_or_else(|| NetworkId::new(*name)),
                apy: 2.0 + i as f64 * 0.75,
            })
            .collect();

        let items: Vec<EarnToken> = all.iter().skip(start).take(limit).cloned().collect();
        Ok(EarnTokensPage {
            has_next: Some(start + items.len() < all.len()),
            items,
        })
    }

    async fn get_yields(&self, wallet: &UserWalletId) -> Result<Vec<Yield>, ApiError> {
        self.call("get_yields").await?;
        let enabled = !wallet.as_str().starts_with("empty");

        Ok(["ethereum", "solana"]
            .iter()
            .map(|name| Yield {
                currency_id: CurrencyId::new(*name),
                network: NetworkId::new(*name),
                apy: 4.2,
                enabled,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_earn_tokens_page_through_to_end() {
        let api = SimulatedWalletApi::new(Duration::ZERO);
        let first = api.get_earn_tokens("usd", None, 1, 5).await.unwrap();
        let second = api.get_earn_tokens("usd", None, 2, 5).await.unwrap();

        assert_eq!(first.items.len(), 5);
        assert_eq!(first.has_next, Some(true));
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.has_next, Some(false));
    }

    #[tokio::test]
    async fn test_every_nth_call_fails() {
        let api = SimulatedWalletApi::new(Duration::ZERO).failing_every(2);
        let wallet = UserWalletId::new("w1");

        assert!(api.get_yields(&wallet).await.is_ok());
        assert!(matches!(api.get_yields(&wallet).await, Err(ApiError::Network(_))));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_unlisted_currencies_have_no_quote() {
        let api = SimulatedWalletApi::new(Duration::ZERO);
        let ids = [CurrencyId::new("bitcoin"), CurrencyId::new("unlisted-coin")];
        let quotes = api.get_quotes("usd", &ids, &[QuoteField::Price]).await.unwrap();

        assert_eq!(quotes.len(), 1);
        assert!(quotes[&CurrencyId::new("bitcoin")].price > 0.0);
        assert_eq!(quotes[&CurrencyId::new("bitcoin")].price_change_24h, None);
    }
}
