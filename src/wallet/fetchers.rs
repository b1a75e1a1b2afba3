use super::api::WalletApi;
use super::models::{CurrencyId, EarnToken, NetworkStatus, QuoteField, QuoteStatus, Yield};
use super::params::{EarnTokensParams, MultiQuoteParams, NetworkStatusParams, QuoteParams, YieldsParams};
use crate::pagination::{
    Batch, BatchUpdateFetcher, BatchUpdateResult, Page, PageCursor, PageFetcher, PageRequest, UpdateContext,
};
use crate::supply::SupplyError;
use crate::supply::config::DEFAULT_TTL_SECS;
use crate::supply::fetcher::Fetcher;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const QUOTES_TTL_SECS: u64 = 30;

fn check_quote_args(fiat: &str, fields: &[QuoteField]) -> Result<(), SupplyError> {
    if fiat.trim().is_empty() {
        return Err(SupplyError::InvalidArguments("fiat currency id is empty".to_string()));
    }
    if fields.is_empty() {
        return Err(SupplyError::InvalidArguments("no quote fields requested".to_string()));
    }
    Ok(())
}

pub struct QuoteFetcher {
    api: Arc<dyn WalletApi>,
    fields: Vec<QuoteField>,
}

impl QuoteFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>) -> Self {
        Self {
            api,
            fields: vec![QuoteField::Price, QuoteField::PriceChange24h],
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Vec<QuoteField>) -> Self {
        self.fields = fields;
        self
    }
}

#[async_trait]
impl Fetcher<QuoteParams> for QuoteFetcher {
    type Output = QuoteStatus;

    async fn fetch(&self, params: &QuoteParams) -> Result<QuoteStatus, SupplyError> {
        check_quote_args(&params.fiat, &self.fields)?;

        let ids = [params.currency_id.clone()];
        let mut quotes = self.api.get_quotes(&params.fiat, &ids, &self.fields).await?;
        quotes
            .remove(&params.currency_id)
            .map(QuoteStatus::Data)
            .ok_or_else(|| SupplyError::EmptyUpstream(format!("no quote for {}", params.currency_id)))
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(QUOTES_TTL_SECS)
    }
}

/// Quotes for several currencies in one call. Currencies the backend has no quote for
/// come back as [`QuoteStatus::Empty`].
pub struct MultiQuoteFetcher {
    api: Arc<dyn WalletApi>,
    fields: Vec<QuoteField>,
}

impl MultiQuoteFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>) -> Self {
        Self {
            api,
            fields: vec![QuoteField::Price, QuoteField::PriceChange24h],
        }
    }
}

#[async_trait]
impl Fetcher<MultiQuoteParams> for MultiQuoteFetcher {
    type Output = BTreeMap<CurrencyId, QuoteStatus>;

    async fn fetch(&self, params: &MultiQuoteParams) -> Result<Self::Output, SupplyError> {
        check_quote_args(&params.fiat, &self.fields)?;
        if params.currency_ids.is_empty() {
            debug!("No currencies requested, skipping quotes call");
            return Ok(BTreeMap::new());
        }

        let ids: Vec<CurrencyId> = params.currency_ids.iter().cloned().collect();
        let mut quotes = self.api.get_quotes(&params.fiat, &ids, &self.fields).await?;

        Ok(ids
            .into_iter()
            .map(|id| {
                let status = quotes
                    .remove(&id)
                    .map_or_else(|| QuoteStatus::empty(id.clone()), QuoteStatus::Data);
                (id, status)
            })
            .collect())
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(QUOTES_TTL_SECS)
    }
}

pub struct NetworkStatusFetcher {
    api: Arc<dyn WalletApi>,
}

impl NetworkStatusFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Fetcher<NetworkStatusParams> for NetworkStatusFetcher {
    type Output = NetworkStatus;

    async fn fetch(&self, params: &NetworkStatusParams) -> Result<NetworkStatus, SupplyError> {
        Ok(self.api.get_network_status(&params.wallet, &params.network).await?)
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(DEFAULT_TTL_SECS)
    }
}

/// Enabled yields of a wallet; a wallet with none is an upstream failure so that the
/// supplier's empty fallback kicks in
pub struct YieldsFetcher {
    api: Arc<dyn WalletApi>,
}

impl YieldsFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Fetcher<YieldsParams> for YieldsFetcher {
    type Output = Vec<Yield>;

    async fn fetch(&self, params: &YieldsParams) -> Result<Vec<Yield>, SupplyError> {
        let enabled: Vec<Yield> = self
            .api
            .get_yields(&params.wallet)
            .await?
            .into_iter()
            .filter(|y| y.enabled)
            .collect();

        if enabled.is_empty() {
            return Err(SupplyError::EmptyUpstream("no enabled yields".to_string()));
        }
        Ok(enabled)
    }
}

pub struct EarnTokensFetcher {
    api: Arc<dyn WalletApi>,
}

impl EarnTokensFetcher {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PageFetcher<EarnTokensParams> for EarnTokensFetcher {
    type Item = EarnToken;

    async fn fetch_page(&self, request: &PageRequest<EarnTokensParams>) -> Result<Page<EarnToken>, SupplyError> {
        let PageCursor::Page(page) = request.cursor else {
            return Err(SupplyError::InvalidArguments(
                "earn tokens are paged by number".to_string(),
            ));
        };

        let response = self
            .api
            .get_earn_tokens(&request.params.fiat, request.params.network.as_ref(), page, request.limit)
            .await?;

        let result = Page::new(response.items);
        Ok(match response.has_next {
            Some(has_next) => result.with_last(!has_next),
            None => result,
        })
    }
}

/// Re-reads the pages behind loaded earn-token batches, so APYs can be refreshed
/// without restarting the listing. Batch `n` is page `n + 1`.
pub struct EarnTokensUpdater {
    api: Arc<dyn WalletApi>,
    limit: usize,
}

impl EarnTokensUpdater {
    #[must_use]
    pub fn new(api: Arc<dyn WalletApi>, limit: usize) -> Self {
        Self {
            api,
            limit: limit.max(1),
        }
    }

    async fn fetch_batch(&self, key: usize, params: &EarnTokensParams) -> Result<Batch<EarnToken>, SupplyError> {
        let page = key
            .checked_add(1)
            .and_then(|page| u32::try_from(page).ok())
            .ok_or_else(|| SupplyError::InvalidArguments(format!("batch {key} has no page number")))?;

        let response = self
            .api
            .get_earn_tokens(&params.fiat, params.network.as_ref(), page, self.limit)
            .await?;
        Ok(Batch {
            key,
            data: response.items,
        })
    }
}

#[async_trait]
impl BatchUpdateFetcher<EarnToken, EarnTokensParams> for EarnTokensUpdater {
    async fn fetch_update(
        &self,
        to_update: Vec<Batch<EarnToken>>,
        request: &EarnTokensParams,
    ) -> BatchUpdateResult<EarnToken> {
        let mut updated = Vec::with_capacity(to_update.len());
        for batch in to_update {
            match self.fetch_batch(batch.key, request).await {
                Ok(batch) => updated.push(batch),
                Err(e) => return BatchUpdateResult::Error(e),
            }
        }
        debug!("✏️  Earn tokens: {} batches re-read", updated.len());
        BatchUpdateResult::Success(updated)
    }

    async fn fetch_update_streaming(
        &self,
        ctx: &UpdateContext<'_, EarnToken, EarnTokensParams>,
        to_update: Vec<Batch<EarnToken>>,
        request: &EarnTokensParams,
    ) {
        for batch in to_update {
            let result = match self.fetch_batch(batch.key, request).await {
                Ok(batch) => BatchUpdateResult::Success(vec![batch]),
                Err(e) => BatchUpdateResult::Error(e),
            };
            if !ctx.update(|_| result) {
                return;
            }
        }
    }
}
