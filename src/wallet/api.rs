use super::models::{CurrencyId, EarnTokensPage, NetworkId, NetworkStatus, Quote, QuoteField, UserWalletId, Yield};
use crate::supply::SupplyError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failures reported by the remote wallet backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("network unavailable: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<ApiError> for SupplyError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Malformed(message) => Self::Decode(message),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// The remote calls the wallet suppliers depend on. Request and response encoding is
/// the implementor's business.
#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn get_quotes(
        &self,
        fiat: &str,
        currency_ids: &[CurrencyId],
        fields: &[QuoteField],
    ) -> Result<BTreeMap<CurrencyId, Quote>, ApiError>;

    async fn get_network_status(&self, wallet: &UserWalletId, network: &NetworkId) -> Result<NetworkStatus, ApiError>;

    async fn get_earn_tokens(
        &self,
        fiat: &str,
        network: Option<&NetworkId>,
        page: u32,
        limit: usize,
    ) -> Result<EarnTokensPage, ApiError>;

    async fn get_yields(&self, wallet: &UserWalletId) -> Result<Vec<Yield>, ApiError>;
}
