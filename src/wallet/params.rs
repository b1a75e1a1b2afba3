//! Request params of the wallet suppliers and the keys derived from them.
//!
//! Keys only include what identifies the stream. Params that are not part of the key
//! (the fiat currency of a quote, for instance) are taken from whichever caller
//! created the producer first. Every id goes through [`key_part`], so ids that contain
//! `_` or `,` cannot make two requests share a key.

use super::models::{CurrencyId, NetworkId, UserWalletId};
use crate::supply::{SupplyKey, key_part};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteParams {
    pub currency_id: CurrencyId,
    pub fiat: String,
}

impl QuoteParams {
    pub fn new(currency_id: impl Into<String>, fiat: impl Into<String>) -> Self {
        Self {
            currency_id: CurrencyId::new(currency_id),
            fiat: fiat.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> SupplyKey {
        SupplyKey::new(format!("single_quote_{}", key_part(self.currency_id.as_str())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiQuoteParams {
    pub currency_ids: BTreeSet<CurrencyId>,
    pub fiat: String,
}

impl MultiQuoteParams {
    pub fn new<I, S>(currency_ids: I, fiat: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            currency_ids: currency_ids.into_iter().map(CurrencyId::new).collect(),
            fiat: fiat.into(),
        }
    }

    /// Ids are sorted, so the order callers list them in does not matter
    #[must_use]
    pub fn key(&self) -> SupplyKey {
        let ids: Vec<_> = self.currency_ids.iter().map(|id| key_part(id.as_str())).collect();
        SupplyKey::new(format!("multi_quote_{}", ids.join(",")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkStatusParams {
    pub wallet: UserWalletId,
    pub network: NetworkId,
}

impl NetworkStatusParams {
    pub fn new(wallet: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            wallet: UserWalletId::new(wallet),
            network: NetworkId::new(network),
        }
    }

    #[must_use]
    pub fn key(&self) -> SupplyKey {
        SupplyKey::new(format!(
            "network_status_{}_{}",
            key_part(self.wallet.as_str()),
            key_part(self.network.as_str())
        ))
    }

    /// Pattern matching every network status of `wallet`
    #[must_use]
    pub fn wallet_pattern(wallet: &UserWalletId) -> String {
        format!("network_status_{}_*", key_part(wallet.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct YieldsParams {
    pub wallet: UserWalletId,
}

impl YieldsParams {
    pub fn new(wallet: impl Into<String>) -> Self {
        Self {
            wallet: UserWalletId::new(wallet),
        }
    }

    #[must_use]
    pub fn key(&self) -> SupplyKey {
        SupplyKey::new(format!("yields_{}", key_part(self.wallet.as_str())))
    }
}

/// Filter of the earn-tokens listing; a change restarts pagination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EarnTokensParams {
    pub fiat: String,
    pub network: Option<NetworkId>,
}

impl EarnTokensParams {
    pub fn new(fiat: impl Into<String>) -> Self {
        Self {
            fiat: fiat.into(),
            network: None,
        }
    }

    #[must_use]
    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(NetworkId::new(network));
        self
    }
}
