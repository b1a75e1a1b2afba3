use derive_more::Display;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Identifies one wallet of the user
    UserWalletId
);
string_id!(NetworkId);
string_id!(
    /// Coin id as used by the quotes backend, e.g. `bitcoin`
    CurrencyId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteField {
    Price,
    PriceChange24h,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub currency_id: CurrencyId,
    pub fiat: String,
    pub price: f64,
    #[serde(default)]
    pub price_change_24h: Option<f64>,
}

/// Quote as shown to the user: either data or an explicit "no quote"
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuoteStatus {
    Data(Quote),
    Empty { currency_id: CurrencyId },
}

impl QuoteStatus {
    #[must_use]
    pub fn empty(currency_id: CurrencyId) -> Self {
        Self::Empty { currency_id }
    }

    #[must_use]
    pub const fn currency_id(&self) -> &CurrencyId {
        match self {
            Self::Data(quote) => &quote.currency_id,
            Self::Empty { currency_id } => currency_id,
        }
    }

    #[must_use]
    pub const fn price(&self) -> Option<f64> {
        match self {
            Self::Data(quote) => Some(quote.price),
            Self::Empty { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkStatusValue {
    Verified { balance: f64, block_height: u64 },
    MissedDerivation,
    Unreachable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub network: NetworkId,
    pub value: NetworkStatusValue,
}

impl NetworkStatus {
    #[must_use]
    pub fn unreachable(network: NetworkId, reason: impl Into<String>) -> Self {
        Self {
            network,
            value: NetworkStatusValue::Unreachable { reason: reason.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnToken {
    pub currency_id: CurrencyId,
    pub name: String,
    pub network: NetworkId,
    pub apy: f64,
}

/// One page of the earn-tokens listing as the backend returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnTokensPage {
    pub items: Vec<EarnToken>,
    #[serde(default)]
    pub has_next: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Yield {
    pub currency_id: CurrencyId,
    pub network: NetworkId,
    pub apy: f64,
    pub enabled: bool,
}
