pub mod api;
pub mod fetchers;
pub mod models;
pub mod params;
pub mod simulated;
pub mod suppliers;

pub use api::{ApiError, WalletApi};
pub use models::{
    CurrencyId, EarnToken, EarnTokensPage, NetworkId, NetworkStatus, NetworkStatusValue, Quote, QuoteField,
    QuoteStatus, UserWalletId, Yield,
};
pub use params::{EarnTokensParams, MultiQuoteParams, NetworkStatusParams, QuoteParams, YieldsParams};
pub use suppliers::WalletSuppliers;
