//! Keyed live-data supply for a multi-currency wallet.
//!
//! [`supply`] holds the generic machinery: a [`supply::Supplier`] maps request params
//! to a key, keeps at most one [`supply::Producer`] per key in a
//! [`supply::SupplyStore`], and hands every caller a [`supply::SupplyStream`] on that
//! producer's shared channel. [`pagination`] drives cursor-based listings, and
//! [`wallet`] wires both to a [`wallet::WalletApi`] backend.

pub mod error;
pub mod pagination;
pub mod supply;
pub mod wallet;

pub use error::{Error, Result};
