pub mod config;
pub mod entry;
pub mod errors;
pub mod fetcher;
pub mod key;
pub mod lce;
pub mod persist;
pub mod producer;
pub mod refresh;
pub mod retry;
pub mod store;
pub mod stream;
pub mod supplier;

pub use config::{RetryPolicy, SupplyConfig};
pub use entry::{EntryMeta, FetchStatus};
pub use errors::SupplyError;
pub use fetcher::{DynFetcher, Fetcher, FnFetcher, TimeoutFetcher};
pub use key::{KeyCreator, SupplyKey, key_creator, key_part};
pub use lce::Lce;
pub use persist::{KeyedRuntimeStore, PersistenceProvider, PersistentStore, RuntimeStore};
pub use producer::{FallbackFn, FetchingProducerFactory, Producer, ProducerFactory};
pub use refresh::{RefreshEvent, RefreshHandle, RefreshMetrics, RefreshScheduler, Refreshable};
pub use retry::retry_until_success;
pub use store::{SupplyStats, SupplyStore};
pub use stream::{StatusSource, Supplied, SupplyItem, SupplyStream};
pub use supplier::Supplier;
