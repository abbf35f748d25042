//! Market data retrieval and validated caching.

pub mod cache;
pub mod csv_provider;
pub mod parquet;
pub mod provider;
pub mod registry;
pub mod store;
pub mod synthetic;

#[cfg(test)]
pub(crate) mod mock;

pub use cache::{CacheCheck, CacheFetch, CachePolicy, DataCache, FrameSource};
pub use csv_provider::CsvProvider;
pub use parquet::{ParquetMeta, ParquetStore};
pub use provider::{MarketDataProvider, ProviderError, ProviderStatus};
pub use registry::{FetchOutcome, ProviderInfo, ProviderRegistry, ProviderSlot, DEFAULT_MAX_ERRORS};
pub use store::{CacheStoreError, CachedSeries, MemoryStore, SeriesStore};
pub use synthetic::SyntheticProvider;
