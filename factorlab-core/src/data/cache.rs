//! Validated data cache — trusts a cached series only if it covers the request.
//!
//! A cached entry for `(symbol, kind)` is a hit only when both hold:
//! - coverage: `cached.start <= start && cached.end >= end`
//! - sufficiency: `rows >= min(min_fill_ratio * expected, min_rows)`, where
//!   `expected = trading_day_ratio * calendar_days(start, end)`
//!
//! Anything else is a miss and the whole requested range is re-fetched through
//! the provider registry, then written back, replacing the previous entry.
//! Store failures are logged and treated as misses; an exhausted provider list
//! yields an empty frame rather than an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::registry::{FetchOutcome, ProviderRegistry};
use super::store::{CachedSeries, SeriesStore};
use crate::domain::{DataKind, Frame};

/// Thresholds for deciding whether a cached series is complete enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Fraction of calendar days expected to be trading days.
    pub trading_day_ratio: f64,
    /// Fraction of the expected rows that must be present.
    pub min_fill_ratio: f64,
    /// Upper bound on the required row count.
    pub min_rows: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            trading_day_ratio: 0.7,
            min_fill_ratio: 0.8,
            min_rows: 10,
        }
    }
}

impl CachePolicy {
    /// Calendar days in `[start, end]`, inclusive.
    pub fn calendar_days(start: NaiveDate, end: NaiveDate) -> i64 {
        ((end - start).num_days() + 1).max(0)
    }

    pub fn expected_rows(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        Self::calendar_days(start, end) as f64 * self.trading_day_ratio
    }

    /// Minimum row count for a cached series to count as sufficient.
    pub fn required_rows(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        (self.min_fill_ratio * self.expected_rows(start, end)).min(self.min_rows as f64)
    }

    /// Classify a cached entry against a request.
    pub fn check(&self, cached: Option<&CachedSeries>, start: NaiveDate, end: NaiveDate) -> CacheCheck {
        let Some(cached) = cached else {
            return CacheCheck::NotCached;
        };
        if !(cached.start <= start && cached.end >= end) {
            return CacheCheck::Uncovered {
                cached_start: cached.start,
                cached_end: cached.end,
            };
        }
        let rows = cached.frame.slice_dates(start, end).len();
        let required = self.required_rows(start, end);
        if (rows as f64) < required {
            return CacheCheck::Sparse { rows, required };
        }
        CacheCheck::Hit
    }
}

/// Outcome of validating a cached entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheCheck {
    Hit,
    NotCached,
    Uncovered {
        cached_start: NaiveDate,
        cached_end: NaiveDate,
    },
    Sparse {
        rows: usize,
        required: f64,
    },
}

/// Where a frame returned by the cache came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    Cache,
    Provider(String),
    NoData,
}

#[derive(Debug, Clone)]
pub struct CacheFetch {
    pub frame: Frame,
    pub source: FrameSource,
}

/// Cache-first access to market data with provider fallback.
///
/// Safe to share across concurrent runs: reads go through the store's own
/// locking and refreshes replace an entry in a single `put`.
pub struct DataCache {
    store: Arc<dyn SeriesStore>,
    providers: Arc<ProviderRegistry>,
    policy: CachePolicy,
}

impl DataCache {
    pub fn new(store: Arc<dyn SeriesStore>, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            store,
            providers,
            policy: CachePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn store(&self) -> &dyn SeriesStore {
        self.store.as_ref()
    }

    /// Fetch a series; an empty frame means "no data".
    pub async fn fetch(
        &self,
        symbol: &str,
        kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
        use_cache: bool,
    ) -> Frame {
        self.fetch_detailed(symbol, kind, start, end, use_cache)
            .await
            .frame
    }

    /// Like `fetch`, but also reports where the frame came from.
    pub async fn fetch_detailed(
        &self,
        symbol: &str,
        kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
        use_cache: bool,
    ) -> CacheFetch {
        if use_cache {
            let cached = match self.store.get(symbol, kind) {
                Ok(cached) => cached,
                Err(e) => {
                    warn!(symbol, kind = %kind, error = %e, "cache read failed, treating as miss");
                    None
                }
            };
            match self.policy.check(cached.as_ref(), start, end) {
                CacheCheck::Hit => {
                    debug!(symbol, kind = %kind, "cache hit");
                    if let Some(cached) = cached {
                        return CacheFetch {
                            frame: cached.frame.slice_dates(start, end),
                            source: FrameSource::Cache,
                        };
                    }
                }
                miss => debug!(symbol, kind = %kind, ?miss, "cache miss"),
            }
        }

        match self
            .providers
            .fetch_with_fallback(symbol, kind, start, end)
            .await
        {
            FetchOutcome::Fetched { provider, frame } => {
                let series = CachedSeries::new(symbol, kind, start, end, frame);
                let sliced = series.frame.slice_dates(start, end);
                if let Err(e) = self.store.put(series) {
                    warn!(symbol, kind = %kind, error = %e, "cache write failed");
                } else {
                    info!(symbol, kind = %kind, %start, %end, provider = %provider, "cache refreshed");
                }
                CacheFetch {
                    frame: sliced,
                    source: FrameSource::Provider(provider),
                }
            }
            FetchOutcome::NoData { .. } => CacheFetch {
                frame: Frame::empty(),
                source: FrameSource::NoData,
            },
        }
    }

    /// Drop one cached entry.
    pub fn invalidate(&self, symbol: &str, kind: DataKind) -> bool {
        match self.store.remove(symbol, kind) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(symbol, kind = %kind, error = %e, "cache invalidation failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::{sample_frame, MockProvider};
    use crate::data::store::MemoryStore;
    use proptest::prelude::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn cache_with(provider: Arc<MockProvider>) -> (DataCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ProviderRegistry::new().with_provider(provider, 1));
        (DataCache::new(store.clone(), registry), store)
    }

    #[test]
    fn required_rows_caps_at_min_rows() {
        let policy = CachePolicy::default();
        // 31 days * 0.7 * 0.8 = 17.36, capped at 10
        assert_eq!(policy.required_rows(d(1), d(31)), 10.0);
        // 5 days * 0.7 * 0.8 = 2.8
        assert!((policy.required_rows(d(1), d(5)) - 2.8).abs() < 1e-9);
    }

    #[test]
    fn partial_overlap_is_a_miss() {
        let policy = CachePolicy::default();
        let cached = CachedSeries::new("X", DataKind::Daily, d(1), d(20), sample_frame(20));
        assert_eq!(
            policy.check(Some(&cached), d(10), d(31)),
            CacheCheck::Uncovered {
                cached_start: d(1),
                cached_end: d(20)
            }
        );
    }

    #[test]
    fn contained_but_sparse_is_a_miss() {
        let policy = CachePolicy::default();
        let cached = CachedSeries::new("X", DataKind::Daily, d(1), d(31), sample_frame(3));
        assert!(matches!(
            policy.check(Some(&cached), d(1), d(31)),
            CacheCheck::Sparse { rows: 3, .. }
        ));
    }

    #[test]
    fn contained_and_dense_is_a_hit() {
        let policy = CachePolicy::default();
        let cached = CachedSeries::new("X", DataKind::Daily, d(1), d(31), sample_frame(31));
        assert_eq!(policy.check(Some(&cached), d(2), d(30)), CacheCheck::Hit);
    }

    #[tokio::test]
    async fn miss_refreshes_and_writes_back() {
        let provider = Arc::new(MockProvider::returning("a", sample_frame(31)));
        let (cache, store) = cache_with(provider.clone());

        let first = cache.fetch_detailed("X", DataKind::Daily, d(1), d(31), true).await;
        assert_eq!(first.source, FrameSource::Provider("a".into()));
        assert_eq!(first.frame.len(), 31);
        let stored = store.get("X", DataKind::Daily).unwrap().unwrap();
        assert_eq!((stored.start, stored.end), (d(1), d(31)));

        let second = cache.fetch_detailed("X", DataKind::Daily, d(5), d(20), true).await;
        assert_eq!(second.source, FrameSource::Cache);
        assert_eq!(second.frame.len(), 16);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn sparse_entry_triggers_full_refresh() {
        let provider = Arc::new(MockProvider::returning("a", sample_frame(31)));
        let (cache, store) = cache_with(provider.clone());
        store
            .put(CachedSeries::new("X", DataKind::Daily, d(1), d(31), sample_frame(2)))
            .unwrap();

        let got = cache.fetch("X", DataKind::Daily, d(1), d(31), true).await;
        assert_eq!(got.len(), 31);
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.get("X", DataKind::Daily).unwrap().unwrap().rows(), 31);
    }

    #[tokio::test]
    async fn bypassing_cache_always_fetches() {
        let provider = Arc::new(MockProvider::returning("a", sample_frame(31)));
        let (cache, _) = cache_with(provider.clone());
        cache.fetch("X", DataKind::Daily, d(1), d(31), false).await;
        cache.fetch("X", DataKind::Daily, d(1), d(31), false).await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_providers_yield_empty_frame() {
        let provider = Arc::new(MockProvider::failing("a"));
        let (cache, store) = cache_with(provider);
        let got = cache.fetch_detailed("X", DataKind::Daily, d(1), d(31), true).await;
        assert_eq!(got.source, FrameSource::NoData);
        assert!(got.frame.is_empty());
        assert!(store.get("X", DataKind::Daily).unwrap().is_none());
    }

    #[tokio::test]
    async fn fallback_result_is_what_gets_cached() {
        let a = Arc::new(MockProvider::failing("a"));
        let b_frame = sample_frame(31);
        let b = Arc::new(MockProvider::returning("b", b_frame.clone()));
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_provider(a, 1)
                .with_provider(b, 2),
        );
        let cache = DataCache::new(store.clone(), registry.clone());

        let before = registry.error_count("a").unwrap();
        cache.fetch("X", DataKind::Daily, d(1), d(31), true).await;

        assert_eq!(store.get("X", DataKind::Daily).unwrap().unwrap().frame, b_frame);
        assert_eq!(registry.error_count("a").unwrap(), before + 1);
    }

    #[test]
    fn invalidate_removes_entry() {
        let (cache, store) = cache_with(Arc::new(MockProvider::failing("a")));
        store
            .put(CachedSeries::new("X", DataKind::Daily, d(1), d(3), sample_frame(3)))
            .unwrap();
        assert!(cache.invalidate("X", DataKind::Daily));
        assert!(!cache.invalidate("X", DataKind::Daily));
    }

    proptest! {
        #[test]
        fn hit_iff_covered_and_sufficient(
            cs in 1u32..=28, clen in 0u32..=20,
            rs in 1u32..=28, rlen in 0u32..=20,
            rows in 0usize..=31,
        ) {
            let ce = (cs + clen).min(31);
            let re = (rs + rlen).min(31);
            let frame = sample_frame(rows);
            let cached = CachedSeries::new("X", DataKind::Daily, d(cs), d(ce), frame.clone());
            let policy = CachePolicy::default();

            let in_range = frame.slice_dates(d(rs), d(re)).len();
            let covered = cs <= rs && ce >= re;
            let sufficient = in_range as f64 >= policy.required_rows(d(rs), d(re));
            let hit = policy.check(Some(&cached), d(rs), d(re)) == CacheCheck::Hit;
            prop_assert_eq!(hit, covered && sufficient);
        }
    }
}
