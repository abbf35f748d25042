//! Series stores behind the data cache.
//!
//! A store holds at most one `CachedSeries` per `(symbol, kind)` key and
//! replaces it wholesale on `put`. It is never patched incrementally.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::domain::{DataKind, Frame};

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache I/O error: {0}")]
    Io(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("corrupt cache entry for {symbol}/{kind}: {reason}")]
    Corrupt {
        symbol: String,
        kind: DataKind,
        reason: String,
    },

    #[error("refusing to cache a frame without a time index")]
    Unindexed,

    #[error("cache lock poisoned")]
    Poisoned,
}

/// One cached series and the date range it was fetched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSeries {
    pub symbol: String,
    pub kind: DataKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frame: Frame,
    pub cached_at: NaiveDateTime,
}

impl CachedSeries {
    pub fn new(symbol: &str, kind: DataKind, start: NaiveDate, end: NaiveDate, frame: Frame) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            start,
            end,
            frame,
            cached_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn rows(&self) -> usize {
        self.frame.len()
    }
}

/// Keyed storage for cached series. Implementations must tolerate concurrent
/// readers and serialize writers per key.
pub trait SeriesStore: Send + Sync {
    fn get(&self, symbol: &str, kind: DataKind) -> Result<Option<CachedSeries>, CacheStoreError>;

    /// Insert or replace the entry for `(series.symbol, series.kind)`.
    fn put(&self, series: CachedSeries) -> Result<(), CacheStoreError>;

    /// Returns true if an entry was removed.
    fn remove(&self, symbol: &str, kind: DataKind) -> Result<bool, CacheStoreError>;

    fn keys(&self) -> Result<Vec<(String, DataKind)>, CacheStoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(String, DataKind), CachedSeries>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeriesStore for MemoryStore {
    fn get(&self, symbol: &str, kind: DataKind) -> Result<Option<CachedSeries>, CacheStoreError> {
        let entries = self.entries.read().map_err(|_| CacheStoreError::Poisoned)?;
        Ok(entries.get(&(symbol.to_string(), kind)).cloned())
    }

    fn put(&self, series: CachedSeries) -> Result<(), CacheStoreError> {
        let mut entries = self.entries.write().map_err(|_| CacheStoreError::Poisoned)?;
        entries.insert((series.symbol.clone(), series.kind), series);
        Ok(())
    }

    fn remove(&self, symbol: &str, kind: DataKind) -> Result<bool, CacheStoreError> {
        let mut entries = self.entries.write().map_err(|_| CacheStoreError::Poisoned)?;
        Ok(entries.remove(&(symbol.to_string(), kind)).is_some())
    }

    fn keys(&self) -> Result<Vec<(String, DataKind)>, CacheStoreError> {
        let entries = self.entries.read().map_err(|_| CacheStoreError::Poisoned)?;
        let mut keys: Vec<_> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::sample_frame;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn put_replaces_wholesale() {
        let store = MemoryStore::new();
        store
            .put(CachedSeries::new("X", DataKind::Daily, d(1), d(10), sample_frame(10)))
            .unwrap();
        store
            .put(CachedSeries::new("X", DataKind::Daily, d(5), d(6), sample_frame(2)))
            .unwrap();

        let got = store.get("X", DataKind::Daily).unwrap().unwrap();
        assert_eq!(got.start, d(5));
        assert_eq!(got.rows(), 2);
    }

    #[test]
    fn keys_are_per_symbol_and_kind() {
        let store = MemoryStore::new();
        store
            .put(CachedSeries::new("X", DataKind::Daily, d(1), d(2), sample_frame(2)))
            .unwrap();
        store
            .put(CachedSeries::new("X", DataKind::Weekly, d(1), d(2), sample_frame(2)))
            .unwrap();
        assert_eq!(store.keys().unwrap().len(), 2);
        assert!(store.get("X", DataKind::Minute).unwrap().is_none());

        assert!(store.remove("X", DataKind::Weekly).unwrap());
        assert!(!store.remove("X", DataKind::Weekly).unwrap());
        assert_eq!(
            store.keys().unwrap(),
            vec![("X".to_string(), DataKind::Daily)]
        );
    }
}
