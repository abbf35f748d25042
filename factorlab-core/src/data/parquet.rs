//! Parquet-backed series store with Hive-style partitioning.
//!
//! Layout: `{dir}/symbol={SYMBOL}/kind={KIND}/series.parquet` plus a
//! `meta.json` sidecar in the same directory.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Wholesale replacement per key, never incremental
//! - Integrity validation on load (row count and hash against the sidecar)
//! - Quarantine for corrupt files ({filename}.quarantined), reported as a miss
//! - Per-key lock held across get, put and remove, so a reader never sees
//!   new data next to old metadata

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::store::{CacheStoreError, CachedSeries, SeriesStore};
use crate::domain::{DataKind, Frame};

const TIME_COLUMN: &str = "time";

/// Metadata sidecar for one cached series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetMeta {
    pub symbol: String,
    pub kind: DataKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub data_hash: String,
    pub cached_at: NaiveDateTime,
}

type KeyLocks = HashMap<(String, DataKind), Arc<Mutex<()>>>;

pub struct ParquetStore {
    dir: PathBuf,
    locks: Mutex<KeyLocks>,
}

impl ParquetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/symbol={SYMBOL}/kind={KIND}/`
    fn key_dir(&self, symbol: &str, kind: DataKind) -> PathBuf {
        self.dir
            .join(format!("symbol={symbol}"))
            .join(format!("kind={kind}"))
    }

    fn data_path(&self, symbol: &str, kind: DataKind) -> PathBuf {
        self.key_dir(symbol, kind).join("series.parquet")
    }

    fn meta_path(&self, symbol: &str, kind: DataKind) -> PathBuf {
        self.key_dir(symbol, kind).join("meta.json")
    }

    pub fn get_meta(&self, symbol: &str, kind: DataKind) -> Option<ParquetMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, kind)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Lock shared by every handle to one `(symbol, kind)` key in this store.
    fn key_lock(&self, symbol: &str, kind: DataKind) -> Result<Arc<Mutex<()>>, CacheStoreError> {
        let mut locks = self.locks.lock().map_err(|_| CacheStoreError::Poisoned)?;
        Ok(locks
            .entry((symbol.to_string(), kind))
            .or_default()
            .clone())
    }

    fn quarantine(&self, symbol: &str, kind: DataKind, reason: &str) {
        let path = self.data_path(symbol, kind);
        warn!(path = %path.display(), reason, "quarantining corrupt cache file");
        let _ = fs::rename(&path, path.with_extension("parquet.quarantined"));
        let _ = fs::remove_file(self.meta_path(symbol, kind));
    }
}

impl SeriesStore for ParquetStore {
    fn get(&self, symbol: &str, kind: DataKind) -> Result<Option<CachedSeries>, CacheStoreError> {
        let lock = self.key_lock(symbol, kind)?;
        let _guard = lock.lock().map_err(|_| CacheStoreError::Poisoned)?;
        let path = self.data_path(symbol, kind);
        if !path.exists() {
            return Ok(None);
        }
        let Some(meta) = self.get_meta(symbol, kind) else {
            self.quarantine(symbol, kind, "missing or unreadable meta.json");
            return Ok(None);
        };

        let frame = match read_parquet(&path) {
            Ok(frame) => frame,
            Err(e) => {
                self.quarantine(symbol, kind, &e.to_string());
                return Ok(None);
            }
        };
        if frame.len() != meta.row_count || frame.content_hash() != meta.data_hash {
            self.quarantine(symbol, kind, "row count or hash does not match meta.json");
            return Ok(None);
        }

        Ok(Some(CachedSeries {
            symbol: meta.symbol,
            kind: meta.kind,
            start: meta.start,
            end: meta.end,
            frame,
            cached_at: meta.cached_at,
        }))
    }

    fn put(&self, series: CachedSeries) -> Result<(), CacheStoreError> {
        if !series.frame.has_index() {
            return Err(CacheStoreError::Unindexed);
        }
        let lock = self.key_lock(&series.symbol, series.kind)?;
        let _guard = lock.lock().map_err(|_| CacheStoreError::Poisoned)?;
        let key_dir = self.key_dir(&series.symbol, series.kind);
        fs::create_dir_all(&key_dir)
            .map_err(|e| CacheStoreError::Io(format!("failed to create dir: {e}")))?;

        let path = self.data_path(&series.symbol, series.kind);
        let tmp_path = path.with_extension("parquet.tmp");
        let mut df = frame_to_dataframe(&series.frame)?;
        write_parquet(&mut df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheStoreError::Io(format!("atomic rename failed: {e}"))
        })?;

        let meta = ParquetMeta {
            symbol: series.symbol.clone(),
            kind: series.kind,
            start: series.start,
            end: series.end,
            row_count: series.frame.len(),
            columns: series.frame.column_names().map(String::from).collect(),
            data_hash: series.frame.content_hash(),
            cached_at: series.cached_at,
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| CacheStoreError::Io(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(&series.symbol, series.kind);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .map_err(|e| CacheStoreError::Io(format!("meta write: {e}")))?;
        fs::rename(&meta_tmp, &meta_path)
            .map_err(|e| CacheStoreError::Io(format!("meta rename: {e}")))?;
        Ok(())
    }

    fn remove(&self, symbol: &str, kind: DataKind) -> Result<bool, CacheStoreError> {
        let lock = self.key_lock(symbol, kind)?;
        let _guard = lock.lock().map_err(|_| CacheStoreError::Poisoned)?;
        let dir = self.key_dir(symbol, kind);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(|e| CacheStoreError::Io(format!("remove: {e}")))?;
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<(String, DataKind)>, CacheStoreError> {
        let mut keys = Vec::new();
        if !self.dir.exists() {
            return Ok(keys);
        }
        let read = |p: &Path| fs::read_dir(p).map_err(|e| CacheStoreError::Io(format!("read dir: {e}")));
        for sym_entry in read(&self.dir)? {
            let sym_path = sym_entry
                .map_err(|e| CacheStoreError::Io(format!("dir entry: {e}")))?
                .path();
            let Some(symbol) = dir_value(&sym_path, "symbol=") else {
                continue;
            };
            for kind_entry in read(&sym_path)? {
                let kind_path = kind_entry
                    .map_err(|e| CacheStoreError::Io(format!("dir entry: {e}")))?
                    .path();
                let kind = dir_value(&kind_path, "kind=").and_then(|k| k.parse::<DataKind>().ok());
                if let Some(kind) = kind {
                    if kind_path.join("series.parquet").exists() {
                        keys.push((symbol.clone(), kind));
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// `symbol=SPY` → `SPY`
fn dir_value(path: &Path, prefix: &str) -> Option<String> {
    path.file_name()?
        .to_str()?
        .strip_prefix(prefix)
        .map(String::from)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Timestamps are stored as epoch milliseconds.
fn frame_to_dataframe(frame: &Frame) -> Result<DataFrame, CacheStoreError> {
    let index = frame.index().ok_or(CacheStoreError::Unindexed)?;
    let millis: Vec<i64> = index
        .iter()
        .map(|t| t.and_utc().timestamp_millis())
        .collect();

    let mut columns = vec![Column::new(TIME_COLUMN.into(), millis)];
    for (name, values) in frame.columns() {
        columns.push(Column::new(name.as_str().into(), values.clone()));
    }
    DataFrame::new(columns)
        .map_err(|e| CacheStoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), CacheStoreError> {
    let file = fs::File::create(path)
        .map_err(|e| CacheStoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| CacheStoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<Frame, CacheStoreError> {
    let file =
        fs::File::open(path).map_err(|e| CacheStoreError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| CacheStoreError::Parquet(format!("read: {e}")))?;

    let times = df
        .column(TIME_COLUMN)
        .and_then(|c| c.i64().cloned())
        .map_err(|e| CacheStoreError::Parquet(format!("time column: {e}")))?;
    let mut index = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let ms = times
            .get(i)
            .ok_or_else(|| CacheStoreError::Parquet(format!("null time at row {i}")))?;
        let t = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| CacheStoreError::Parquet(format!("bad timestamp {ms} at row {i}")))?
            .naive_utc();
        index.push(t);
    }

    let mut frame = Frame::new(index);
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == TIME_COLUMN {
            continue;
        }
        let values = column
            .f64()
            .map_err(|e| CacheStoreError::Parquet(format!("{name} column type: {e}")))?;
        let values: Vec<f64> = (0..df.height())
            .map(|i| values.get(i).unwrap_or(f64::NAN))
            .collect();
        frame
            .push_column(name, values)
            .map_err(|e| CacheStoreError::Parquet(e.to_string()))?;
    }
    Ok(frame)
}
