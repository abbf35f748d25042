//! Frame — a time-indexed table of named `f64` columns.
//!
//! Providers return frames, the cache stores them, factors read them and
//! append columns to them. Columns are merged strictly by row position; a frame
//! never re-joins on its time index.
//!
//! A frame may lack a time index (a provider that returned bare columns). The
//! consumers that need one (`DataGroup::prepare`) reject such frames outright.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bar::{Bar, CANONICAL_FIELDS};

/// Fixed format used whenever a timestamp is rendered as text.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("column '{name}' has {actual} rows, frame has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("frame has no time index")]
    MissingIndex,

    #[error("missing column '{0}'")]
    MissingColumn(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    index: Option<Vec<NaiveDateTime>>,
    columns: Vec<(String, Vec<f64>)>,
}

impl Frame {
    /// A frame with a time index and no columns yet.
    pub fn new(index: Vec<NaiveDateTime>) -> Self {
        Self {
            index: Some(index),
            columns: Vec::new(),
        }
    }

    /// The "no data" frame: indexed, zero rows.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// A frame without a time index.
    pub fn unindexed(columns: Vec<(String, Vec<f64>)>) -> Self {
        Self {
            index: None,
            columns,
        }
    }

    /// Build an OHLCV frame from canonical bars.
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut frame = Self::new(bars.iter().map(|b| b.time).collect());
        frame.columns = vec![
            ("open".into(), bars.iter().map(|b| b.open).collect()),
            ("high".into(), bars.iter().map(|b| b.high).collect()),
            ("low".into(), bars.iter().map(|b| b.low).collect()),
            ("close".into(), bars.iter().map(|b| b.close).collect()),
            ("volume".into(), bars.iter().map(|b| b.volume).collect()),
        ];
        frame
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match &self.index {
            Some(index) => index.len(),
            None => self.columns.first().map_or(0, |(_, v)| v.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn index(&self) -> Option<&[NaiveDateTime]> {
        self.index.as_deref()
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.index.as_ref().and_then(|i| i.first().copied())
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.index.as_ref().and_then(|i| i.last().copied())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn columns(&self) -> &[(String, Vec<f64>)] {
        &self.columns
    }

    /// Append a column (or replace one with the same name), merged by row position.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), FrameError> {
        let name = name.into();
        let expected = self.len();
        let has_rows_defined = self.index.is_some() || !self.columns.is_empty();
        if has_rows_defined && values.len() != expected {
            return Err(FrameError::LengthMismatch {
                name,
                expected,
                actual: values.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name, values)),
        }
        Ok(())
    }

    /// True if every canonical OHLCV column is present.
    pub fn has_ohlcv(&self) -> bool {
        CANONICAL_FIELDS.iter().all(|f| self.has_column(f))
    }

    /// Rows whose date falls in `[start, end]` (inclusive). Unindexed frames are returned as-is.
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> Frame {
        let Some(index) = &self.index else {
            return self.clone();
        };
        let keep: Vec<usize> = index
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                let d = t.date();
                d >= start && d <= end
            })
            .map(|(i, _)| i)
            .collect();
        if keep.len() == index.len() {
            return self.clone();
        }
        Frame {
            index: Some(keep.iter().map(|&i| index[i]).collect()),
            columns: self
                .columns
                .iter()
                .map(|(n, v)| (n.clone(), keep.iter().map(|&i| v[i]).collect()))
                .collect(),
        }
    }

    /// Canonical bars for every row. Requires the time index and all OHLCV columns.
    pub fn to_bars(&self) -> Result<Vec<Bar>, FrameError> {
        let index = self.index.as_ref().ok_or(FrameError::MissingIndex)?;
        let col = |name: &str| {
            self.column(name)
                .ok_or_else(|| FrameError::MissingColumn(name.to_string()))
        };
        let (open, high, low, close, volume) =
            (col("open")?, col("high")?, col("low")?, col("close")?, col("volume")?);
        Ok(index
            .iter()
            .enumerate()
            .map(|(i, &time)| Bar {
                time,
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                volume: volume[i],
            })
            .collect())
    }

    /// Deterministic BLAKE3 hash over the index and every column.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        if let Some(index) = &self.index {
            for t in index {
                hasher.update(&t.and_utc().timestamp_millis().to_le_bytes());
            }
        }
        for (name, values) in &self.columns {
            hasher.update(name.as_bytes());
            for v in values {
                hasher.update(&v.to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}
