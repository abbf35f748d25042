//! CSV directory provider.
//!
//! Layout: `{dir}/{kind}/{SYMBOL}.csv`. The first column is the timestamp
//! (`date` or `time`, `%Y-%m-%d` or `%Y-%m-%d %H:%M:%S`); every other column
//! is parsed as a number. Blank cells become NaN.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

use super::provider::{MarketDataProvider, ProviderError};
use crate::domain::{DataKind, Frame};

pub struct CsvProvider {
    name: String,
    dir: PathBuf,
    kinds: Vec<DataKind>,
}

impl CsvProvider {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            kinds: DataKind::ALL.to_vec(),
        }
    }

    fn path_for(&self, symbol: &str, kind: DataKind) -> PathBuf {
        self.dir.join(kind.as_str()).join(format!("{symbol}.csv"))
    }

    fn malformed(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::Malformed {
            provider: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn read_file(&self, path: &Path, start: NaiveDate, end: NaiveDate) -> Result<Frame, ProviderError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| self.malformed(format!("{}: {e}", path.display())))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| self.malformed(format!("header: {e}")))?
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        match headers.first().map(String::as_str) {
            Some("date") | Some("time") | Some("datetime") => {}
            _ => return Err(self.malformed("first column must be date/time")),
        }

        let mut index = Vec::new();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len() - 1];
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| self.malformed(format!("row {line}: {e}")))?;
            let raw_time = record.get(0).unwrap_or_default();
            let time = parse_time(raw_time)
                .ok_or_else(|| self.malformed(format!("row {line}: bad timestamp '{raw_time}'")))?;
            if time.date() < start || time.date() > end {
                continue;
            }
            index.push(time);
            for (col, values) in columns.iter_mut().enumerate() {
                let cell = record.get(col + 1).unwrap_or_default();
                let value = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse::<f64>().map_err(|e| {
                        self.malformed(format!("row {line}, column {}: {e}", headers[col + 1]))
                    })?
                };
                values.push(value);
            }
        }

        let mut order: Vec<usize> = (0..index.len()).collect();
        order.sort_by_key(|&i| index[i]);
        let mut frame = Frame::new(order.iter().map(|&i| index[i]).collect());
        for (name, values) in headers.iter().skip(1).zip(columns) {
            let sorted = order.iter().map(|&i| values[i]).collect();
            frame
                .push_column(name.as_str(), sorted)
                .map_err(|e| self.malformed(e.to_string()))?;
        }
        Ok(frame)
    }
}

fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[async_trait]
impl MarketDataProvider for CsvProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_kinds(&self) -> &[DataKind] {
        &self.kinds
    }

    async fn fetch(
        &self,
        symbol: &str,
        kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Frame, ProviderError> {
        let path = self.path_for(symbol, kind);
        if !path.exists() {
            return Err(ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        self.read_file(&path, start, end)
    }

    async fn health_check(&self) -> bool {
        self.dir.is_dir()
    }
}
