//! Deterministic random-walk provider, one walk per symbol.
//!
//! Seeded from BLAKE3(symbol, seed) so the same request always yields the same
//! bars. Daily bars skip weekends; weekly bars land on Fridays. Intended for
//! development and tests, never for research results.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::provider::{MarketDataProvider, ProviderError};
use crate::domain::{Bar, DataKind, Frame};

pub struct SyntheticProvider {
    name: String,
    seed: u64,
    start_price: f64,
}

impl SyntheticProvider {
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            seed,
            start_price: 100.0,
        }
    }

    /// Generate bars for every session in `[start, end]`.
    pub fn generate(&self, symbol: &str, kind: DataKind, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(symbol.as_bytes());
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(kind.as_str().as_bytes());
        let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

        let (step_range, is_session): (f64, fn(NaiveDate) -> bool) = match kind {
            DataKind::Weekly => (0.06, |d| d.weekday() == Weekday::Fri),
            _ => (0.03, |d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)),
        };

        let mut bars = Vec::new();
        let mut price = self.start_price;
        let mut current = start;
        while current <= end {
            if is_session(current) {
                let change: f64 = rng.gen_range(-step_range..step_range);
                let open = price;
                let close = price * (1.0 + change);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
                let volume = rng.gen_range(500_000..5_000_000u64) as f64;
                if let Some(time) = current.and_hms_opt(0, 0, 0) {
                    bars.push(Bar {
                        time,
                        open,
                        high,
                        low,
                        close,
                        volume,
                    });
                }
                price = close;
            }
            current += Duration::days(1);
        }
        bars
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_kinds(&self) -> &[DataKind] {
        &[DataKind::Daily, DataKind::Weekly]
    }

    async fn fetch(
        &self,
        symbol: &str,
        kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Frame, ProviderError> {
        if !self.supports(kind) {
            return Err(ProviderError::UnsupportedKind {
                provider: self.name.clone(),
                kind,
            });
        }
        Ok(Frame::from_bars(&self.generate(symbol, kind, start, end)))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
