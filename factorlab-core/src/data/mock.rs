//! Test doubles for the provider layer.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::provider::{MarketDataProvider, ProviderError};
use crate::domain::{Bar, DataKind, Frame};

/// Weekday-agnostic OHLCV frame of `n` rows starting 2024-01-01.
pub fn sample_frame(n: usize) -> Frame {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let bars: Vec<Bar> = (0..n)
        .map(|i| {
            let close = 100.0 + i as f64;
            Bar {
                time: (start + Duration::days(i as i64)).and_hms_opt(0, 0, 0).unwrap(),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1000.0,
            }
        })
        .collect();
    Frame::from_bars(&bars)
}

pub struct MockProvider {
    name: String,
    response: Option<Frame>,
    calls: AtomicUsize,
    healthy: AtomicBool,
}

impl MockProvider {
    pub fn returning(name: &str, frame: Frame) -> Self {
        Self {
            name: name.to_string(),
            response: Some(frame),
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: None,
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        symbol: &str,
        _kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Frame, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(frame) => Ok(frame.slice_dates(start, end)),
            None => Err(ProviderError::Unreachable {
                provider: self.name.clone(),
                reason: format!("mock failure for {symbol}"),
            }),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
