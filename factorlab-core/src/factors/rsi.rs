//! Relative Strength Index (RSI).
//!
//! Uses Wilder smoothing of average gains and average losses.
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss)
//! Lookback: period.
//! Edge cases: avg_loss == 0 → RSI = 100; avg_gain == 0 → RSI = 0; both → 50.

use super::{param_period, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec, Params};
use crate::domain::Frame;

#[derive(Debug, Clone)]
pub struct RsiFactor {
    name: String,
    period: usize,
}

fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut result = vec![f64::NAN; n];
    if n < period + 1 {
        return result;
    }

    let changes: Vec<f64> = (0..n)
        .map(|i| if i == 0 { f64::NAN } else { close[i] - close[i - 1] })
        .collect();

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for &ch in &changes[1..=period] {
        if ch.is_nan() {
            return result;
        }
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        if changes[i].is_nan() {
            return result;
        }
        let gain = changes[i].max(0.0);
        let loss = (-changes[i]).max(0.0);
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

impl Factor for RsiFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let close = require(frame, &self.name, "close")?;
        Ok(vec![(self.name.clone(), rsi(close, self.period))])
    }
}

impl FactorClass for RsiFactor {
    const CLASS_NAME: &'static str = "RsiFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Wilder relative strength index";

    fn parameters() -> Vec<ParamSpec> {
        vec![ParamSpec::int("period", 14)]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        Ok(Self {
            name: instance_name.to_string(),
            period: param_period(Self::CLASS_NAME, params, "period", 14)?,
        })
    }
}
