//! Bollinger Bands: moving average +/- a standard deviation multiplier.
//!
//! Outputs, all prefixed with the instance name:
//! - `_middle`: SMA(close, period)
//! - `_upper` / `_lower`: middle ± std_dev * stddev(close, period)
//! - `_width`: (upper - lower) / middle
//! - `_position`: (close - lower) / (upper - lower), NaN on a zero-width band
//!
//! Uses population stddev (divide by N). Lookback: period - 1.

use super::math;
use super::{
    param_f64, param_period, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec,
    Params,
};
use crate::domain::Frame;

#[derive(Debug, Clone)]
pub struct BollingerFactor {
    name: String,
    period: usize,
    std_dev: f64,
}

impl Factor for BollingerFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let close = require(frame, &self.name, "close")?;
        let middle = math::sma(close, self.period);
        let std = math::rolling_std(close, self.period);

        let n = close.len();
        let mut upper = vec![f64::NAN; n];
        let mut lower = vec![f64::NAN; n];
        let mut width = vec![f64::NAN; n];
        let mut position = vec![f64::NAN; n];
        for i in 0..n {
            upper[i] = middle[i] + self.std_dev * std[i];
            lower[i] = middle[i] - self.std_dev * std[i];
            if middle[i] != 0.0 {
                width[i] = (upper[i] - lower[i]) / middle[i];
            }
            let band = upper[i] - lower[i];
            if band > 0.0 {
                position[i] = (close[i] - lower[i]) / band;
            }
        }

        Ok(vec![
            (format!("{}_upper", self.name), upper),
            (format!("{}_middle", self.name), middle),
            (format!("{}_lower", self.name), lower),
            (format!("{}_width", self.name), width),
            (format!("{}_position", self.name), position),
        ])
    }
}

impl FactorClass for BollingerFactor {
    const CLASS_NAME: &'static str = "BollingerFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Bollinger bands with width and position";

    fn parameters() -> Vec<ParamSpec> {
        vec![ParamSpec::int("period", 20), ParamSpec::float("std_dev", 2.0)]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        Ok(Self {
            name: instance_name.to_string(),
            period: param_period(Self::CLASS_NAME, params, "period", 20)?,
            std_dev: param_f64(Self::CLASS_NAME, params, "std_dev", 2.0)?,
        })
    }
}
