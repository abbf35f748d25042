//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing over TR[1..]. Lookback: period.

use super::math;
use super::{param_period, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec, Params};
use crate::domain::Frame;

#[derive(Debug, Clone)]
pub struct AtrFactor {
    name: String,
    period: usize,
}

impl Factor for AtrFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["high".into(), "low".into(), "close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let high = require(frame, &self.name, "high")?;
        let low = require(frame, &self.name, "low")?;
        let close = require(frame, &self.name, "close")?;
        let tr = math::true_range(high, low, close);
        Ok(vec![(self.name.clone(), math::after_warmup(&tr, self.period, math::wilder))])
    }
}

impl FactorClass for AtrFactor {
    const CLASS_NAME: &'static str = "AtrFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Average true range (Wilder)";

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
